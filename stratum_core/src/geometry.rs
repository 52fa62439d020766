// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rectangle helpers over [`kurbo::Rect`].
//!
//! Rects are carried in *layout units* until the last possible moment and
//! converted to device pixels only where a framebuffer or scissor needs
//! pixel-exact dimensions. Two conventions hold throughout the crate:
//!
//! - An empty rect (zero area) is the identity element for [`union`] and is
//!   never a valid framebuffer size.
//! - Framebuffer dimensions come from [`pixel_size`], which aligns the rect
//!   outward first so a fractional layout rect never produces a framebuffer
//!   smaller than its content.

use kurbo::Rect;

/// Returns whether `rect` has zero area.
#[inline]
#[must_use]
pub fn is_empty(rect: Rect) -> bool {
    rect.width() <= 0.0 || rect.height() <= 0.0
}

/// Snaps `rect` outward to integer boundaries (floor the min edge, ceil the
/// max edge).
///
/// Required before allocating pixel-exact framebuffers.
#[inline]
#[must_use]
pub fn align_outward(rect: Rect) -> Rect {
    rect.expand()
}

/// Scales `rect` uniformly about the origin.
#[inline]
#[must_use]
pub fn scale(rect: Rect, factor: f64) -> Rect {
    Rect::new(
        rect.x0 * factor,
        rect.y0 * factor,
        rect.x1 * factor,
        rect.y1 * factor,
    )
}

/// Union where empty rects are the identity.
///
/// `kurbo::Rect::union` would pull an empty rect's corner (often the origin)
/// into the result; this one ignores empty inputs entirely.
#[inline]
#[must_use]
pub fn union(a: Rect, b: Rect) -> Rect {
    if is_empty(a) {
        b
    } else if is_empty(b) {
        a
    } else {
        a.union(b)
    }
}

/// Intersection, with empty inputs producing an empty result.
#[inline]
#[must_use]
pub fn intersect(a: Rect, b: Rect) -> Rect {
    if is_empty(a) || is_empty(b) {
        Rect::ZERO
    } else {
        a.intersect(b)
    }
}

/// Computes the device-pixel dimensions of `rect` at the given scale.
///
/// The rect is aligned outward before scaling, matching the framebuffer
/// sizing rule: `ceil(scale * ceil(width))`. Returns `None` for empty rects
/// or non-positive scales.
#[must_use]
pub fn pixel_size(rect: Rect, scale: f64) -> Option<(u32, u32)> {
    if is_empty(rect) || scale <= 0.0 {
        return None;
    }
    let aligned = align_outward(rect);
    #[expect(
        clippy::cast_possible_truncation,
        reason = "ceil of a positive finite size; sign loss and truncation are impossible for sane view dimensions"
    )]
    let (w, h) = (
        (scale * aligned.width()).ceil() as u32,
        (scale * aligned.height()).ceil() as u32,
    );
    Some((w.max(1), h.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rect_detection() {
        assert!(is_empty(Rect::ZERO));
        assert!(is_empty(Rect::new(10.0, 10.0, 10.0, 20.0)));
        assert!(!is_empty(Rect::new(0.0, 0.0, 1.0, 1.0)));
    }

    #[test]
    fn align_outward_snaps_to_integers() {
        let r = align_outward(Rect::new(0.3, 0.7, 10.2, 19.9));
        assert_eq!(r, Rect::new(0.0, 0.0, 11.0, 20.0));
    }

    #[test]
    fn align_outward_is_identity_on_integers() {
        let r = Rect::new(2.0, 3.0, 8.0, 9.0);
        assert_eq!(align_outward(r), r);
    }

    #[test]
    fn union_treats_empty_as_identity() {
        let r = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(union(Rect::ZERO, r), r);
        assert_eq!(union(r, Rect::ZERO), r);
        assert_eq!(
            union(r, Rect::new(0.0, 0.0, 6.0, 6.0)),
            Rect::new(0.0, 0.0, 10.0, 10.0)
        );
    }

    #[test]
    fn intersect_of_disjoint_is_empty() {
        let a = Rect::new(0.0, 0.0, 5.0, 5.0);
        let b = Rect::new(10.0, 10.0, 20.0, 20.0);
        assert!(is_empty(intersect(a, b)));
    }

    #[test]
    fn pixel_size_applies_scale_after_alignment() {
        // 10.2 wide aligns to 11, then 2x scale -> 22.
        let r = Rect::new(0.0, 0.0, 10.2, 4.0);
        assert_eq!(pixel_size(r, 2.0), Some((22, 8)));
    }

    #[test]
    fn pixel_size_rejects_empty_and_bad_scale() {
        assert_eq!(pixel_size(Rect::ZERO, 2.0), None);
        assert_eq!(pixel_size(Rect::new(0.0, 0.0, 4.0, 4.0), 0.0), None);
    }

    #[test]
    fn scale_scales_all_edges() {
        let r = scale(Rect::new(1.0, 2.0, 3.0, 4.0), 2.0);
        assert_eq!(r, Rect::new(2.0, 4.0, 6.0, 8.0));
    }
}
