// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dirty-region accumulation between frames.
//!
//! [`DirtyRegion`] collects the screen-space rects invalidated since the
//! last frame. The set is bounded: past [`MAX_RECTS`] entries it collapses
//! to its bounding rect, trading precision for constant memory. Marking
//! everything dirty ([`DirtyRegion::add_all`]) short-circuits accumulation.
//!
//! [`SharedDirtyRegion`] is the cross-thread wrapper: the UI/event thread
//! calls `add`/`add_all` while the render thread [takes](SharedDirtyRegion::take)
//! the accumulated region at the start of a frame. The lock is held only
//! across the mutation, never across a GPU call.

use std::sync::Arc;

use kurbo::Rect;
use parking_lot::Mutex;

use crate::geometry;

/// Maximum number of rects tracked individually before the region collapses
/// to a single bounding rect.
pub const MAX_RECTS: usize = 16;

/// Accumulated invalid area since the last frame.
///
/// Purely CPU-side bookkeeping; no GPU side effects.
#[derive(Clone, Debug, Default)]
pub struct DirtyRegion {
    all: bool,
    rects: Vec<Rect>,
}

impl DirtyRegion {
    /// Creates an empty region.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unions `rect` into the region. Empty rects are ignored.
    pub fn add(&mut self, rect: Rect) {
        if self.all || geometry::is_empty(rect) {
            return;
        }
        if self.rects.len() == MAX_RECTS {
            let bounds = self.bounding();
            self.rects.clear();
            self.rects.push(bounds);
        }
        self.rects.push(rect);
    }

    /// Marks the entire visible bounds dirty.
    pub fn add_all(&mut self) {
        self.all = true;
        self.rects.clear();
    }

    /// Merges another region into this one (used to restore a taken region
    /// when a frame could not proceed).
    pub fn merge(&mut self, other: &Self) {
        if other.all {
            self.add_all();
            return;
        }
        for &r in &other.rects {
            self.add(r);
        }
    }

    /// Returns whether nothing has been invalidated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.all && self.rects.is_empty()
    }

    /// Returns the bounding rect of everything accumulated, clipped to
    /// `view`, or `None` when the region is empty (or falls entirely
    /// outside the view).
    #[must_use]
    pub fn bounds(&self, view: Rect) -> Option<Rect> {
        if geometry::is_empty(view) {
            return None;
        }
        if self.all {
            return Some(view);
        }
        let clipped = geometry::intersect(self.bounding(), view);
        (!geometry::is_empty(clipped)).then_some(clipped)
    }

    /// Resets to empty.
    pub fn clear(&mut self) {
        self.all = false;
        self.rects.clear();
    }

    fn bounding(&self) -> Rect {
        self.rects
            .iter()
            .copied()
            .fold(Rect::ZERO, geometry::union)
    }
}

/// Thread-safe handle to a [`DirtyRegion`].
///
/// Cloning is cheap; all clones refer to the same region. Safe to call from
/// the UI/event thread while the renderer reads it from the render thread.
#[derive(Clone, Debug, Default)]
pub struct SharedDirtyRegion {
    inner: Arc<Mutex<DirtyRegion>>,
}

impl SharedDirtyRegion {
    /// Creates an empty shared region.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unions `rect` into the region.
    pub fn add(&self, rect: Rect) {
        self.inner.lock().add(rect);
    }

    /// Marks the entire visible bounds dirty.
    pub fn add_all(&self) {
        self.inner.lock().add_all();
    }

    /// Returns whether nothing has been invalidated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Atomically takes the accumulated region, leaving it empty.
    ///
    /// This is the renderer's frame-start read-and-clear.
    #[must_use]
    pub fn take(&self) -> DirtyRegion {
        std::mem::take(&mut *self.inner.lock())
    }

    /// Merges a previously taken region back (frame could not proceed).
    pub fn restore(&self, region: &DirtyRegion) {
        self.inner.lock().merge(region);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEW: Rect = Rect::new(0.0, 0.0, 400.0, 300.0);

    #[test]
    fn accumulation_yields_bounding_rect() {
        let mut region = DirtyRegion::new();
        region.add(Rect::new(10.0, 10.0, 50.0, 50.0));
        region.add(Rect::new(100.0, 5.0, 120.0, 40.0));
        region.add(Rect::new(30.0, 200.0, 60.0, 250.0));
        assert_eq!(
            region.bounds(VIEW),
            Some(Rect::new(10.0, 5.0, 120.0, 250.0))
        );
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut region = DirtyRegion::new();
        region.add(Rect::new(10.0, 10.0, 50.0, 50.0));
        region.clear();
        assert!(region.is_empty());
        assert_eq!(region.bounds(VIEW), None);
    }

    #[test]
    fn empty_rects_are_ignored() {
        let mut region = DirtyRegion::new();
        region.add(Rect::ZERO);
        region.add(Rect::new(5.0, 5.0, 5.0, 80.0));
        assert!(region.is_empty());
    }

    #[test]
    fn add_all_covers_the_view() {
        let mut region = DirtyRegion::new();
        region.add_all();
        assert!(!region.is_empty());
        assert_eq!(region.bounds(VIEW), Some(VIEW));
    }

    #[test]
    fn bounds_clip_to_view() {
        let mut region = DirtyRegion::new();
        region.add(Rect::new(350.0, 250.0, 500.0, 400.0));
        assert_eq!(
            region.bounds(VIEW),
            Some(Rect::new(350.0, 250.0, 400.0, 300.0))
        );
    }

    #[test]
    fn fully_offscreen_dirt_is_none() {
        let mut region = DirtyRegion::new();
        region.add(Rect::new(500.0, 500.0, 600.0, 600.0));
        assert_eq!(region.bounds(VIEW), None);
    }

    #[test]
    fn overflow_collapses_but_keeps_bounds() {
        let mut region = DirtyRegion::new();
        for i in 0..(MAX_RECTS + 10) {
            let x = i as f64;
            region.add(Rect::new(x, 0.0, x + 1.0, 1.0));
        }
        let bounds = region.bounds(VIEW).unwrap();
        assert_eq!(bounds.x0, 0.0);
        assert_eq!(bounds.x1, (MAX_RECTS + 10) as f64);
    }

    #[test]
    fn shared_take_is_read_and_clear() {
        let shared = SharedDirtyRegion::new();
        shared.add(Rect::new(10.0, 10.0, 50.0, 50.0));
        let taken = shared.take();
        assert_eq!(
            taken.bounds(VIEW),
            Some(Rect::new(10.0, 10.0, 50.0, 50.0))
        );
        assert!(shared.is_empty());
    }

    #[test]
    fn shared_restore_merges_back() {
        let shared = SharedDirtyRegion::new();
        shared.add(Rect::new(10.0, 10.0, 50.0, 50.0));
        let taken = shared.take();
        shared.add(Rect::new(0.0, 0.0, 5.0, 5.0));
        shared.restore(&taken);
        let merged = shared.take();
        assert_eq!(
            merged.bounds(VIEW),
            Some(Rect::new(0.0, 0.0, 50.0, 50.0))
        );
    }

    #[test]
    fn shared_clones_alias_one_region() {
        let a = SharedDirtyRegion::new();
        let b = a.clone();
        b.add(Rect::new(1.0, 1.0, 2.0, 2.0));
        assert!(!a.is_empty());
    }
}
