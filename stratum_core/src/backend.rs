// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Backend contract for GPU rasterizer integrations.
//!
//! Stratum splits GPU-API-specific work into *backend* crates. Each backend
//! implements [`RasterBackend`] over one native API (Metal, OpenGL, D3D11,
//! wgpu, …) as an explicit context value — no process-wide state. The core
//! depends only on this trait; it never branches on which API is underneath.
//!
//! # Frame discipline
//!
//! The core drives a backend in strict bind/begin/…/end brackets:
//!
//! ```text
//! bind_framebuffer(target)
//! begin_frame(w_px, h_px, 1.0)
//! set_transform(scale, origin)          // layout → pixel mapping
//! intersect_scissor(..) / clear(..) / fill_rect(..) / draw_framebuffer(..)
//! end_frame()
//! ```
//!
//! Exactly one target is ever bound at a time, and `bind_framebuffer` is only
//! called while no frame is in progress. `present()` is called at most once
//! per displayed frame, after an `end_frame` on [`RenderTarget::Screen`].
//!
//! # Drawing vocabulary
//!
//! The core itself composites textured rectangles and nothing else; paths,
//! text, images, and gradients belong to the host toolkit's translation
//! layer, which talks to the same backend through its own extension of this
//! vocabulary. [`RasterBackend::fill_rect`] exists so scenes and demos can
//! produce visible content without that layer.

use std::fmt;
use std::sync::Arc;

use kurbo::{Point, Rect};
use parking_lot::Mutex;

use crate::error::BackendError;

/// Monotonically assigned identity of a GPU framebuffer.
///
/// Usable as a texture source in [`RasterBackend::draw_framebuffer`] for as
/// long as the owning [`FramebufferHandle`] is alive.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FramebufferId(pub u32);

impl fmt::Debug for FramebufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FramebufferId({})", self.0)
    }
}

/// Owner of one GPU render target + sampleable texture pair.
///
/// A handle has fixed pixel dimensions and records the device scale and draw
/// scale in effect when its content was rendered (layer cache validity
/// depends on both). It is never resized in place; a size change requires
/// destroy + recreate. Release consumes the handle, so a framebuffer is
/// released exactly once by construction.
#[derive(Debug)]
pub struct FramebufferHandle {
    id: FramebufferId,
    width: u32,
    height: u32,
    scale: f64,
    draw_scale: f64,
}

impl FramebufferHandle {
    /// Wraps a backend-created framebuffer id.
    #[must_use]
    pub(crate) fn new(id: FramebufferId, width: u32, height: u32, scale: f64, draw_scale: f64) -> Self {
        Self {
            id,
            width,
            height,
            scale,
            draw_scale,
        }
    }

    /// The framebuffer's identity, usable as a texture source.
    #[inline]
    #[must_use]
    pub fn id(&self) -> FramebufferId {
        self.id
    }

    /// Width in pixels.
    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Device pixel scale recorded at creation.
    #[inline]
    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Draw (UI stretch) scale recorded at creation.
    #[inline]
    #[must_use]
    pub fn draw_scale(&self) -> f64 {
        self.draw_scale
    }

    /// Consumes the handle, yielding the id for deletion.
    #[must_use]
    pub(crate) fn into_id(self) -> FramebufferId {
        self.id
    }
}

/// The draw target bound by [`RasterBackend::bind_framebuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// An offscreen framebuffer.
    Framebuffer(FramebufferId),
    /// The default/screen target (window surface back buffer).
    Screen,
}

/// A straight-alpha RGBA color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    /// Red, 0.0–1.0.
    pub r: f32,
    /// Green, 0.0–1.0.
    pub g: f32,
    /// Blue, 0.0–1.0.
    pub b: f32,
    /// Alpha, 0.0–1.0.
    pub a: f32,
}

impl Color {
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self::rgba(0.0, 0.0, 0.0, 0.0);
    /// Opaque black.
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);
    /// Opaque white.
    pub const WHITE: Self = Self::rgba(1.0, 1.0, 1.0, 1.0);

    /// Creates a color from components.
    #[must_use]
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a color from 8-bit components.
    #[must_use]
    pub fn rgb8(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
            1.0,
        )
    }
}

/// Compositing operator for [`RasterBackend::draw_framebuffer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Standard source-over alpha compositing.
    #[default]
    SourceOver,
    /// Multiply blend.
    Multiply,
    /// Screen blend.
    Screen,
}

/// A blend operator plus a normalized opacity weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blend {
    /// Compositing operator.
    pub mode: BlendMode,
    /// Opacity weight, clamped to 0.0–1.0.
    pub weight: f32,
}

impl Blend {
    /// Creates a blend, clamping `weight` into 0.0–1.0.
    #[must_use]
    pub fn new(mode: BlendMode, weight: f32) -> Self {
        Self {
            mode,
            weight: weight.clamp(0.0, 1.0),
        }
    }
}

impl Default for Blend {
    /// Source-over at full opacity.
    fn default() -> Self {
        Self {
            mode: BlendMode::SourceOver,
            weight: 1.0,
        }
    }
}

/// Capability interface implemented once per GPU API.
///
/// The frame renderer and compositor depend only on this trait. See the
/// [module docs](self) for the call discipline; backends may `debug_assert!`
/// it but should not need to defend against violations.
pub trait RasterBackend {
    /// Allocates a framebuffer (render target + sampleable texture) of the
    /// given pixel dimensions.
    ///
    /// # Errors
    ///
    /// [`BackendError::OutOfDeviceMemory`] when the device reports resource
    /// exhaustion, [`BackendError::Backend`] for any other native failure.
    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<FramebufferId, BackendError>;

    /// Frees a framebuffer.
    ///
    /// Never called for a framebuffer referenced by a frame that has begun
    /// and not yet ended; the core defers such requests until after the
    /// frame's final composite.
    fn delete_framebuffer(&mut self, id: FramebufferId);

    /// Makes `target` the current draw target. Only called between frames.
    fn bind_framebuffer(&mut self, target: RenderTarget);

    /// Begins a frame scoped to the current target.
    ///
    /// `width`/`height` are the target's dimensions in the frame's
    /// coordinate units and `scale` the ratio of pixels per unit. The core
    /// always passes pixel dimensions with a scale of 1.0 and expresses
    /// layout mapping via [`set_transform`](Self::set_transform).
    ///
    /// Beginning a frame must preserve the target's existing contents;
    /// clearing is explicit via [`clear`](Self::clear). Retained targets
    /// (the main framebuffer, reopened layer bitmaps) depend on this.
    fn begin_frame(&mut self, width: f64, height: f64, scale: f64);

    /// Ends the current frame, flushing all recorded drawing to the target.
    fn end_frame(&mut self);

    /// Sets the layout-to-pixel mapping for subsequent draw calls:
    /// `p_px = (p - origin) * scale`.
    fn set_transform(&mut self, scale: f64, origin: Point);

    /// Intersects the scissor region with `rect` (in current transform
    /// coordinates). The scissor resets at `begin_frame`.
    fn intersect_scissor(&mut self, rect: Rect);

    /// Clears the current scissor region (or the whole target if no scissor
    /// is set) to `color`, ignoring blending.
    fn clear(&mut self, color: Color);

    /// Fills `rect` (in current transform coordinates) with `color`.
    fn fill_rect(&mut self, rect: Rect, color: Color);

    /// Draws a rectangle of `src`'s texture into the current target.
    ///
    /// `src_offset` is the top-left of the sampled region in source pixels;
    /// `dest` is the destination rect in current transform coordinates. The
    /// sampled region has `dest`'s pixel dimensions.
    fn draw_framebuffer(&mut self, src: FramebufferId, src_offset: Point, dest: Rect, blend: Blend);

    /// Presents the most recently ended [`RenderTarget::Screen`] frame.
    fn present(&mut self);
}

/// Deferred framebuffer-destroy queue.
///
/// Destroying a GPU resource while a frame that references it is being
/// rendered corrupts that frame, so destroy requests raised mid-frame (or
/// from a thread without backend access) are queued here and drained exactly
/// once, immediately after the frame's final composite. Cloning is cheap and
/// aliases one queue.
#[derive(Clone, Debug, Default)]
pub struct DestroyQueue {
    pending: Arc<Mutex<Vec<FramebufferId>>>,
}

impl DestroyQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a framebuffer for destruction at the end of the current (or
    /// next) frame. Safe to call from any thread.
    pub fn push(&self, id: FramebufferId) {
        self.pending.lock().push(id);
    }

    /// Returns whether the queue holds no pending destroys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Takes all pending ids. Called by the renderer with backend access.
    #[must_use]
    pub(crate) fn drain(&self) -> Vec<FramebufferId> {
        std::mem::take(&mut *self.pending.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_clamps_weight() {
        assert_eq!(Blend::new(BlendMode::SourceOver, 2.0).weight, 1.0);
        assert_eq!(Blend::new(BlendMode::SourceOver, -1.0).weight, 0.0);
        assert_eq!(Blend::new(BlendMode::Multiply, 0.25).weight, 0.25);
    }

    #[test]
    fn default_blend_is_source_over_full() {
        let blend = Blend::default();
        assert_eq!(blend.mode, BlendMode::SourceOver);
        assert_eq!(blend.weight, 1.0);
    }

    #[test]
    fn destroy_queue_drains_in_push_order() {
        let queue = DestroyQueue::new();
        queue.push(FramebufferId(3));
        queue.push(FramebufferId(1));
        assert!(!queue.is_empty());
        assert_eq!(queue.drain(), vec![FramebufferId(3), FramebufferId(1)]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn destroy_queue_clones_alias() {
        let a = DestroyQueue::new();
        let b = a.clone();
        b.push(FramebufferId(7));
        assert_eq!(a.drain(), vec![FramebufferId(7)]);
    }

    #[test]
    fn color_from_8bit() {
        let c = Color::rgb8(255, 0, 127);
        assert_eq!(c.r, 1.0);
        assert_eq!(c.g, 0.0);
        assert!((c.b - 0.498).abs() < 1e-3);
        assert_eq!(c.a, 1.0);
    }
}
