// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cached layers and the compositing stack.
//!
//! A *layer* binds a cached framebuffer to the screen-space rect of the
//! drawable node that requested caching. The node owns its layer (as
//! `Option<Layer>`) and hands it back to [`PaintCtx`] each frame; the layer
//! decides whether its cached pixels are still valid for the node's current
//! bounds and the current scales.
//!
//! # Lifecycle
//!
//! ```text
//! Uncached ──start_layer/end_layer──► Cached (valid)
//!     ▲                                   │ bounds or scale change
//!     │                                   ▼
//!     └────────── re-render ◄──────── Invalid
//! ```
//!
//! The terminal state is owner destruction: dropping a [`Layer`] routes its
//! framebuffer into the shared [`DestroyQueue`], so disposal is safe from
//! any thread and never deletes a GPU resource mid-frame.
//!
//! [`LayerStack`] is the strict LIFO of layers currently being rendered
//! into. The stack itself is pure bookkeeping; target binding and frame
//! bracketing live in [`PaintCtx`], which consults the stack for what is on
//! top.
//!
//! [`PaintCtx`]: crate::renderer::PaintCtx

use kurbo::Rect;

use crate::backend::{DestroyQueue, FramebufferHandle, FramebufferId};

/// A cached, GPU-resident rendering of a drawable sub-tree.
#[derive(Debug)]
pub struct Layer {
    bitmap: Option<FramebufferHandle>,
    rect: Rect,
    owner_bounds: Rect,
    invalid: bool,
    destroy: DestroyQueue,
}

impl Layer {
    pub(crate) fn new(
        bitmap: FramebufferHandle,
        rect: Rect,
        owner_bounds: Rect,
        destroy: DestroyQueue,
    ) -> Self {
        Self {
            bitmap: Some(bitmap),
            rect,
            owner_bounds,
            invalid: false,
            destroy,
        }
    }

    /// The aligned layout-space rect this layer represents in its parent.
    #[inline]
    #[must_use]
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Marks the cached content stale; the next [`check`](Self::check)
    /// reports a miss.
    pub fn invalidate(&mut self) {
        self.invalid = true;
    }

    /// Cache-validity test.
    ///
    /// Returns `true` (hit: skip redraw) iff the layer is not marked
    /// invalid, the owner's live bounds still match the snapshot taken when
    /// the layer was rendered, and both the device scale and draw scale
    /// match those recorded on the bitmap. Any mismatch first updates the
    /// snapshot and marks the layer invalid, then reports a miss — so a
    /// bounds change produces exactly one miss.
    #[must_use]
    pub fn check(&mut self, owner_bounds: Rect, scale: f64, draw_scale: f64) -> bool {
        if self.owner_bounds != owner_bounds {
            self.owner_bounds = owner_bounds;
            self.invalid = true;
        }
        let Some(bitmap) = &self.bitmap else {
            return false;
        };
        !self.invalid && bitmap.scale() == scale && bitmap.draw_scale() == draw_scale
    }

    /// The framebuffer id to sample when compositing this layer.
    #[must_use]
    pub(crate) fn image(&self) -> Option<FramebufferId> {
        self.bitmap.as_ref().map(FramebufferHandle::id)
    }

    pub(crate) fn bitmap(&self) -> Option<&FramebufferHandle> {
        self.bitmap.as_ref()
    }
}

impl Drop for Layer {
    fn drop(&mut self) {
        if let Some(bitmap) = self.bitmap.take() {
            self.destroy.push(bitmap.into_id());
        }
    }
}

/// Strict LIFO of layers currently being rendered into.
///
/// The implicit root target (the frame's invalid-area framebuffer, or a
/// layer bitmap for nested caching) sits beneath the bottom of the stack; at
/// most one GPU render target is bound at any time — whichever is on top, or
/// the root when the stack is empty.
#[derive(Debug, Default)]
pub struct LayerStack {
    stack: Vec<Layer>,
}

impl LayerStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a layer, making it the current draw target.
    pub(crate) fn push(&mut self, layer: Layer) {
        self.stack.push(layer);
    }

    /// Pops the top layer.
    ///
    /// # Panics
    ///
    /// Panics if the stack is empty — an `end_layer` without a matching
    /// `start_layer` is a programming error, not a runtime condition.
    pub(crate) fn pop(&mut self) -> Layer {
        self.stack
            .pop()
            .expect("end_layer without matching start_layer")
    }

    /// The layer currently on top, if any.
    #[must_use]
    pub(crate) fn top(&self) -> Option<&Layer> {
        self.stack.last()
    }

    /// Returns whether no layer is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FramebufferHandle;

    fn handle(id: u32, scale: f64, draw_scale: f64) -> FramebufferHandle {
        FramebufferHandle::new(FramebufferId(id), 100, 100, scale, draw_scale)
    }

    fn layer(queue: &DestroyQueue) -> Layer {
        let bounds = Rect::new(0.0, 0.0, 50.0, 50.0);
        Layer::new(handle(1, 2.0, 1.0), bounds, bounds, queue.clone())
    }

    #[test]
    fn unchanged_bounds_hit_every_time() {
        let queue = DestroyQueue::new();
        let mut layer = layer(&queue);
        let bounds = Rect::new(0.0, 0.0, 50.0, 50.0);
        for _ in 0..10 {
            assert!(layer.check(bounds, 2.0, 1.0));
        }
    }

    #[test]
    fn bounds_change_misses_exactly_once() {
        let queue = DestroyQueue::new();
        let mut layer = layer(&queue);
        let grown = Rect::new(0.0, 0.0, 60.0, 50.0);
        // First check after the change: miss, snapshot updated.
        assert!(!layer.check(grown, 2.0, 1.0));
        // The layer stays invalid until re-rendered, but the snapshot no
        // longer differs; callers re-render on the first miss.
        assert!(!layer.check(grown, 2.0, 1.0));
    }

    #[test]
    fn scale_change_misses() {
        let queue = DestroyQueue::new();
        let mut layer = layer(&queue);
        let bounds = Rect::new(0.0, 0.0, 50.0, 50.0);
        assert!(layer.check(bounds, 2.0, 1.0));
        assert!(!layer.check(bounds, 1.0, 1.0), "device scale changed");
        assert!(!layer.check(bounds, 2.0, 1.5), "draw scale changed");
    }

    #[test]
    fn invalidate_forces_miss() {
        let queue = DestroyQueue::new();
        let mut layer = layer(&queue);
        let bounds = Rect::new(0.0, 0.0, 50.0, 50.0);
        assert!(layer.check(bounds, 2.0, 1.0));
        layer.invalidate();
        assert!(!layer.check(bounds, 2.0, 1.0));
    }

    #[test]
    fn drop_routes_bitmap_to_destroy_queue() {
        let queue = DestroyQueue::new();
        drop(layer(&queue));
        assert_eq!(queue.drain(), vec![FramebufferId(1)]);
    }

    #[test]
    fn stack_is_lifo() {
        let queue = DestroyQueue::new();
        let mut stack = LayerStack::new();
        assert!(stack.is_empty());

        let bounds = Rect::new(0.0, 0.0, 10.0, 10.0);
        stack.push(Layer::new(handle(1, 1.0, 1.0), bounds, bounds, queue.clone()));
        stack.push(Layer::new(handle(2, 1.0, 1.0), bounds, bounds, queue.clone()));
        assert_eq!(stack.depth(), 2);

        assert_eq!(stack.pop().image(), Some(FramebufferId(2)));
        assert_eq!(stack.top().and_then(Layer::image), Some(FramebufferId(1)));
        assert_eq!(stack.pop().image(), Some(FramebufferId(1)));
        assert!(stack.is_empty());
    }

    #[test]
    #[should_panic(expected = "end_layer without matching start_layer")]
    fn pop_on_empty_stack_panics() {
        let mut stack = LayerStack::new();
        let _ = stack.pop();
    }
}
