// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Capability traits for drawable nodes.
//!
//! The host toolkit's widget hierarchy stays outside this crate; what the
//! engine needs from a drawable is expressed as a small closed set of
//! capabilities, composed rather than inherited:
//!
//! - [`Scene`] — the paint entry point of the whole drawable tree, plus the
//!   one-time context-created hook.
//! - [`DrawNode`] — anything that can emit draw commands, split into a
//!   cacheable part (stable across frames) and a dynamic part (redrawn
//!   every frame).
//! - [`CacheableNode`] — a node that additionally owns a [`Layer`] slot so
//!   its cacheable part can be rendered once and reused.
//!
//! Nodes draw in layout coordinates; [`PaintCtx`] owns the layout-to-pixel
//! mapping for whatever target is current.
//!
//! [`PaintCtx`]: crate::renderer::PaintCtx

use kurbo::Rect;

use crate::backend::{Blend, RasterBackend};
use crate::layer::Layer;
use crate::renderer::PaintCtx;

/// The drawable tree as seen by the frame renderer.
pub trait Scene<B: RasterBackend> {
    /// Fired once, after GPU context creation and before the first paint.
    /// Collaborators use this to preload fonts and images.
    fn context_created(&mut self, backend: &mut B) {
        let _ = backend;
    }

    /// Paints the tree. Called with the draw target already bound and
    /// clipped to the frame's dirty bounds; may use layer caching via
    /// [`PaintCtx::paint_cached`].
    fn paint(&mut self, ctx: &mut PaintCtx<'_, B>);
}

/// A node that produces draw commands.
pub trait DrawNode<B: RasterBackend> {
    /// Current bounds in layout space. Must be non-empty to be drawn.
    fn bounds(&self) -> Rect;

    /// Blend used when this node's cached layer is composited.
    fn blend(&self) -> Blend {
        Blend::default()
    }

    /// Draws the content that is stable across frames.
    fn draw_cached(&mut self, ctx: &mut PaintCtx<'_, B>);

    /// Draws the content that changes every frame (animations, cursors,
    /// hover feedback). Drawn after the cached part regardless of whether
    /// the cache was reused.
    fn draw_dynamic(&mut self, ctx: &mut PaintCtx<'_, B>) {
        let _ = ctx;
    }
}

/// A [`DrawNode`] that owns a cached-layer slot.
///
/// The node owns its `Option<Layer>`; destroying the node drops the layer,
/// which releases the cached framebuffer through the deferred-destroy queue.
pub trait CacheableNode<B: RasterBackend>: DrawNode<B> {
    /// The layer slot. `None` until the first cached paint populates it.
    fn layer_mut(&mut self) -> &mut Option<Layer>;
}
