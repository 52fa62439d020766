// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for the frame loop.
//!
//! [`TraceSink`] has one method per frame-loop event, all defaulting to
//! no-ops, so implementing only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace`
//! feature is **off**, every `Tracer` method compiles to nothing (zero
//! overhead). When **on**, each method performs a single `Option` branch
//! before dispatching.
//!
//! Events after [`TickEvent`] belong to the tick that most recently fired;
//! sinks that need per-frame grouping key on the tick's `frame_index`.

use kurbo::Rect;

use crate::backend::FramebufferId;

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when the frame drive delivers a tick.
#[derive(Clone, Copy, Debug)]
pub struct TickEvent {
    /// Monotonic frame counter.
    pub frame_index: u64,
}

/// Emitted once, when the rasterizer context comes up.
#[derive(Clone, Copy, Debug)]
pub struct ContextEvent {
    /// View width in device pixels.
    pub width: u32,
    /// View height in device pixels.
    pub height: u32,
    /// Device pixel scale.
    pub scale: f64,
}

/// Emitted when a render pass begins (non-empty dirty region).
#[derive(Clone, Copy, Debug)]
pub struct RenderPassEvent {
    /// Dirty bounds in layout units.
    pub dirty: Rect,
    /// Device pixel scale in effect.
    pub scale: f64,
}

/// Emitted when the dirty rect is composited onto the main framebuffer.
#[derive(Clone, Copy, Debug)]
pub struct CompositeEvent {
    /// Composite destination in device pixels.
    pub dest: Rect,
}

/// Emitted when the main framebuffer is blitted to the screen.
#[derive(Clone, Copy, Debug)]
pub struct PresentEvent {
    /// View width in device pixels.
    pub width: u32,
    /// View height in device pixels.
    pub height: u32,
}

/// What happened to a cached layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerEventKind {
    /// Cache hit: the layer was composited without redrawing.
    Hit,
    /// Cache miss: the layer was (re-)rendered.
    Miss,
    /// Allocation failed; the node drew uncached into the parent target.
    Fallback,
}

/// Emitted by [`paint_cached`](crate::renderer::PaintCtx::paint_cached).
#[derive(Clone, Copy, Debug)]
pub struct LayerEvent {
    /// The owner node's bounds.
    pub rect: Rect,
    /// Hit, miss, or fallback.
    pub kind: LayerEventKind,
}

/// What happened to a framebuffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FramebufferEventKind {
    /// Created on the device.
    Created,
    /// Deleted on the device.
    Destroyed,
    /// Destruction requested mid-frame and deferred to end of frame.
    DestroyDeferred,
}

/// Emitted on framebuffer lifecycle transitions.
#[derive(Clone, Copy, Debug)]
pub struct FramebufferEvent {
    /// The framebuffer's identity.
    pub id: FramebufferId,
    /// Created, destroyed, or deferred.
    pub kind: FramebufferEventKind,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the frame loop.
///
/// All methods have default no-op implementations.
pub trait TraceSink {
    /// Called when a frame-drive tick is received.
    fn on_tick(&mut self, e: &TickEvent) {
        _ = e;
    }

    /// Called once when the rasterizer context is created.
    fn on_context_created(&mut self, e: &ContextEvent) {
        _ = e;
    }

    /// Called when a render pass begins.
    fn on_render_pass(&mut self, e: &RenderPassEvent) {
        _ = e;
    }

    /// Called when the dirty rect is composited to the main framebuffer.
    fn on_composite(&mut self, e: &CompositeEvent) {
        _ = e;
    }

    /// Called when the main framebuffer is presented to the screen.
    fn on_present(&mut self, e: &PresentEvent) {
        _ = e;
    }

    /// Called on layer cache hits, misses, and fallbacks.
    fn on_layer(&mut self, e: &LayerEvent) {
        _ = e;
    }

    /// Called on framebuffer lifecycle transitions.
    fn on_framebuffer(&mut self, e: &FramebufferEvent) {
        _ = e;
    }
}

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Reborrows this tracer for a shorter-lived consumer.
    #[inline]
    #[must_use]
    pub fn reborrow(&mut self) -> Tracer<'_> {
        #[cfg(feature = "trace")]
        {
            match &mut self.sink {
                Some(s) => Tracer::new(&mut **s),
                None => Tracer::none(),
            }
        }
        #[cfg(not(feature = "trace"))]
        {
            Tracer {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Emits a [`TickEvent`].
    #[inline]
    pub fn tick(&mut self, e: &TickEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_tick(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`ContextEvent`].
    #[inline]
    pub fn context_created(&mut self, e: &ContextEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_context_created(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`RenderPassEvent`].
    #[inline]
    pub fn render_pass(&mut self, e: &RenderPassEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_render_pass(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`CompositeEvent`].
    #[inline]
    pub fn composite(&mut self, e: &CompositeEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_composite(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PresentEvent`].
    #[inline]
    pub fn present(&mut self, e: &PresentEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_present(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`LayerEvent`].
    #[inline]
    pub fn layer(&mut self, e: &LayerEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_layer(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FramebufferEvent`].
    #[inline]
    pub fn framebuffer(&mut self, e: &FramebufferEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_framebuffer(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
