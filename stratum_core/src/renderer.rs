// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame rendering: one consistent screen image per pass.
//!
//! [`FrameRenderer`] owns the rasterizer backend and the two persistent
//! framebuffers of the incremental-repaint scheme:
//!
//! - the **invalid-area** framebuffer, which each pass repaints only inside
//!   the current dirty bounds, and
//! - the **main** framebuffer, which retains the last fully composited view
//!   and receives an unconditional copy of exactly the dirty rectangle.
//!
//! Drawing the dirty rect into a scratch target and compositing it over is
//! what keeps the already-valid pixels of the main framebuffer untouched
//! without re-running their draw commands; the screen blit then sources the
//! main framebuffer wholesale on the next refresh signal.
//!
//! ```text
//! invalidate(rect)           drive tick                  refresh signal
//!       │                        │                             │
//!       ▼                        ▼                             ▼
//!  DirtyRegion ──bounds──► paint into invalid-area ──► composite dirty rect
//!                          framebuffer (scissored)     onto main ──► blit
//!                                                      main to screen
//! ```
//!
//! The context is created lazily on the first paint after the view is
//! visible with nonzero size; failures postpone initialization and are
//! retried on the next paint request. [`PaintCtx`] is the painting surface
//! handed to the scene: it exposes the backend for drawing and the layer
//! stack for cached sub-trees.

use kurbo::{Point, Rect};

use crate::backend::{
    Blend, Color, DestroyQueue, FramebufferHandle, FramebufferId, RasterBackend, RenderTarget,
};
use crate::dirty::SharedDirtyRegion;
use crate::error::BackendError;
use crate::geometry;
use crate::layer::{Layer, LayerStack};
use crate::node::{CacheableNode, DrawNode, Scene};
use crate::trace::{
    CompositeEvent, ContextEvent, FramebufferEvent, FramebufferEventKind, LayerEvent,
    LayerEventKind, PresentEvent, RenderPassEvent, Tracer,
};

/// Geometry of the native view the engine renders into.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewMetrics {
    /// View width in layout units.
    pub width: f64,
    /// View height in layout units.
    pub height: f64,
    /// Device pixel scale (≥ 1.0; e.g. 2.0 on high-density displays).
    pub scale: f64,
    /// Draw scale: deviation from the default size when the whole UI is
    /// stretched (1.0 unless the host scales its window contents).
    pub draw_scale: f64,
}

impl Default for ViewMetrics {
    fn default() -> Self {
        Self {
            width: 0.0,
            height: 0.0,
            scale: 1.0,
            draw_scale: 1.0,
        }
    }
}

impl ViewMetrics {
    /// Creates metrics with a draw scale of 1.0.
    #[must_use]
    pub fn new(width: f64, height: f64, scale: f64) -> Self {
        Self {
            width,
            height,
            scale,
            draw_scale: 1.0,
        }
    }

    /// Whether the view is ready to render into (nonzero size, sane scale).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.scale >= 1.0
    }

    /// The view bounds in layout units.
    #[must_use]
    pub fn layout_rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }

    /// The view bounds in device pixels.
    #[must_use]
    pub fn device_rect(&self) -> Rect {
        let (w, h) = self.device_size();
        Rect::new(0.0, 0.0, f64::from(w), f64::from(h))
    }

    /// The view dimensions in device pixels.
    #[must_use]
    pub fn device_size(&self) -> (u32, u32) {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "ceil of a positive view dimension; far below u32::MAX for any real display"
        )]
        let (w, h) = (
            (self.width * self.scale).ceil() as u32,
            (self.height * self.scale).ceil() as u32,
        );
        (w, h)
    }
}

/// Parameters of the root (non-layer) pass in progress, so the layer stack
/// can rebind it after the last `end_layer`.
#[derive(Clone, Copy, Debug)]
struct RootPass {
    target: FramebufferId,
    width: u32,
    height: u32,
    scale: f64,
    scissor: Option<Rect>,
}

/// Live GPU state: backend plus the renderer-owned framebuffers.
struct GpuContext<B: RasterBackend> {
    backend: B,
    main_fbo: FramebufferHandle,
    invalid_fbo: Option<FramebufferHandle>,
    stack: LayerStack,
    destroy: DestroyQueue,
    /// True strictly between the paint pass's `begin_frame` and the end of
    /// the composite onto the main framebuffer. Gates whether a framebuffer
    /// destroy executes immediately or is deferred.
    in_draw: bool,
    root: Option<RootPass>,
}

impl<B: RasterBackend> GpuContext<B> {
    fn create_handle(
        &mut self,
        width: u32,
        height: u32,
        scale: f64,
        draw_scale: f64,
        tracer: &mut Tracer<'_>,
    ) -> Result<FramebufferHandle, BackendError> {
        let id = self.backend.create_framebuffer(width, height)?;
        tracer.framebuffer(&FramebufferEvent {
            id,
            kind: FramebufferEventKind::Created,
        });
        Ok(FramebufferHandle::new(id, width, height, scale, draw_scale))
    }

    /// Releases a framebuffer: immediately when no frame is in progress,
    /// deferred to end-of-frame otherwise.
    fn release(&mut self, handle: FramebufferHandle, tracer: &mut Tracer<'_>) {
        let id = handle.into_id();
        if self.in_draw {
            self.destroy.push(id);
            tracer.framebuffer(&FramebufferEvent {
                id,
                kind: FramebufferEventKind::DestroyDeferred,
            });
        } else {
            self.backend.delete_framebuffer(id);
            tracer.framebuffer(&FramebufferEvent {
                id,
                kind: FramebufferEventKind::Destroyed,
            });
        }
    }

    /// Drains the deferred-destroy queue. Called exactly once per frame,
    /// immediately after the final composite, and again at shutdown.
    fn flush_destroys(&mut self, tracer: &mut Tracer<'_>) {
        for id in self.destroy.drain() {
            self.backend.delete_framebuffer(id);
            tracer.framebuffer(&FramebufferEvent {
                id,
                kind: FramebufferEventKind::Destroyed,
            });
        }
    }

    /// Binds whatever is now the current draw target (top of the layer
    /// stack, or the root pass) and opens a frame on it.
    ///
    /// `clear_top` is set only when a freshly pushed layer needs its bitmap
    /// cleared; popping back to a parent must preserve partial content.
    fn bind_top(&mut self, clear_top: bool) {
        if let Some(layer) = self.stack.top() {
            let bitmap = layer.bitmap().expect("active layer owns its bitmap");
            self.backend
                .bind_framebuffer(RenderTarget::Framebuffer(bitmap.id()));
            self.backend
                .begin_frame(f64::from(bitmap.width()), f64::from(bitmap.height()), 1.0);
            self.backend
                .set_transform(bitmap.scale(), layer.rect().origin());
            if clear_top {
                self.backend.clear(Color::TRANSPARENT);
            }
        } else {
            let root = self
                .root
                .expect("layer stack rebind outside an active render pass");
            self.backend
                .bind_framebuffer(RenderTarget::Framebuffer(root.target));
            self.backend
                .begin_frame(f64::from(root.width), f64::from(root.height), 1.0);
            self.backend.set_transform(root.scale, Point::ZERO);
            if let Some(scissor) = root.scissor {
                self.backend.intersect_scissor(scissor);
            }
        }
    }
}

/// The painting surface handed to [`Scene::paint`] and node draw methods.
///
/// Draw calls are in layout coordinates; the context owns the layout-to-
/// pixel mapping for whichever target is current (the invalid-area
/// framebuffer, or a layer bitmap while one is started).
pub struct PaintCtx<'a, B: RasterBackend> {
    gpu: &'a mut GpuContext<B>,
    metrics: ViewMetrics,
    tracer: Tracer<'a>,
}

impl<B: RasterBackend> core::fmt::Debug for PaintCtx<'_, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PaintCtx")
            .field("metrics", &self.metrics)
            .field("depth", &self.gpu.stack.depth())
            .finish_non_exhaustive()
    }
}

impl<B: RasterBackend> PaintCtx<'_, B> {
    /// The view geometry for this frame.
    #[must_use]
    pub fn metrics(&self) -> ViewMetrics {
        self.metrics
    }

    /// Direct access to the rasterizer for emitting draw commands.
    pub fn raster(&mut self) -> &mut B {
        &mut self.gpu.backend
    }

    /// Current layer nesting depth (0 = drawing into the frame's root
    /// target).
    #[must_use]
    pub fn layer_depth(&self) -> usize {
        self.gpu.stack.depth()
    }

    /// Redirects drawing into a fresh layer covering `owner_bounds`.
    ///
    /// Allocates a framebuffer sized from the aligned bounds and the device
    /// scale, pushes it on the layer stack, and opens a 1:1 pixel frame on
    /// it (the bitmap is already device-pixel sized). Draw calls continue
    /// to use layout coordinates.
    ///
    /// # Errors
    ///
    /// [`BackendError::OutOfDeviceMemory`] (or another backend failure) if
    /// the framebuffer cannot be allocated. The parent target is restored
    /// before returning, so the caller **must** fall back to drawing
    /// uncached into it.
    pub fn start_layer(&mut self, owner_bounds: Rect) -> Result<(), BackendError> {
        let scale = self.metrics.scale;
        let Some((width, height)) = geometry::pixel_size(owner_bounds, scale) else {
            return Err(BackendError::backend("cannot start a layer on an empty rect"));
        };
        let aligned = geometry::align_outward(owner_bounds);

        // The current target has a frame in progress; close it around the
        // allocation so the backend never sees a create mid-frame.
        self.gpu.backend.end_frame();
        let handle = match self.gpu.create_handle(
            width,
            height,
            scale,
            self.metrics.draw_scale,
            &mut self.tracer,
        ) {
            Ok(handle) => handle,
            Err(err) => {
                // Reopen the interrupted frame so the caller can draw
                // uncached into the parent target.
                self.gpu.bind_top(false);
                return Err(err);
            }
        };

        let layer = Layer::new(handle, aligned, owner_bounds, self.gpu.destroy.clone());
        self.gpu.stack.push(layer);
        self.gpu.bind_top(true);
        Ok(())
    }

    /// Ends the layer started by the matching [`start_layer`](Self::start_layer),
    /// restores the parent draw target, and returns the finished layer for
    /// the owner to keep.
    ///
    /// # Panics
    ///
    /// Panics if no layer is active.
    pub fn end_layer(&mut self) -> Layer {
        self.gpu.backend.end_frame();
        let layer = self.gpu.stack.pop();
        self.gpu.bind_top(false);
        layer
    }

    /// Composites a cached layer into the current target at the layer's
    /// recorded rect.
    pub fn draw_layer(&mut self, layer: &Layer, blend: Blend) {
        if let Some(image) = layer.image() {
            self.gpu
                .backend
                .draw_framebuffer(image, Point::ZERO, layer.rect(), blend);
        }
    }

    /// Draws a node without caching: cachable part, then dynamic part.
    pub fn paint(&mut self, node: &mut (impl DrawNode<B> + ?Sized)) {
        node.draw_cached(self);
        node.draw_dynamic(self);
    }

    /// Draws a node through its cached layer.
    ///
    /// On a cache hit the stored layer is composited without invoking
    /// `draw_cached`. On a miss the cachable content is re-rendered into a
    /// fresh layer first. If layer allocation fails, the node is drawn
    /// uncached into the current target instead (and keeps no layer). The
    /// dynamic part is drawn every frame regardless.
    pub fn paint_cached(&mut self, node: &mut (impl CacheableNode<B> + ?Sized)) {
        let bounds = node.bounds();
        if geometry::is_empty(bounds) {
            return;
        }
        let (scale, draw_scale) = (self.metrics.scale, self.metrics.draw_scale);

        let mut layer = node.layer_mut().take();
        let hit = layer
            .as_mut()
            .is_some_and(|l| l.check(bounds, scale, draw_scale));

        if hit {
            self.tracer.layer(&LayerEvent {
                rect: bounds,
                kind: LayerEventKind::Hit,
            });
        } else {
            // Dropping the stale layer routes its bitmap into the deferred
            // destroy queue; we are mid-frame, so it stays alive until the
            // composite completes.
            layer = None;
            match self.start_layer(bounds) {
                Ok(()) => {
                    self.tracer.layer(&LayerEvent {
                        rect: bounds,
                        kind: LayerEventKind::Miss,
                    });
                    node.draw_cached(self);
                    layer = Some(self.end_layer());
                }
                Err(err) => {
                    log::warn!("layer allocation for {bounds:?} failed: {err}; drawing uncached");
                    self.tracer.layer(&LayerEvent {
                        rect: bounds,
                        kind: LayerEventKind::Fallback,
                    });
                    node.draw_cached(self);
                    node.draw_dynamic(self);
                    return;
                }
            }
        }

        let blend = node.blend();
        if let Some(layer) = &layer {
            self.draw_layer(layer, blend);
        }
        *node.layer_mut() = layer;
        node.draw_dynamic(self);
    }
}

/// Orchestrates one frame: dirty-clipped paint, composite, and the
/// vsync-gated screen blit.
pub struct FrameRenderer<B: RasterBackend> {
    factory: Box<dyn FnMut(&ViewMetrics) -> Result<B, BackendError> + Send>,
    gpu: Option<GpuContext<B>>,
    metrics: ViewMetrics,
    dirty: SharedDirtyRegion,
    destroy: DestroyQueue,
    needs_repaint: bool,
}

impl<B: RasterBackend> core::fmt::Debug for FrameRenderer<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameRenderer")
            .field("metrics", &self.metrics)
            .field("initialized", &self.gpu.is_some())
            .field("needs_repaint", &self.needs_repaint)
            .finish_non_exhaustive()
    }
}

impl<B: RasterBackend> FrameRenderer<B> {
    /// Creates a renderer that will build its backend with `factory` on the
    /// first paint after the view is ready.
    #[must_use]
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut(&ViewMetrics) -> Result<B, BackendError> + Send + 'static,
    {
        Self {
            factory: Box::new(factory),
            gpu: None,
            metrics: ViewMetrics::default(),
            dirty: SharedDirtyRegion::new(),
            destroy: DestroyQueue::new(),
            needs_repaint: false,
        }
    }

    /// Handle for invalidating regions from any thread.
    #[must_use]
    pub fn dirty_region(&self) -> SharedDirtyRegion {
        self.dirty.clone()
    }

    /// Current view geometry.
    #[must_use]
    pub fn metrics(&self) -> ViewMetrics {
        self.metrics
    }

    /// Whether the rasterizer context exists yet.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.gpu.is_some()
    }

    /// Whether a composited frame is waiting for the next refresh signal.
    #[must_use]
    pub fn needs_repaint(&self) -> bool {
        self.needs_repaint
    }

    /// Updates the view geometry.
    ///
    /// With a live context this recreates the main framebuffer at the new
    /// device-pixel size, drops the invalid-area framebuffer for lazy
    /// recreation, and marks everything dirty. Must be called on the render
    /// thread (marshal via the frame loop from elsewhere).
    pub fn set_view(&mut self, metrics: ViewMetrics) {
        if metrics == self.metrics {
            return;
        }
        self.metrics = metrics;

        let Some(gpu) = &mut self.gpu else {
            return;
        };
        if !metrics.is_ready() {
            return;
        }

        let mut tracer = Tracer::none();
        let (width, height) = metrics.device_size();
        let mut failed = false;
        match gpu.create_handle(width, height, metrics.scale, metrics.draw_scale, &mut tracer) {
            Ok(new_main) => {
                let old = std::mem::replace(&mut gpu.main_fbo, new_main);
                gpu.release(old, &mut tracer);
            }
            Err(err) => {
                log::warn!("main framebuffer reallocation failed: {err}; reinitializing context");
                failed = true;
            }
        }
        if let Some(old) = gpu.invalid_fbo.take() {
            gpu.release(old, &mut tracer);
        }
        if failed {
            self.shutdown();
        }

        // The retained image is gone either way; nothing valid to present
        // until the next full pass.
        self.dirty.add_all();
        self.needs_repaint = false;
    }

    /// Runs one render pass: paints the dirty bounds into the invalid-area
    /// framebuffer and composites them onto the main framebuffer.
    ///
    /// A pass with nothing dirty performs zero GPU work. A pass that cannot
    /// proceed (zero-size view, context creation failure) is deferred to
    /// the next drive tick.
    pub fn render<S: Scene<B>>(&mut self, scene: &mut S, tracer: &mut Tracer<'_>) {
        if self.gpu.is_none() && !self.try_init(scene, tracer) {
            return;
        }

        let taken = self.dirty.take();
        let Some(bounds) = taken.bounds(self.metrics.layout_rect()) else {
            return;
        };
        let dirty_px = geometry::intersect(
            geometry::align_outward(geometry::scale(bounds, self.metrics.scale)),
            self.metrics.device_rect(),
        );
        if geometry::is_empty(dirty_px) {
            return;
        }

        let (dev_w, dev_h) = self.metrics.device_size();
        let gpu = self.gpu.as_mut().expect("context initialized above");

        // The invalid-area framebuffer is reused across frames; (re)allocate
        // only when absent or stale after a resize.
        if gpu
            .invalid_fbo
            .as_ref()
            .is_some_and(|f| f.width() != dev_w || f.height() != dev_h)
        {
            let old = gpu.invalid_fbo.take().expect("checked above");
            gpu.release(old, tracer);
        }
        if gpu.invalid_fbo.is_none() {
            match gpu.create_handle(
                dev_w,
                dev_h,
                self.metrics.scale,
                self.metrics.draw_scale,
                tracer,
            ) {
                Ok(handle) => gpu.invalid_fbo = Some(handle),
                Err(err) => {
                    log::warn!("invalid-area framebuffer allocation failed: {err}; deferring frame");
                    self.dirty.restore(&taken);
                    return;
                }
            }
        }
        let invalid_id = gpu.invalid_fbo.as_ref().expect("just ensured").id();
        let main_id = gpu.main_fbo.id();

        tracer.render_pass(&RenderPassEvent {
            dirty: bounds,
            scale: self.metrics.scale,
        });

        // Paint pass: scene draws in layout units, scissored to the dirty
        // bounds, into the invalid-area framebuffer.
        gpu.in_draw = true;
        gpu.root = Some(RootPass {
            target: invalid_id,
            width: dev_w,
            height: dev_h,
            scale: self.metrics.scale,
            scissor: Some(bounds),
        });
        gpu.bind_top(false);
        gpu.backend.clear(Color::TRANSPARENT);
        {
            let mut ctx = PaintCtx {
                gpu: &mut *gpu,
                metrics: self.metrics,
                tracer: tracer.reborrow(),
            };
            scene.paint(&mut ctx);
        }
        assert!(
            gpu.stack.is_empty(),
            "unbalanced start_layer/end_layer in scene paint"
        );
        gpu.backend.end_frame();
        gpu.root = None;

        // Composite: copy exactly the dirty rectangle onto the retained
        // main framebuffer; everything outside it stays untouched.
        gpu.backend
            .bind_framebuffer(RenderTarget::Framebuffer(main_id));
        gpu.backend
            .begin_frame(f64::from(dev_w), f64::from(dev_h), 1.0);
        gpu.backend.set_transform(1.0, Point::ZERO);
        gpu.backend
            .draw_framebuffer(invalid_id, dirty_px.origin(), dirty_px, Blend::default());
        gpu.backend.end_frame();
        gpu.in_draw = false;
        tracer.composite(&CompositeEvent { dest: dirty_px });

        // The once-per-frame flush of deferred destroys.
        gpu.flush_destroys(tracer);

        self.needs_repaint = true;
    }

    /// Blits the main framebuffer to the screen if a composited frame is
    /// pending. Called on the display-refresh signal.
    pub fn present(&mut self, tracer: &mut Tracer<'_>) {
        if !self.needs_repaint {
            return;
        }
        let Some(gpu) = &mut self.gpu else {
            return;
        };
        if !self.metrics.is_ready() {
            return;
        }
        let (dev_w, dev_h) = self.metrics.device_size();

        gpu.backend.bind_framebuffer(RenderTarget::Screen);
        gpu.backend
            .begin_frame(f64::from(dev_w), f64::from(dev_h), 1.0);
        gpu.backend.set_transform(1.0, Point::ZERO);
        gpu.backend.draw_framebuffer(
            gpu.main_fbo.id(),
            Point::ZERO,
            self.metrics.device_rect(),
            Blend::default(),
        );
        gpu.backend.end_frame();
        gpu.backend.present();
        self.needs_repaint = false;
        tracer.present(&PresentEvent {
            width: dev_w,
            height: dev_h,
        });
    }

    /// Tears down the GPU context, deleting every framebuffer the renderer
    /// still owns. The renderer can be reused; the next paint re-initializes.
    pub fn shutdown(&mut self) {
        let Some(gpu) = self.gpu.take() else {
            return;
        };
        debug_assert!(!gpu.in_draw, "shutdown during an active frame");
        let GpuContext {
            mut backend,
            main_fbo,
            invalid_fbo,
            destroy,
            ..
        } = gpu;
        for id in destroy.drain() {
            backend.delete_framebuffer(id);
        }
        if let Some(fbo) = invalid_fbo {
            backend.delete_framebuffer(fbo.into_id());
        }
        backend.delete_framebuffer(main_fbo.into_id());
        self.needs_repaint = false;
    }

    fn try_init<S: Scene<B>>(&mut self, scene: &mut S, tracer: &mut Tracer<'_>) -> bool {
        if !self.metrics.is_ready() {
            log::debug!("view not ready ({:?}); deferring initialization", self.metrics);
            return false;
        }
        let mut backend = match (self.factory)(&self.metrics) {
            Ok(backend) => backend,
            Err(err) => {
                log::warn!("rasterizer context creation failed: {err}; will retry on next paint");
                return false;
            }
        };
        let (dev_w, dev_h) = self.metrics.device_size();
        let main_id = match backend.create_framebuffer(dev_w, dev_h) {
            Ok(id) => id,
            Err(err) => {
                log::warn!("main framebuffer allocation failed: {err}; will retry on next paint");
                return false;
            }
        };
        tracer.framebuffer(&FramebufferEvent {
            id: main_id,
            kind: FramebufferEventKind::Created,
        });

        let mut gpu = GpuContext {
            backend,
            main_fbo: FramebufferHandle::new(
                main_id,
                dev_w,
                dev_h,
                self.metrics.scale,
                self.metrics.draw_scale,
            ),
            invalid_fbo: None,
            stack: LayerStack::new(),
            destroy: self.destroy.clone(),
            in_draw: false,
            root: None,
        };

        scene.context_created(&mut gpu.backend);
        tracer.context_created(&ContextEvent {
            width: dev_w,
            height: dev_h,
            scale: self.metrics.scale,
        });
        log::debug!("rasterizer context created at {dev_w}x{dev_h} (scale {})", self.metrics.scale);

        self.gpu = Some(gpu);
        self.needs_repaint = false;
        // First pass paints the full bounds.
        self.dirty.add_all();
        true
    }
}

impl<B: RasterBackend> Drop for FrameRenderer<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Call, CallLog, FailSwitch, RecordingBackend};

    fn recording_renderer(
        log: &CallLog,
        fail: &FailSwitch,
    ) -> FrameRenderer<RecordingBackend> {
        let (log, fail) = (log.clone(), fail.clone());
        FrameRenderer::new(move |_metrics: &ViewMetrics| {
            Ok(RecordingBackend::new(log.clone(), fail.clone()))
        })
    }

    /// Scene that fills its whole bounds with a solid color.
    struct FillScene;

    impl Scene<RecordingBackend> for FillScene {
        fn paint(&mut self, ctx: &mut PaintCtx<'_, RecordingBackend>) {
            let bounds = ctx.metrics().layout_rect();
            ctx.raster().fill_rect(bounds, Color::WHITE);
        }
    }

    struct CachedNode {
        bounds: Rect,
        layer: Option<Layer>,
        cached_draws: u32,
        dynamic_draws: u32,
    }

    impl CachedNode {
        fn new(bounds: Rect) -> Self {
            Self {
                bounds,
                layer: None,
                cached_draws: 0,
                dynamic_draws: 0,
            }
        }
    }

    impl DrawNode<RecordingBackend> for CachedNode {
        fn bounds(&self) -> Rect {
            self.bounds
        }

        fn draw_cached(&mut self, ctx: &mut PaintCtx<'_, RecordingBackend>) {
            self.cached_draws += 1;
            let bounds = self.bounds;
            ctx.raster().fill_rect(bounds, Color::WHITE);
        }

        fn draw_dynamic(&mut self, _ctx: &mut PaintCtx<'_, RecordingBackend>) {
            self.dynamic_draws += 1;
        }
    }

    impl CacheableNode<RecordingBackend> for CachedNode {
        fn layer_mut(&mut self) -> &mut Option<Layer> {
            &mut self.layer
        }
    }

    struct CachedScene {
        node: CachedNode,
    }

    impl Scene<RecordingBackend> for CachedScene {
        fn paint(&mut self, ctx: &mut PaintCtx<'_, RecordingBackend>) {
            ctx.paint_cached(&mut self.node);
        }
    }

    /// Scene that nests two explicit layers and drops them mid-frame.
    struct NestingScene;

    impl Scene<RecordingBackend> for NestingScene {
        fn paint(&mut self, ctx: &mut PaintCtx<'_, RecordingBackend>) {
            ctx.start_layer(Rect::new(0.0, 0.0, 100.0, 100.0))
                .expect("outer layer");
            ctx.start_layer(Rect::new(10.0, 10.0, 50.0, 50.0))
                .expect("inner layer");
            let inner = ctx.end_layer();
            ctx.draw_layer(&inner, Blend::default());
            let outer = ctx.end_layer();
            ctx.draw_layer(&outer, Blend::default());
            // Both layers drop here, mid-frame.
        }
    }

    fn view() -> ViewMetrics {
        ViewMetrics::new(400.0, 300.0, 2.0)
    }

    fn binds(log: &CallLog) -> Vec<RenderTarget> {
        log.snapshot()
            .into_iter()
            .filter_map(|c| match c {
                Call::Bind(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn scenario_a_first_paint_creates_main_and_invalid_targets() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());

        renderer.render(&mut FillScene, &mut Tracer::none());

        // 400x300 at scale 2.0: exactly one 800x600 main framebuffer and
        // one 800x600 invalid-area framebuffer.
        assert_eq!(
            log.count(|c| matches!(
                c,
                Call::CreateFramebuffer {
                    width: 800,
                    height: 600,
                    ..
                }
            )),
            2,
            "main + invalid-area framebuffers"
        );
        assert_eq!(
            log.count(|c| matches!(c, Call::CreateFramebuffer { .. })),
            2,
            "no other framebuffers"
        );

        // One full-bounds dirty pass: scissor covers the whole device rect,
        // and the composite copies it onto the main framebuffer.
        assert_eq!(
            log.count(|c| *c == Call::Scissor {
                device: Rect::new(0.0, 0.0, 800.0, 600.0)
            }),
            1
        );
        assert_eq!(
            log.count(|c| *c
                == Call::DrawFramebuffer {
                    src: 1,
                    dest: Rect::new(0.0, 0.0, 800.0, 600.0),
                }),
            1
        );
    }

    #[test]
    fn no_gpu_work_when_nothing_is_dirty() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());

        renderer.render(&mut FillScene, &mut Tracer::none());
        renderer.present(&mut Tracer::none());
        let len = log.len();

        renderer.render(&mut FillScene, &mut Tracer::none());
        assert_eq!(log.len(), len, "zero binds and zero draws on empty dirt");
    }

    #[test]
    fn scenario_b_partial_invalidate_composites_the_scaled_rect() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());
        let dirty = renderer.dirty_region();

        renderer.render(&mut FillScene, &mut Tracer::none());
        renderer.present(&mut Tracer::none());
        log.clear();

        dirty.add(Rect::new(10.0, 10.0, 50.0, 50.0));
        renderer.render(&mut FillScene, &mut Tracer::none());

        // Draws into the invalid-area framebuffer are clipped to the dirty
        // rect, scaled by the device scale.
        assert_eq!(
            log.count(|c| *c == Call::Scissor {
                device: Rect::new(20.0, 20.0, 100.0, 100.0)
            }),
            1
        );
        // Exactly one composite, at the same scaled rect, onto main.
        assert_eq!(
            log.count(|c| *c
                == Call::DrawFramebuffer {
                    src: 1,
                    dest: Rect::new(20.0, 20.0, 100.0, 100.0),
                }),
            1
        );

        // The next refresh signal blits the full viewport exactly once.
        log.clear();
        renderer.present(&mut Tracer::none());
        assert_eq!(
            log.count(|c| *c
                == Call::DrawFramebuffer {
                    src: 0,
                    dest: Rect::new(0.0, 0.0, 800.0, 600.0),
                }),
            1
        );
        assert_eq!(log.count(|c| matches!(c, Call::Present)), 1);
    }

    #[test]
    fn scenario_c_cached_subtree_renders_once_across_ten_frames() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());
        let dirty = renderer.dirty_region();

        let mut scene = CachedScene {
            node: CachedNode::new(Rect::new(50.0, 50.0, 150.0, 150.0)),
        };

        for _ in 0..10 {
            dirty.add(Rect::new(0.0, 0.0, 20.0, 20.0));
            renderer.render(&mut scene, &mut Tracer::none());
            renderer.present(&mut Tracer::none());
        }

        assert_eq!(scene.node.cached_draws, 1, "cache populated once");
        assert_eq!(scene.node.dynamic_draws, 10, "dynamic part every frame");
        // The cached layer (id 2) is composited on every pass.
        assert_eq!(
            log.count(|c| matches!(c, Call::DrawFramebuffer { src: 2, .. })),
            10
        );
    }

    #[test]
    fn cache_miss_after_bounds_change_happens_exactly_once() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());
        let dirty = renderer.dirty_region();

        let mut scene = CachedScene {
            node: CachedNode::new(Rect::new(50.0, 50.0, 150.0, 150.0)),
        };
        renderer.render(&mut scene, &mut Tracer::none());
        assert_eq!(scene.node.cached_draws, 1);

        // Change the owner's bounds: the first following check misses and
        // re-renders; later frames hit again.
        scene.node.bounds = Rect::new(50.0, 50.0, 180.0, 150.0);
        for _ in 0..3 {
            dirty.add_all();
            renderer.render(&mut scene, &mut Tracer::none());
        }
        assert_eq!(scene.node.cached_draws, 2, "one re-render, then hits");
        assert_eq!(scene.node.dynamic_draws, 4);
    }

    #[test]
    fn nested_layers_restore_the_previous_target() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());

        renderer.render(&mut NestingScene, &mut Tracer::none());

        // Bind order: invalid-area root (1), outer layer (2), inner layer
        // (3), back to outer (2), back to root (1), then main (0) for the
        // composite. Every end_layer restores the target active before the
        // matching start_layer.
        let expected = [1, 2, 3, 2, 1, 0]
            .into_iter()
            .map(|id| RenderTarget::Framebuffer(FramebufferId(id)))
            .collect::<Vec<_>>();
        assert_eq!(binds(&log), expected);
    }

    #[test]
    fn mid_frame_layer_drops_defer_deletion_until_after_composite() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());

        renderer.render(&mut NestingScene, &mut Tracer::none());

        // Both layers (ids 2 and 3) dropped mid-frame; neither may be
        // deleted before the composite onto main, and each exactly once.
        let composite_at = log
            .position(|c| matches!(c, Call::DrawFramebuffer { src: 1, .. }))
            .expect("composite happened");
        for id in [2, 3] {
            let positions: Vec<_> = log
                .snapshot()
                .iter()
                .enumerate()
                .filter(|(_, c)| **c == Call::DeleteFramebuffer { id })
                .map(|(i, _)| i)
                .collect();
            assert_eq!(positions.len(), 1, "framebuffer {id} deleted exactly once");
            assert!(
                positions[0] > composite_at,
                "framebuffer {id} deleted only after the composite"
            );
        }
    }

    #[test]
    fn replaced_cache_layer_is_deleted_after_the_next_composite() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());
        let dirty = renderer.dirty_region();

        let mut scene = CachedScene {
            node: CachedNode::new(Rect::new(50.0, 50.0, 150.0, 150.0)),
        };
        renderer.render(&mut scene, &mut Tracer::none());
        log.clear();

        scene.node.bounds = Rect::new(50.0, 50.0, 180.0, 150.0);
        dirty.add_all();
        renderer.render(&mut scene, &mut Tracer::none());

        let composite_at = log
            .position(|c| matches!(c, Call::DrawFramebuffer { src: 1, .. }))
            .expect("composite happened");
        let delete_at = log
            .position(|c| *c == Call::DeleteFramebuffer { id: 2 })
            .expect("stale layer deleted");
        assert_eq!(
            log.count(|c| *c == Call::DeleteFramebuffer { id: 2 }),
            1,
            "stale layer framebuffer deleted exactly once"
        );
        assert!(delete_at > composite_at, "deletion deferred past composite");
    }

    #[test]
    fn failed_layer_allocation_falls_back_to_direct_drawing() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());
        let dirty = renderer.dirty_region();

        let mut scene = CachedScene {
            node: CachedNode::new(Rect::new(50.0, 50.0, 150.0, 150.0)),
        };
        renderer.render(&mut scene, &mut Tracer::none());
        assert!(scene.node.layer.is_some());

        // Invalidate the cache, then make allocations fail: the node must
        // still draw, uncached, into the parent target.
        scene.node.bounds = Rect::new(50.0, 50.0, 180.0, 150.0);
        fail.set(true);
        dirty.add_all();
        renderer.render(&mut scene, &mut Tracer::none());

        assert_eq!(scene.node.cached_draws, 2, "content drawn despite failure");
        assert_eq!(scene.node.dynamic_draws, 2);
        assert!(scene.node.layer.is_none(), "no layer kept on failure");
        // The frame still completed with its composite.
        assert_eq!(
            log.count(|c| matches!(c, Call::DrawFramebuffer { src: 1, .. })),
            2
        );

        // Allocations recover on the next frame.
        fail.set(false);
        dirty.add_all();
        renderer.render(&mut scene, &mut Tracer::none());
        assert!(scene.node.layer.is_some());
        assert_eq!(scene.node.cached_draws, 3);
    }

    #[test]
    fn context_creation_failure_retries_on_next_paint() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut attempts = 0_u32;
        let (factory_log, factory_fail) = (log.clone(), fail.clone());
        let mut renderer = FrameRenderer::new(move |_metrics: &ViewMetrics| {
            attempts += 1;
            if attempts == 1 {
                Err(BackendError::backend("device lost"))
            } else {
                Ok(RecordingBackend::new(factory_log.clone(), factory_fail.clone()))
            }
        });
        renderer.set_view(view());

        renderer.render(&mut FillScene, &mut Tracer::none());
        assert!(!renderer.is_initialized());
        assert_eq!(log.len(), 0, "no GPU work without a context");

        renderer.render(&mut FillScene, &mut Tracer::none());
        assert!(renderer.is_initialized());
        assert!(renderer.needs_repaint());
    }

    #[test]
    fn zero_sized_view_postpones_initialization() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);

        renderer.render(&mut FillScene, &mut Tracer::none());
        assert!(!renderer.is_initialized());
        assert_eq!(log.len(), 0);

        renderer.set_view(view());
        renderer.render(&mut FillScene, &mut Tracer::none());
        assert!(renderer.is_initialized());
    }

    #[test]
    fn resize_recreates_main_framebuffer_and_repaints_fully() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());

        renderer.render(&mut FillScene, &mut Tracer::none());
        renderer.present(&mut Tracer::none());
        log.clear();

        renderer.set_view(ViewMetrics::new(200.0, 100.0, 1.0));
        // Old main (0) and invalid-area (1) framebuffers go away
        // immediately; no frame is in progress.
        assert_eq!(log.count(|c| *c == Call::DeleteFramebuffer { id: 0 }), 1);
        assert_eq!(log.count(|c| *c == Call::DeleteFramebuffer { id: 1 }), 1);
        assert!(!renderer.needs_repaint(), "retained image was discarded");

        renderer.render(&mut FillScene, &mut Tracer::none());
        assert_eq!(
            log.count(|c| matches!(
                c,
                Call::CreateFramebuffer {
                    width: 200,
                    height: 100,
                    ..
                }
            )),
            2,
            "new main + new invalid-area at the new size"
        );
        assert_eq!(
            log.count(|c| *c == Call::Scissor {
                device: Rect::new(0.0, 0.0, 200.0, 100.0)
            }),
            1,
            "full repaint of the resized view"
        );
    }

    #[test]
    fn shutdown_releases_every_framebuffer() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());
        renderer.render(&mut FillScene, &mut Tracer::none());

        renderer.shutdown();
        let created = log.count(|c| matches!(c, Call::CreateFramebuffer { .. }));
        let deleted = log.count(|c| matches!(c, Call::DeleteFramebuffer { .. }));
        assert_eq!(created, deleted, "create/delete calls balance");
        assert!(!renderer.is_initialized());
    }

    #[test]
    #[should_panic(expected = "unbalanced start_layer/end_layer")]
    fn unbalanced_layer_nesting_is_fatal() {
        struct LeakyScene;
        impl Scene<RecordingBackend> for LeakyScene {
            fn paint(&mut self, ctx: &mut PaintCtx<'_, RecordingBackend>) {
                ctx.start_layer(Rect::new(0.0, 0.0, 10.0, 10.0))
                    .expect("layer");
                // Missing end_layer.
            }
        }

        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());
        renderer.render(&mut LeakyScene, &mut Tracer::none());
    }

    #[test]
    fn paint_cached_skips_empty_bounds() {
        let (log, fail) = (CallLog::new(), FailSwitch::new());
        let mut renderer = recording_renderer(&log, &fail);
        renderer.set_view(view());

        let mut scene = CachedScene {
            node: CachedNode::new(Rect::ZERO),
        };
        renderer.render(&mut scene, &mut Tracer::none());
        assert_eq!(scene.node.cached_draws, 0);
        assert_eq!(scene.node.dynamic_draws, 0);
        assert!(scene.node.layer.is_none());
    }
}
