// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Headless frame-loop demo.
//!
//! Wires a scene with a layer-cached panel and an animated overlay to a
//! [`TimerDrive`] and a headless wgpu backend, tracing every frame-loop
//! event to stderr. The panel's cachable content renders once; only the
//! animated strip is repainted each frame.

use std::time::Duration;

use kurbo::Rect;

use stratum_backend_wgpu::WgpuBackend;
use stratum_core::backend::{Color, RasterBackend};
use stratum_core::layer::Layer;
use stratum_core::node::{CacheableNode, DrawNode, Scene};
use stratum_core::renderer::{FrameRenderer, PaintCtx, ViewMetrics};
use stratum_core::scheduler::{DriveConfig, FrameDrive, FrameLoop, TimerDrive};
use stratum_debug::pretty::PrettyPrintSink;

/// A panel whose content is stable and worth caching.
struct Panel {
    bounds: Rect,
    layer: Option<Layer>,
}

impl DrawNode<WgpuBackend> for Panel {
    fn bounds(&self) -> Rect {
        self.bounds
    }

    fn draw_cached(&mut self, ctx: &mut PaintCtx<'_, WgpuBackend>) {
        let bounds = self.bounds;
        let raster = ctx.raster();
        raster.fill_rect(bounds, Color::rgb8(40, 44, 52));
        raster.fill_rect(bounds.inset(-8.0), Color::rgb8(97, 175, 239));
    }
}

impl CacheableNode<WgpuBackend> for Panel {
    fn layer_mut(&mut self) -> &mut Option<Layer> {
        &mut self.layer
    }
}

/// Background + cached panel + a strip that animates every frame.
struct Dashboard {
    panel: Panel,
    phase: f64,
}

impl Dashboard {
    const STRIP: Rect = Rect::new(20.0, 240.0, 380.0, 280.0);

    fn new() -> Self {
        Self {
            panel: Panel {
                bounds: Rect::new(40.0, 30.0, 360.0, 210.0),
                layer: None,
            },
            phase: 0.0,
        }
    }
}

impl Scene<WgpuBackend> for Dashboard {
    fn paint(&mut self, ctx: &mut PaintCtx<'_, WgpuBackend>) {
        let view = ctx.metrics().layout_rect();
        ctx.raster().fill_rect(view, Color::rgb8(24, 26, 31));

        ctx.paint_cached(&mut self.panel);

        // The animated strip: a marker sweeping left to right.
        let t = self.phase.fract();
        let x = Self::STRIP.x0 + t * (Self::STRIP.width() - 20.0);
        let raster = ctx.raster();
        raster.fill_rect(Self::STRIP, Color::rgb8(33, 37, 43));
        raster.fill_rect(
            Rect::new(x, Self::STRIP.y0 + 4.0, x + 20.0, Self::STRIP.y1 - 4.0),
            Color::rgb8(224, 108, 117),
        );
    }
}

fn main() {
    env_logger::init();

    let renderer = FrameRenderer::new(|metrics: &ViewMetrics| {
        let (width, height) = metrics.device_size();
        WgpuBackend::headless(width, height)
    });

    let mut frame_loop = FrameLoop::new(renderer, Dashboard::new())
        .with_trace_sink(Box::new(PrettyPrintSink::stderr()));
    frame_loop
        .renderer_mut()
        .set_view(ViewMetrics::new(400.0, 300.0, 2.0));

    let handle = frame_loop.handle();
    let mut drive = TimerDrive::start(DriveConfig::new(60), move |tick| {
        frame_loop.drive_tick(tick);
    })
    .expect("failed to spawn the frame drive");

    // Animate for a second: advance the phase on the render thread and
    // invalidate only the strip. The panel above stays cached throughout.
    for _ in 0..60 {
        handle.post(|_, scene: &mut Dashboard| {
            scene.phase += 1.0 / 60.0;
        });
        handle.invalidate(Dashboard::STRIP);
        std::thread::sleep(Duration::from_millis(16));
    }

    drive.stop();
    log::info!("demo finished");
}
