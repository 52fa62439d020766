// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per
//! event to a [`Write`](std::io::Write) destination (default: stderr).

use std::io::Write;

use stratum_core::trace::{
    CompositeEvent, ContextEvent, FramebufferEvent, FramebufferEventKind, LayerEvent,
    LayerEventKind, PresentEvent, RenderPassEvent, TickEvent, TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write)
/// destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write + Send>> {
    writer: W,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }
}

fn layer_kind(kind: LayerEventKind) -> &'static str {
    match kind {
        LayerEventKind::Hit => "hit",
        LayerEventKind::Miss => "miss",
        LayerEventKind::Fallback => "FALLBACK",
    }
}

fn framebuffer_kind(kind: FramebufferEventKind) -> &'static str {
    match kind {
        FramebufferEventKind::Created => "created",
        FramebufferEventKind::Destroyed => "destroyed",
        FramebufferEventKind::DestroyDeferred => "destroy-deferred",
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_tick(&mut self, e: &TickEvent) {
        let _ = writeln!(self.writer, "[tick] frame={}", e.frame_index);
    }

    fn on_context_created(&mut self, e: &ContextEvent) {
        let _ = writeln!(
            self.writer,
            "[context] {}x{} scale={}",
            e.width, e.height, e.scale,
        );
    }

    fn on_render_pass(&mut self, e: &RenderPassEvent) {
        let _ = writeln!(
            self.writer,
            "[render] dirty=({:.1},{:.1})-({:.1},{:.1}) scale={}",
            e.dirty.x0, e.dirty.y0, e.dirty.x1, e.dirty.y1, e.scale,
        );
    }

    fn on_composite(&mut self, e: &CompositeEvent) {
        let _ = writeln!(
            self.writer,
            "[composite] dest=({:.0},{:.0})-({:.0},{:.0})",
            e.dest.x0, e.dest.y0, e.dest.x1, e.dest.y1,
        );
    }

    fn on_present(&mut self, e: &PresentEvent) {
        let _ = writeln!(self.writer, "[present] {}x{}", e.width, e.height);
    }

    fn on_layer(&mut self, e: &LayerEvent) {
        let _ = writeln!(
            self.writer,
            "[layer] {} rect=({:.1},{:.1})-({:.1},{:.1})",
            layer_kind(e.kind),
            e.rect.x0,
            e.rect.y0,
            e.rect.x1,
            e.rect.y1,
        );
    }

    fn on_framebuffer(&mut self, e: &FramebufferEvent) {
        let _ = writeln!(
            self.writer,
            "[fbo] {} {:?}",
            framebuffer_kind(e.kind),
            e.id,
        );
    }
}
