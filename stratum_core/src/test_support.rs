// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Call-recording stub backend for tests.
//!
//! [`RecordingBackend`] implements [`RasterBackend`] by appending every call
//! to a shared [`CallLog`], resolving layout coordinates to device pixels
//! through the transform in effect, so tests can assert on exactly what the
//! engine asked the GPU to do and in what order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kurbo::{Point, Rect};
use parking_lot::Mutex;

use crate::backend::{Blend, Color, FramebufferId, RasterBackend, RenderTarget};
use crate::error::BackendError;

/// One recorded backend call. Rect-valued calls are recorded in device
/// pixels (transform already applied).
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    CreateFramebuffer { id: u32, width: u32, height: u32 },
    DeleteFramebuffer { id: u32 },
    Bind(RenderTarget),
    BeginFrame { width: f64, height: f64, scale: f64 },
    EndFrame,
    SetTransform { scale: f64, origin: Point },
    Scissor { device: Rect },
    Clear,
    FillRect { device: Rect },
    DrawFramebuffer { src: u32, dest: Rect },
    Present,
}

/// Shared, cloneable call log.
#[derive(Clone, Debug, Default)]
pub(crate) struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: Call) {
        self.calls.lock().push(call);
    }

    pub(crate) fn snapshot(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.calls.lock().clear();
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Index of the first call matching `pred`, if any.
    pub(crate) fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls.lock().iter().position(|c| pred(c))
    }
}

/// Switch for simulating framebuffer-allocation failure.
#[derive(Clone, Debug, Default)]
pub(crate) struct FailSwitch(Arc<AtomicBool>);

impl FailSwitch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, fail: bool) {
        self.0.store(fail, Ordering::SeqCst);
    }

    fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A [`RasterBackend`] that records calls instead of touching a GPU.
#[derive(Debug)]
pub(crate) struct RecordingBackend {
    log: CallLog,
    fail_create: FailSwitch,
    next_id: u32,
    transform: (f64, Point),
}

impl RecordingBackend {
    pub(crate) fn new(log: CallLog, fail_create: FailSwitch) -> Self {
        Self {
            log,
            fail_create,
            next_id: 0,
            transform: (1.0, Point::ZERO),
        }
    }

    fn to_device(&self, rect: Rect) -> Rect {
        let (scale, origin) = self.transform;
        Rect::new(
            (rect.x0 - origin.x) * scale,
            (rect.y0 - origin.y) * scale,
            (rect.x1 - origin.x) * scale,
            (rect.y1 - origin.y) * scale,
        )
    }
}

impl RasterBackend for RecordingBackend {
    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<FramebufferId, BackendError> {
        if self.fail_create.get() {
            return Err(BackendError::OutOfDeviceMemory);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.log.push(Call::CreateFramebuffer { id, width, height });
        Ok(FramebufferId(id))
    }

    fn delete_framebuffer(&mut self, id: FramebufferId) {
        self.log.push(Call::DeleteFramebuffer { id: id.0 });
    }

    fn bind_framebuffer(&mut self, target: RenderTarget) {
        self.log.push(Call::Bind(target));
    }

    fn begin_frame(&mut self, width: f64, height: f64, scale: f64) {
        self.transform = (scale, Point::ZERO);
        self.log.push(Call::BeginFrame { width, height, scale });
    }

    fn end_frame(&mut self) {
        self.log.push(Call::EndFrame);
    }

    fn set_transform(&mut self, scale: f64, origin: Point) {
        self.transform = (scale, origin);
        self.log.push(Call::SetTransform { scale, origin });
    }

    fn intersect_scissor(&mut self, rect: Rect) {
        let device = self.to_device(rect);
        self.log.push(Call::Scissor { device });
    }

    fn clear(&mut self, _color: Color) {
        self.log.push(Call::Clear);
    }

    fn fill_rect(&mut self, rect: Rect, _color: Color) {
        let device = self.to_device(rect);
        self.log.push(Call::FillRect { device });
    }

    fn draw_framebuffer(&mut self, src: FramebufferId, _src_offset: Point, dest: Rect, _blend: Blend) {
        let dest = self.to_device(dest);
        self.log.push(Call::DrawFramebuffer { src: src.0, dest });
    }

    fn present(&mut self) {
        self.log.push(Call::Present);
    }
}
