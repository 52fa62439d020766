// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame scheduling: when a frame is produced, and on whose thread.
//!
//! [`FrameLoop`] owns the renderer and the scene and advances them one
//! [`DriveTick`] at a time. Each tick runs, in order:
//!
//! 1. the screen blit of the previously composited frame (the tick doubles
//!    as the display-refresh signal for the frame before it),
//! 2. tasks marshalled from other threads, and
//! 3. at most one render pass, covering the union of every `invalidate`
//!    call that arrived since the last tick.
//!
//! Invalidations arriving faster than the drive are therefore coalesced;
//! a pass that cannot proceed (zero size, no context yet) simply defers to
//! the next tick.
//!
//! Two interchangeable drives feed ticks to the loop:
//!
//! - [`TimerDrive`] — a background thread ticking at a configured target
//!   frame rate, for platforms without a usable vsync callback.
//! - [`ManualDrive`] — the embedder forwards its platform's display-refresh
//!   callback by calling [`FrameLoop::drive_tick`] itself.
//!
//! The renderer and compositor never branch on which drive is in use.
//!
//! GPU-touching work happens only inside `drive_tick`, so whichever thread
//! drives the loop is the render thread; cross-thread callers interact
//! through [`LoopHandle`], which only touches locked CPU-side state
//! (fire-and-forget, never blocking on GPU work).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use kurbo::Rect;
use parking_lot::Mutex;

use crate::backend::RasterBackend;
use crate::dirty::SharedDirtyRegion;
use crate::node::Scene;
use crate::renderer::{FrameRenderer, ViewMetrics};
use crate::trace::{TickEvent, TraceSink, Tracer};

/// One frame opportunity delivered by a drive.
#[derive(Clone, Copy, Debug)]
pub struct DriveTick {
    /// When the tick fired.
    pub now: Instant,
    /// Monotonically increasing frame counter.
    pub frame_index: u64,
}

/// Configuration for [`TimerDrive`].
#[derive(Clone, Copy, Debug)]
pub struct DriveConfig {
    /// Target frame rate in ticks per second.
    pub target_fps: u32,
}

impl Default for DriveConfig {
    /// 60 ticks per second.
    fn default() -> Self {
        Self { target_fps: 60 }
    }
}

impl DriveConfig {
    /// Creates a config with the given target frame rate (minimum 1).
    #[must_use]
    pub const fn new(target_fps: u32) -> Self {
        Self { target_fps }
    }

    /// The tick interval implied by the target frame rate.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_fps.max(1)))
    }
}

type Task<B, S> = Box<dyn FnOnce(&mut FrameRenderer<B>, &mut S) + Send>;

struct TaskQueue<B: RasterBackend, S> {
    tasks: Arc<Mutex<Vec<Task<B, S>>>>,
}

impl<B: RasterBackend, S> Clone for TaskQueue<B, S> {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<B: RasterBackend, S> Default for TaskQueue<B, S> {
    fn default() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<B: RasterBackend, S> TaskQueue<B, S> {
    fn push(&self, task: Task<B, S>) {
        self.tasks.lock().push(task);
    }

    fn drain(&self) -> Vec<Task<B, S>> {
        std::mem::take(&mut *self.tasks.lock())
    }
}

/// Owns the renderer and scene; advanced one tick at a time by a drive.
pub struct FrameLoop<B: RasterBackend, S: Scene<B>> {
    renderer: FrameRenderer<B>,
    scene: S,
    tasks: TaskQueue<B, S>,
    sink: Option<Box<dyn TraceSink + Send>>,
}

impl<B: RasterBackend, S: Scene<B>> core::fmt::Debug for FrameLoop<B, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameLoop")
            .field("renderer", &self.renderer)
            .finish_non_exhaustive()
    }
}

impl<B: RasterBackend, S: Scene<B>> FrameLoop<B, S> {
    /// Creates a loop around a renderer and the scene it paints.
    #[must_use]
    pub fn new(renderer: FrameRenderer<B>, scene: S) -> Self {
        Self {
            renderer,
            scene,
            tasks: TaskQueue::default(),
            sink: None,
        }
    }

    /// Attaches a trace sink receiving frame-loop events.
    #[must_use]
    pub fn with_trace_sink(mut self, sink: Box<dyn TraceSink + Send>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// A cloneable, `Send` handle for other threads.
    #[must_use]
    pub fn handle(&self) -> LoopHandle<B, S> {
        LoopHandle {
            dirty: self.renderer.dirty_region(),
            tasks: self.tasks.clone(),
        }
    }

    /// The renderer (render-thread access).
    #[must_use]
    pub fn renderer(&self) -> &FrameRenderer<B> {
        &self.renderer
    }

    /// Mutable renderer access (render-thread only; e.g. the initial
    /// `set_view` before the drive starts).
    pub fn renderer_mut(&mut self) -> &mut FrameRenderer<B> {
        &mut self.renderer
    }

    /// The scene.
    #[must_use]
    pub fn scene(&self) -> &S {
        &self.scene
    }

    /// Mutable scene access (render-thread only).
    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    /// Advances the loop by one tick. See the [module docs](self) for the
    /// phases.
    pub fn drive_tick(&mut self, tick: DriveTick) {
        let mut tracer = match &mut self.sink {
            Some(sink) => Tracer::new(sink.as_mut()),
            None => Tracer::none(),
        };
        tracer.tick(&TickEvent {
            frame_index: tick.frame_index,
        });

        // Refresh signal for the frame composited on the previous tick.
        self.renderer.present(&mut tracer);

        for task in self.tasks.drain() {
            task(&mut self.renderer, &mut self.scene);
        }

        // One pass for everything that accumulated since the last tick.
        self.renderer.render(&mut self.scene, &mut tracer);
    }
}

/// Cross-thread handle to a [`FrameLoop`].
///
/// All methods are fire-and-forget: they mutate locked CPU-side state and
/// return; the work lands on the render thread at its next tick.
pub struct LoopHandle<B: RasterBackend, S> {
    dirty: SharedDirtyRegion,
    tasks: TaskQueue<B, S>,
}

impl<B: RasterBackend, S> Clone for LoopHandle<B, S> {
    fn clone(&self) -> Self {
        Self {
            dirty: self.dirty.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<B: RasterBackend, S> core::fmt::Debug for LoopHandle<B, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoopHandle").finish_non_exhaustive()
    }
}

impl<B: RasterBackend, S> LoopHandle<B, S> {
    /// Unions `rect` into the dirty region; the next tick repaints it.
    pub fn invalidate(&self, rect: Rect) {
        self.dirty.add(rect);
    }

    /// Marks the entire visible bounds dirty.
    pub fn invalidate_all(&self) {
        self.dirty.add_all();
    }

    /// Marshals `task` onto the render thread; it runs at the next tick,
    /// before that tick's render pass.
    pub fn post(&self, task: impl FnOnce(&mut FrameRenderer<B>, &mut S) + Send + 'static) {
        self.tasks.push(Box::new(task));
    }

    /// Marshals a view-geometry change onto the render thread.
    pub fn resize(&self, metrics: ViewMetrics) {
        self.post(move |renderer, _| renderer.set_view(metrics));
    }
}

/// Common control surface of the frame drives.
pub trait FrameDrive {
    /// Stops delivering ticks. Idempotent.
    fn stop(&mut self);

    /// Returns `true` while ticks are being delivered.
    fn is_running(&self) -> bool;
}

/// Periodic-timer drive: a background thread ticking at a target frame
/// rate.
///
/// The callback (typically `move |tick| frame_loop.drive_tick(tick)`) runs
/// on the drive's thread, which thereby becomes the render thread. Dropping
/// the drive stops it.
pub struct TimerDrive {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl core::fmt::Debug for TimerDrive {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TimerDrive")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TimerDrive {
    /// Spawns the drive thread and begins ticking immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn start(
        config: DriveConfig,
        mut on_tick: impl FnMut(DriveTick) + Send + 'static,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let interval = config.interval();

        let thread = std::thread::Builder::new()
            .name("stratum-frame-drive".into())
            .spawn(move || {
                let mut frame_index = 0_u64;
                while flag.load(Ordering::Relaxed) {
                    let started = Instant::now();
                    on_tick(DriveTick {
                        now: started,
                        frame_index,
                    });
                    frame_index += 1;
                    if let Some(rest) = interval.checked_sub(started.elapsed()) {
                        std::thread::sleep(rest);
                    }
                }
            })?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }
}

impl FrameDrive for TimerDrive {
    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) && self.thread.is_some()
    }
}

impl Drop for TimerDrive {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Embedder-forwarded drive for platforms with a true display-refresh
/// callback: call [`next_tick`](Self::next_tick) from the vsync handler and
/// pass the result to [`FrameLoop::drive_tick`].
#[derive(Debug, Default)]
pub struct ManualDrive {
    frame_index: u64,
    stopped: bool,
}

impl ManualDrive {
    /// Creates a drive with the frame counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces the tick for the current refresh signal.
    pub fn next_tick(&mut self) -> DriveTick {
        let tick = DriveTick {
            now: Instant::now(),
            frame_index: self.frame_index,
        };
        self.frame_index += 1;
        tick
    }
}

impl FrameDrive for ManualDrive {
    fn stop(&mut self) {
        self.stopped = true;
    }

    fn is_running(&self) -> bool {
        !self.stopped
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use kurbo::Rect;

    use super::*;
    use crate::node::Scene;
    use crate::renderer::PaintCtx;
    use crate::test_support::{Call, CallLog, FailSwitch, RecordingBackend};

    struct EmptyScene;

    impl Scene<RecordingBackend> for EmptyScene {
        fn paint(&mut self, _ctx: &mut PaintCtx<'_, RecordingBackend>) {}
    }

    fn test_loop(log: &CallLog) -> FrameLoop<RecordingBackend, EmptyScene> {
        let log = log.clone();
        let mut renderer = FrameRenderer::new(move |_metrics: &ViewMetrics| {
            Ok(RecordingBackend::new(log.clone(), FailSwitch::new()))
        });
        renderer.set_view(ViewMetrics::new(400.0, 300.0, 2.0));
        FrameLoop::new(renderer, EmptyScene)
    }

    fn tick(index: u64) -> DriveTick {
        DriveTick {
            now: Instant::now(),
            frame_index: index,
        }
    }

    #[test]
    fn invalidates_between_ticks_coalesce_into_one_pass() {
        let log = CallLog::new();
        let mut frame_loop = test_loop(&log);
        let handle = frame_loop.handle();

        // First tick initializes and paints the full bounds.
        frame_loop.drive_tick(tick(0));
        log.clear();

        handle.invalidate(Rect::new(10.0, 10.0, 50.0, 50.0));
        handle.invalidate(Rect::new(60.0, 20.0, 80.0, 40.0));
        handle.invalidate(Rect::new(5.0, 5.0, 15.0, 15.0));
        frame_loop.drive_tick(tick(1));

        // Exactly one composite onto the main framebuffer (src = the
        // invalid-area framebuffer, id 1), covering the union of the three
        // rects at device scale.
        let composites: Vec<_> = log
            .snapshot()
            .into_iter()
            .filter(|c| matches!(c, Call::DrawFramebuffer { src: 1, .. }))
            .collect();
        assert_eq!(composites.len(), 1, "coalesced into one pass");
        assert_eq!(
            composites[0],
            Call::DrawFramebuffer {
                src: 1,
                dest: Rect::new(10.0, 10.0, 160.0, 100.0),
            }
        );
    }

    #[test]
    fn blit_happens_on_the_tick_after_the_composite() {
        let log = CallLog::new();
        let mut frame_loop = test_loop(&log);

        frame_loop.drive_tick(tick(0));
        assert_eq!(
            log.count(|c| matches!(c, Call::Present)),
            0,
            "composite tick does not present"
        );

        frame_loop.drive_tick(tick(1));
        assert_eq!(
            log.count(|c| matches!(c, Call::Present)),
            1,
            "the following tick presents exactly once"
        );
    }

    #[test]
    fn idle_ticks_do_no_gpu_work() {
        let log = CallLog::new();
        let mut frame_loop = test_loop(&log);

        frame_loop.drive_tick(tick(0));
        frame_loop.drive_tick(tick(1)); // presents frame 0
        log.clear();

        frame_loop.drive_tick(tick(2));
        frame_loop.drive_tick(tick(3));
        assert_eq!(log.len(), 0, "clean ticks must not touch the backend");
    }

    #[test]
    fn posted_tasks_run_before_the_render_pass() {
        let log = CallLog::new();
        let mut frame_loop = test_loop(&log);
        let handle = frame_loop.handle();

        frame_loop.drive_tick(tick(0));
        handle.resize(ViewMetrics::new(500.0, 400.0, 2.0));
        frame_loop.drive_tick(tick(1));

        // The resize recreated the main framebuffer at the new size and the
        // same tick's pass repainted the full new bounds.
        assert_eq!(
            log.count(|c| matches!(
                c,
                Call::CreateFramebuffer {
                    width: 1000,
                    height: 800,
                    ..
                }
            )),
            2,
            "new main + new invalid-area framebuffer"
        );
        assert_eq!(frame_loop.renderer().metrics().width, 500.0);
    }

    #[test]
    fn manual_drive_counts_frames() {
        let mut drive = ManualDrive::new();
        assert!(drive.is_running());
        assert_eq!(drive.next_tick().frame_index, 0);
        assert_eq!(drive.next_tick().frame_index, 1);
        drive.stop();
        assert!(!drive.is_running());
    }

    #[test]
    fn timer_drive_ticks_and_stops() {
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        let mut drive = TimerDrive::start(DriveConfig::new(200), move |tick| {
            assert_eq!(tick.frame_index, seen.load(Ordering::SeqCst));
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .expect("spawn drive");

        assert!(drive.is_running());
        std::thread::sleep(Duration::from_millis(50));
        drive.stop();
        assert!(!drive.is_running());

        let ticked = count.load(Ordering::SeqCst);
        assert!(ticked >= 2, "expected several ticks, got {ticked}");

        let after = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(
            count.load(Ordering::SeqCst),
            after,
            "no ticks after stop"
        );
    }

    #[test]
    fn drive_config_interval() {
        assert_eq!(DriveConfig::new(50).interval(), Duration::from_millis(20));
        // A zero rate clamps rather than dividing by zero.
        assert_eq!(DriveConfig::new(0).interval(), Duration::from_secs(1));
    }

    #[test]
    fn handle_is_send_and_clone() {
        fn assert_send<T: Send>(_: &T) {}
        let log = CallLog::new();
        let frame_loop = test_loop(&log);
        let handle = frame_loop.handle();
        assert_send(&handle);
        let cloned = handle.clone();
        cloned.invalidate_all();
    }
}
