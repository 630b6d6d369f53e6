//! Cross-thread configuration publishing, clocks, and the cooperative render
//! loop.
//!
//! Types:
//!
//! - `ConfigHandle` is the single atomically replaced configuration reference
//!   shared between the render thread and whoever edits the configuration.
//! - `TimeSource` abstracts the session clock; `SystemTimeSource` follows the
//!   monotonic clock and `FixedTimeSource` pins a timestamp for tests and
//!   stills.
//! - `FramePacer` computes frame deadlines for a target rate.
//! - `StopSignal` is the cooperative cancellation flag observed between frames.
//!
//! Functions:
//!
//! - `run_loop` draws, presents, and sleeps until stopped, then releases the
//!   renderer before returning.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use layerconfig::{BackgroundConfig, CropRect, RenderConfig};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::GraphicsBackend;
use crate::compositor::{CompositingRenderer, FrameOutcome};
use crate::types::FrameError;

/// Draw rate used when none is configured.
pub const DEFAULT_FPS: f32 = 60.0;

#[derive(Debug)]
struct SharedConfig {
    current: Mutex<(u64, Arc<RenderConfig>)>,
    parallax: Mutex<[f32; 2]>,
    generation: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct ConfigHandle {
    shared: Arc<SharedConfig>,
}

impl ConfigHandle {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            shared: Arc::new(SharedConfig {
                current: Mutex::new((0, Arc::new(config))),
                parallax: Mutex::new([0.0, 0.0]),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Replaces the configuration; returns its generation.
    pub fn publish(&self, config: RenderConfig) -> u64 {
        let mut current = self.shared.current.lock();
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *current = (generation, Arc::new(config));
        generation
    }

    /// Publishes a copy of the current configuration with a new background.
    pub fn set_background(&self, image_ref: impl Into<String>, crop: Option<CropRect>) -> u64 {
        let background = BackgroundConfig {
            image: image_ref.into(),
            crop,
        };
        self.update(|config| config.background = Some(background))
    }

    pub fn clear_background(&self) -> u64 {
        self.update(|config| config.background = None)
    }

    fn update(&self, apply: impl FnOnce(&mut RenderConfig)) -> u64 {
        let mut current = self.shared.current.lock();
        let mut next = RenderConfig::clone(&current.1);
        apply(&mut next);
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *current = (generation, Arc::new(next));
        generation
    }

    /// The current configuration and the generation it was published under.
    pub fn snapshot(&self) -> (u64, Arc<RenderConfig>) {
        let current = self.shared.current.lock();
        (current.0, Arc::clone(&current.1))
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    pub fn set_parallax(&self, x: f32, y: f32) {
        *self.shared.parallax.lock() = [x, y];
    }

    pub fn parallax(&self) -> [f32; 2] {
        *self.shared.parallax.lock()
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(RenderConfig::default())
    }
}

/// Abstraction over where session time originates from.
pub trait TimeSource: Send {
    /// Restarts the clock at zero.
    fn reset(&mut self);
    /// Seconds since the last reset.
    fn elapsed(&self) -> f32;
}

/// Time source backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.origin = Instant::now();
    }

    fn elapsed(&self) -> f32 {
        self.origin.elapsed().as_secs_f32()
    }
}

/// Time source that always reports a fixed timestamp.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    time: f32,
}

impl FixedTimeSource {
    pub fn new(time: f32) -> Self {
        Self { time }
    }
}

impl TimeSource for FixedTimeSource {
    fn reset(&mut self) {}

    fn elapsed(&self) -> f32 {
        self.time
    }
}

#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    next: Option<Instant>,
}

impl FramePacer {
    /// Non-positive or non-finite rates fall back to `DEFAULT_FPS`.
    pub fn new(fps: f32) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            DEFAULT_FPS
        };
        Self {
            interval: Duration::from_secs_f32(1.0 / fps),
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next
    }

    pub fn ready(&self, now: Instant) -> bool {
        self.next.map_or(true, |deadline| now >= deadline)
    }

    /// Records a frame drawn at `now` and schedules the next deadline. A late
    /// frame schedules from `now` rather than bursting to catch up.
    pub fn mark(&mut self, now: Instant) {
        let planned = self.next.map_or(now, |deadline| deadline) + self.interval;
        self.next = Some(if planned <= now {
            now + self.interval
        } else {
            planned
        });
    }

    /// Sleeps until the next deadline, then marks the frame.
    pub fn wait(&mut self) {
        let now = Instant::now();
        if let Some(deadline) = self.next {
            if deadline > now {
                thread::sleep(deadline - now);
            }
        }
        self.mark(Instant::now());
    }

    pub fn reset(&mut self) {
        self.next = None;
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new(DEFAULT_FPS)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Runs frames until `stop` is observed, then releases the renderer.
///
/// Returns the number of presented frames, or the first presentation error
/// that cannot be absorbed. Outdated surfaces are reconfigured and timeouts
/// skip the frame; context loss is returned to the caller.
pub fn run_loop<B: GraphicsBackend>(
    renderer: &mut CompositingRenderer<B>,
    pacer: &mut FramePacer,
    stop: &StopSignal,
) -> Result<u64, FrameError> {
    run_loop_for(renderer, pacer, stop, None)
}

/// Like `run_loop`, additionally stopping after `max_frames` presented frames.
pub fn run_loop_for<B: GraphicsBackend>(
    renderer: &mut CompositingRenderer<B>,
    pacer: &mut FramePacer,
    stop: &StopSignal,
    max_frames: Option<u64>,
) -> Result<u64, FrameError> {
    let mut frames = 0u64;
    let result = loop {
        if stop.is_stopped() || max_frames.is_some_and(|max| frames >= max) {
            break Ok(frames);
        }
        match renderer.draw_frame() {
            Ok(FrameOutcome::Presented(_)) => frames += 1,
            Ok(FrameOutcome::NotReady) => {}
            Err(FrameError::Outdated) => {
                debug!("surface outdated; reconfiguring");
                let (width, height) = renderer.size();
                renderer.resize(width, height);
            }
            Err(err) if err.is_transient() => {
                warn!(error = %err, "skipping frame");
            }
            Err(err) => break Err(err),
        }
        pacer.wait();
    };
    renderer.release();
    result
}
