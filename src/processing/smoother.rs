//! Temporal smoothing and output delay.
//!
//! Incoming frames only move the *target*. A periodic tick, independent of
//! frame arrival, walks the emitted colors toward the target so that the
//! output reaches it exactly when the settling time has elapsed. Emitted
//! frames can be held back by a fixed output delay before they reach the
//! controller.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::color::Rgb;
use crate::error::{BridgeError, BridgeResult};
use crate::protocols::adalight::effective_frequency;
use crate::util::lock;

/// Retargets closer together than this are dropped.
const RETARGET_DEBOUNCE: Duration = Duration::from_millis(1);
/// Upper bound on frames waiting in the delay queue.
const MAX_QUEUED_FRAMES: usize = 128;

pub const MAX_SETTLING_MS: u32 = 1000;
pub const MAX_OUTPUT_DELAY_MS: u32 = 1000;
pub const MIN_UPDATE_FREQUENCY: u32 = 1;
pub const MAX_UPDATE_FREQUENCY: u32 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingPreset {
    Off,
    Responsive,
    #[default]
    Balanced,
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmoothingConfig {
    pub enabled: bool,
    pub settling_time: Duration,
    pub output_delay: Duration,
    /// Tick rate in Hz
    pub update_frequency: u32,
}

impl SmoothingConfig {
    pub fn preset(preset: SmoothingPreset) -> Self {
        let (enabled, settling_ms, hz) = match preset {
            SmoothingPreset::Off => (false, 0, 30),
            SmoothingPreset::Responsive => (true, 80, 60),
            SmoothingPreset::Balanced => (true, 200, 30),
            SmoothingPreset::Smooth => (true, 500, 25),
        };
        Self {
            enabled,
            settling_time: Duration::from_millis(settling_ms),
            output_delay: Duration::ZERO,
            update_frequency: hz,
        }
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.settling_time > Duration::from_millis(MAX_SETTLING_MS as u64) {
            return Err(BridgeError::config(format!(
                "settling time {:?} exceeds {} ms",
                self.settling_time, MAX_SETTLING_MS
            )));
        }
        if self.output_delay > Duration::from_millis(MAX_OUTPUT_DELAY_MS as u64) {
            return Err(BridgeError::config(format!(
                "output delay {:?} exceeds {} ms",
                self.output_delay, MAX_OUTPUT_DELAY_MS
            )));
        }
        if !(MIN_UPDATE_FREQUENCY..=MAX_UPDATE_FREQUENCY).contains(&self.update_frequency) {
            return Err(BridgeError::config(format!(
                "update frequency {} Hz outside {}..={}",
                self.update_frequency, MIN_UPDATE_FREQUENCY, MAX_UPDATE_FREQUENCY
            )));
        }
        Ok(())
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self::preset(SmoothingPreset::default())
    }
}

/// Config-file form: a preset plus optional overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingSettings {
    pub preset: SmoothingPreset,
    pub enabled: Option<bool>,
    pub settling_time_ms: Option<u32>,
    pub output_delay_ms: Option<u32>,
    pub update_frequency: Option<u32>,
}

impl SmoothingSettings {
    pub fn resolve(&self) -> SmoothingConfig {
        let base = SmoothingConfig::preset(self.preset);
        SmoothingConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            settling_time: self
                .settling_time_ms
                .map(|ms| Duration::from_millis(ms as u64))
                .unwrap_or(base.settling_time),
            output_delay: self
                .output_delay_ms
                .map(|ms| Duration::from_millis(ms as u64))
                .unwrap_or(base.output_delay),
            update_frequency: self.update_frequency.unwrap_or(base.update_frequency),
        }
    }
}

/// Receives finished frames (the connection manager in production).
pub trait FrameSink: Send + Sync {
    fn submit(&self, colors: &[Rgb]);
}

/// Interpolation state, driven with explicit instants.
#[derive(Debug)]
pub struct SmoothingState {
    settling: Duration,
    previous: Vec<Rgb>,
    target: Vec<Rgb>,
    deadline: Option<Instant>,
    last_retarget: Option<Instant>,
}

impl SmoothingState {
    pub fn new(settling: Duration) -> Self {
        Self {
            settling,
            previous: Vec::new(),
            target: Vec::new(),
            deadline: None,
            last_retarget: None,
        }
    }

    pub fn has_target(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn previous(&self) -> &[Rgb] {
        &self.previous
    }

    /// Point the interpolation at new colors. `previous` is kept so the
    /// motion continues from wherever it currently is. Returns `false` if
    /// the call was debounced.
    pub fn retarget(&mut self, colors: &[Rgb], now: Instant) -> bool {
        if let Some(last) = self.last_retarget {
            if now.saturating_duration_since(last) < RETARGET_DEBOUNCE {
                return false;
            }
        }
        self.last_retarget = Some(now);

        if self.target.len() != colors.len() {
            self.target.resize(colors.len(), Rgb::BLACK);
            self.previous.resize(colors.len(), Rgb::BLACK);
        }
        self.target.copy_from_slice(colors);
        self.deadline = Some(now + self.settling);
        true
    }

    /// Advance `previous` toward `target` for time `now`.
    pub fn step(&mut self, now: Instant) -> &[Rgb] {
        let Some(deadline) = self.deadline else {
            return &self.previous;
        };
        let k = if self.settling.is_zero() {
            1.0
        } else {
            let remaining = deadline.saturating_duration_since(now).as_secs_f32();
            (1.0 - remaining / self.settling.as_secs_f32()).clamp(0.0, 1.0)
        };

        let approach = |prev: u8, target: u8| -> u8 {
            let delta = target as f32 - prev as f32;
            (prev as f32 + (k * delta).round()).clamp(0.0, 255.0) as u8
        };
        for (prev, target) in self.previous.iter_mut().zip(self.target.iter()) {
            prev.set(
                approach(prev.r, target.r),
                approach(prev.g, target.g),
                approach(prev.b, target.b),
            );
        }
        &self.previous
    }
}

/// Timestamped FIFO holding frames back by a fixed delay.
#[derive(Debug)]
pub struct DelayQueue {
    delay: Duration,
    frames: VecDeque<(Instant, Vec<Rgb>)>,
}

impl DelayQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            frames: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: Vec<Rgb>, now: Instant) {
        if self.frames.len() >= MAX_QUEUED_FRAMES {
            self.frames.pop_front();
        }
        self.frames.push_back((now, frame));
    }

    /// Dequeue the head if it has aged at least the output delay.
    pub fn pop_ready(&mut self, now: Instant) -> Option<Vec<Rgb>> {
        let (enqueued, _) = self.frames.front()?;
        if now.saturating_duration_since(*enqueued) >= self.delay {
            self.frames.pop_front().map(|(_, frame)| frame)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Smoothing engine with its own periodic tick.
pub struct ColorSmoother {
    config: SmoothingConfig,
    state: Arc<Mutex<SmoothingState>>,
    queue: Arc<Mutex<DelayQueue>>,
    sink: Arc<dyn FrameSink>,
    frequency_cap: watch::Receiver<Option<u32>>,
    shutdown: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ColorSmoother {
    /// `frequency_cap` carries the highest update rate the transport can
    /// sustain, if it has one.
    pub fn new(
        config: SmoothingConfig,
        sink: Arc<dyn FrameSink>,
        frequency_cap: watch::Receiver<Option<u32>>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(SmoothingState::new(config.settling_time))),
            queue: Arc::new(Mutex::new(DelayQueue::new(config.output_delay))),
            sink,
            frequency_cap,
            shutdown: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SmoothingConfig {
        &self.config
    }

    /// Update rate after applying the transport's cap.
    pub fn effective_frequency(&self) -> u32 {
        effective_frequency(self.config.update_frequency, *self.frequency_cap.borrow())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start the tick loop. No-op when smoothing is disabled or already running.
    pub fn start(&self) {
        if !self.config.enabled || self.is_running() {
            return;
        }
        let token = {
            let mut shutdown = lock(&self.shutdown);
            *shutdown = CancellationToken::new();
            shutdown.clone()
        };

        let state = self.state.clone();
        let queue = self.queue.clone();
        let sink = self.sink.clone();
        let requested = self.config.update_frequency;
        let delay = self.config.output_delay;
        let mut cap_rx = self.frequency_cap.clone();

        let handle = tokio::spawn(async move {
            let mut hz = effective_frequency(requested, *cap_rx.borrow_and_update());
            let mut ticker = interval(tick_period(hz));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut cap_open = true;
            info!("Smoother started at {} Hz", hz);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Smoother shutdown requested");
                        break;
                    }
                    changed = cap_rx.changed(), if cap_open => {
                        if changed.is_err() {
                            cap_open = false;
                            continue;
                        }
                        let next = effective_frequency(requested, *cap_rx.borrow_and_update());
                        if next != hz {
                            info!("Smoother update rate {} Hz -> {} Hz", hz, next);
                            hz = next;
                            ticker = interval(tick_period(hz));
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        }
                    }
                    _ = ticker.tick() => {
                        tick(&state, &queue, sink.as_ref(), delay);
                    }
                }
            }
        });
        *lock(&self.task) = Some(handle);
    }

    /// Stop the tick loop and drop any queued frames.
    pub async fn stop(&self) {
        lock(&self.shutdown).cancel();
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        lock(&self.queue).clear();
    }

    /// Hand a new frame to the smoother. Cheap; called on the producer's thread.
    pub fn push(&self, colors: &[Rgb]) {
        if !self.config.enabled {
            self.sink.submit(colors);
            return;
        }
        lock(&self.state).retarget(colors, Instant::now());
    }
}

fn tick_period(hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / hz.max(1) as u64)
}

fn tick(
    state: &Mutex<SmoothingState>,
    queue: &Mutex<DelayQueue>,
    sink: &dyn FrameSink,
    delay: Duration,
) {
    let now = Instant::now();
    let frame = {
        let mut state = lock(state);
        if !state.has_target() {
            return;
        }
        state.step(now).to_vec()
    };

    if delay.is_zero() {
        sink.submit(&frame);
        return;
    }

    let ready: Vec<Vec<Rgb>> = {
        let mut queue = lock(queue);
        queue.push(frame, now);
        std::iter::from_fn(|| queue.pop_ready(now)).collect()
    };
    for frame in ready {
        sink.submit(&frame);
    }
}
