//! AmbientPipeline - frame in, LED colors out
//!
//! BorderDetector -> PerimeterMapper -> ColorTransform -> ColorSmoother ->
//! ConnectionManager. `submit_frame` runs on the producer's thread and only
//! takes short std locks; the smoother and the send worker do the rest.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::bus::{BusEvent, SharedBus};
use crate::capture::{BorderDetector, Frame, LedLayout, PerimeterMapper, Rotation};
use crate::color::Rgb;
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::processing::{ColorSmoother, ColorTransform};
use crate::util::lock;

/// Shared "are we capturing" flag. Cloning yields another handle to the
/// same flag.
#[derive(Debug, Clone, Default)]
pub struct CaptureState(Arc<AtomicBool>);

impl CaptureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_capturing(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns true if the value changed.
    pub fn set(&self, capturing: bool) -> bool {
        self.0.swap(capturing, Ordering::AcqRel) != capturing
    }
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rate_limited: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of the frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames mapped and handed to the smoother
    pub accepted: u64,
    /// Dropped for arriving faster than the frame rate
    pub rate_limited: u64,
    /// Malformed buffers
    pub rejected: u64,
}

/// Per-frame working state, reused between frames.
struct Stage {
    border: BorderDetector,
    mapper: PerimeterMapper,
    colors: Vec<Rgb>,
    last_accepted: Option<Instant>,
}

struct Watcher {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct AmbientPipeline {
    layout: LedLayout,
    min_interval: Duration,
    transform: ColorTransform,
    stage: Mutex<Stage>,
    smoother: Arc<ColorSmoother>,
    connection: Arc<ConnectionManager>,
    capture: CaptureState,
    counters: Counters,
    bus: SharedBus,
    watcher: Mutex<Option<Watcher>>,
}

impl AmbientPipeline {
    /// Build a pipeline for `config.controller`. Any configuration problem is
    /// reported here, before a connection is attempted.
    pub fn new(config: &Config, bus: SharedBus) -> BridgeResult<Self> {
        if let Err(e) = config.validate() {
            bus.publish(BusEvent::ConnectionError {
                code: e.kind(),
                message: e.to_string(),
            });
            return Err(e);
        }
        let endpoint = config
            .controller
            .clone()
            .ok_or_else(|| BridgeError::config("no controller configured"))?;
        let connection = Arc::new(ConnectionManager::new(
            endpoint,
            config.connection.clone(),
            bus.clone(),
        ));
        Self::with_connection(config, connection, bus)
    }

    /// Build around an existing connection; `config.controller` is ignored.
    pub fn with_connection(
        config: &Config,
        connection: Arc<ConnectionManager>,
        bus: SharedBus,
    ) -> BridgeResult<Self> {
        config.validate_processing()?;

        let smoothing = config.smoothing.resolve();
        let smoother = Arc::new(ColorSmoother::new(
            smoothing,
            connection.clone(),
            connection.frequency_cap(),
        ));
        debug!(
            "Pipeline: {} LEDs, {} fps, smoothing {:?}",
            config.layout.total(),
            config.frame_rate,
            smoothing
        );

        Ok(Self {
            layout: config.layout.clone(),
            min_interval: Duration::from_micros(1_000_000 / config.frame_rate.max(1) as u64),
            transform: ColorTransform::new(config.transform),
            stage: Mutex::new(Stage {
                border: BorderDetector::new(config.border.clone()),
                mapper: PerimeterMapper::new(),
                colors: Vec::with_capacity(config.layout.total()),
                last_accepted: None,
            }),
            smoother,
            connection,
            capture: CaptureState::new(),
            counters: Counters::default(),
            bus,
            watcher: Mutex::new(None),
        })
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_capturing()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn smoother(&self) -> &ColorSmoother {
        &self.smoother
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Connect, start smoothing and begin accepting frames.
    pub async fn start(&self) -> BridgeResult<()> {
        if self.is_capturing() {
            return Ok(());
        }
        // Subscribe before connecting so no loss event slips past the watcher
        let events = self.bus.subscribe();
        self.connection.connect().await?;
        self.smoother.start();
        self.spawn_watcher(events);
        set_capturing(&self.capture, &self.bus, true);
        info!("Capture started for {}", self.connection.label());
        Ok(())
    }

    fn spawn_watcher(&self, mut events: tokio::sync::broadcast::Receiver<BusEvent>) {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let capture = self.capture.clone();
        let bus = self.bus.clone();
        let smoother = self.smoother.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(BusEvent::ConnectionError {
                        code: ErrorKind::ConnectionLost,
                        message,
                    }) => {
                        warn!("Stopping capture, connection lost: {}", message);
                        smoother.stop().await;
                        set_capturing(&capture, &bus, false);
                        break;
                    }
                    Ok(BusEvent::ConnectionStateChanged {
                        state: ConnectionState::Failed,
                    }) => {
                        warn!("Stopping capture, connection failed");
                        smoother.stop().await;
                        set_capturing(&capture, &bus, false);
                        break;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => debug!("Pipeline watcher skipped {} events", n),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *lock(&self.watcher) = Some(Watcher { shutdown, handle });
    }

    /// Feed one captured frame. Returns false if it was dropped (not
    /// capturing, or ahead of the frame rate).
    pub fn submit_frame(
        &self,
        pixels: &[u8],
        width: usize,
        height: usize,
        rotation: Rotation,
    ) -> BridgeResult<bool> {
        if !self.capture.is_capturing() {
            return Ok(false);
        }

        let mut stage = lock(&self.stage);
        let now = Instant::now();
        if let Some(last) = stage.last_accepted {
            if now.duration_since(last) < self.min_interval {
                self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                return Ok(false);
            }
        }

        let frame = match Frame::new(pixels, width, height, rotation) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        stage.last_accepted = Some(now);

        let Stage {
            border,
            mapper,
            colors,
            ..
        } = &mut *stage;
        let capture = border.process(&frame).crop(frame.bounds());
        mapper.map(&frame, capture, &self.layout, colors);
        self.transform.apply(colors);
        self.smoother.push(colors);

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        trace!("Frame {}x{} -> {} LEDs", width, height, colors.len());
        Ok(true)
    }

    /// Stop accepting frames, stop smoothing and disconnect. Safe to call
    /// repeatedly.
    pub async fn stop(&self) {
        let watcher = lock(&self.watcher).take();
        if let Some(watcher) = watcher {
            watcher.shutdown.cancel();
            let _ = watcher.handle.await;
        }
        self.smoother.stop().await;
        self.connection.disconnect().await;
        lock(&self.stage).last_accepted = None;
        if set_capturing(&self.capture, &self.bus, false) {
            info!("Capture stopped");
        }
    }
}

fn set_capturing(capture: &CaptureState, bus: &SharedBus, capturing: bool) -> bool {
    let changed = capture.set(capturing);
    if changed {
        bus.publish(BusEvent::CaptureStatus { capturing });
    }
    changed
}
