//! ConnectionManager - owns one protocol instance and its send worker
//!
//! Frames are delivered single-flight: the pending slot holds at most one
//! unsent frame and a newer frame replaces it. One worker task drains the
//! slot, so the wire never sees an older frame after a newer one.
//!
//! Reconnect policy is asymmetric. A failed first connect is fatal (almost
//! always a configuration mistake). After at least one success, transport
//! errors trigger fixed-delay reconnect attempts until success or shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ConnectionOptions, ConnectionState};
use crate::bus::{BusEvent, SharedBus};
use crate::color::Rgb;
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::processing::FrameSink;
use crate::protocols::{self, ControllerEndpoint, LedProtocol};
use crate::util::lock;

/// Builds a fresh protocol instance for each connect.
pub type ProtocolFactory = Box<
    dyn Fn(watch::Sender<Option<u32>>) -> BridgeResult<Box<dyn LedProtocol>> + Send + Sync,
>;

/// What the worker should do next.
#[derive(Debug, Clone)]
enum Outgoing {
    Frame(Arc<[Rgb]>),
    Clear,
}

/// State shared between the manager and its worker.
struct Shared {
    label: String,
    bus: SharedBus,
    state: watch::Sender<ConnectionState>,
    frames_sent: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("{}: {} -> {}", self.label, previous, state);
            self.bus.publish(BusEvent::ConnectionStateChanged { state });
        }
    }

    fn report(&self, code: ErrorKind, message: String) {
        self.bus.publish(BusEvent::ConnectionError { code, message });
    }
}

struct Worker {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ConnectionManager {
    factory: ProtocolFactory,
    options: ConnectionOptions,
    shared: Arc<Shared>,
    pending: watch::Sender<Option<Outgoing>>,
    frequency_cap: watch::Sender<Option<u32>>,
    worker: Mutex<Option<Worker>>,
    /// Serializes connect/disconnect against each other
    lifecycle: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    pub fn new(endpoint: ControllerEndpoint, options: ConnectionOptions, bus: SharedBus) -> Self {
        let label = endpoint.to_string();
        let factory: ProtocolFactory = Box::new(
            move |cap: watch::Sender<Option<u32>>| -> BridgeResult<Box<dyn LedProtocol>> {
                endpoint.validate()?;
                Ok(protocols::create(&endpoint, cap))
            },
        );
        Self::with_factory(label, factory, options, bus)
    }

    pub fn with_factory(
        label: impl Into<String>,
        factory: ProtocolFactory,
        options: ConnectionOptions,
        bus: SharedBus,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (pending, _) = watch::channel(None);
        let (frequency_cap, _) = watch::channel(None);
        Self {
            factory,
            options,
            shared: Arc::new(Shared {
                label: label.into(),
                bus,
                state,
                frames_sent: AtomicU64::new(0),
            }),
            pending,
            frequency_cap,
            worker: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Highest update rate the transport sustains, if limited.
    pub fn frequency_cap(&self) -> watch::Receiver<Option<u32>> {
        self.frequency_cap.subscribe()
    }

    pub fn frames_sent(&self) -> u64 {
        self.shared.frames_sent.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Connect and start the send worker.
    ///
    /// A failure here is fatal: the state becomes `Failed`, the error is
    /// published, and nothing is retried.
    pub async fn connect(&self) -> BridgeResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_running() {
            return Ok(());
        }

        self.shared.set_state(ConnectionState::Connecting);
        let mut protocol = match (self.factory)(self.frequency_cap.clone()) {
            Ok(protocol) => protocol,
            Err(e) => return Err(self.fail(e)),
        };

        let attempt = tokio::time::timeout(self.options.connect_timeout(), protocol.connect()).await;
        match attempt {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                protocol.disconnect().await;
                return Err(self.fail(e));
            }
            Err(_) => {
                protocol.disconnect().await;
                return Err(self.fail(timed_out(&self.options)));
            }
        }

        info!("Connected to {}", self.shared.label);
        self.shared.set_state(ConnectionState::Connected);
        self.shared.bus.publish(BusEvent::Connected {
            endpoint: self.shared.label.clone(),
        });

        self.pending.send_replace(None);
        let pending_rx = self.pending.subscribe();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_worker(
            protocol,
            pending_rx,
            self.shared.clone(),
            self.options.clone(),
            shutdown.clone(),
        ));
        *lock(&self.worker) = Some(Worker { shutdown, handle });
        Ok(())
    }

    fn fail(&self, e: BridgeError) -> BridgeError {
        error!("Connecting to {} failed: {}", self.shared.label, e);
        self.shared.set_state(ConnectionState::Failed);
        self.shared.report(e.kind(), e.to_string());
        e
    }

    /// Replace any unsent frame with `colors`.
    pub fn submit(&self, colors: &[Rgb]) {
        self.pending
            .send_replace(Some(Outgoing::Frame(Arc::from(colors))));
    }

    /// Queue a clear, replacing any unsent frame.
    pub fn clear(&self) {
        self.pending.send_replace(Some(Outgoing::Clear));
    }

    /// Drop the pending frame, stop the worker within the shutdown timeout
    /// and close the transport. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        self.pending.send_replace(None);

        let worker = lock(&self.worker).take();
        let Some(mut worker) = worker else {
            if self.state() != ConnectionState::Failed {
                self.shared.set_state(ConnectionState::Disconnected);
            }
            return;
        };

        worker.shutdown.cancel();
        match tokio::time::timeout(self.options.shutdown_timeout(), &mut worker.handle).await {
            Ok(_) => debug!("{}: worker stopped", self.shared.label),
            Err(_) => {
                warn!(
                    "{}: worker did not stop within {:?}, aborting",
                    self.shared.label,
                    self.options.shutdown_timeout()
                );
                worker.handle.abort();
            }
        }
        if self.state() != ConnectionState::Failed {
            self.shared.set_state(ConnectionState::Disconnected);
        }
        info!("Disconnected from {}", self.shared.label);
    }
}

impl FrameSink for ConnectionManager {
    fn submit(&self, colors: &[Rgb]) {
        ConnectionManager::submit(self, colors);
    }
}

fn timed_out(options: &ConnectionOptions) -> BridgeError {
    BridgeError::Transport(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("no connection within {:?}", options.connect_timeout()),
    ))
}

async fn deliver(protocol: &mut dyn LedProtocol, outgoing: &Outgoing) -> BridgeResult<()> {
    match outgoing {
        Outgoing::Frame(colors) => protocol.send_frame(colors).await,
        Outgoing::Clear => protocol.clear().await,
    }
}

/// Send loop. Exits on cancellation, or when the connection is lost and
/// reconnecting is disabled.
async fn run_worker(
    mut protocol: Box<dyn LedProtocol>,
    mut pending: watch::Receiver<Option<Outgoing>>,
    shared: Arc<Shared>,
    options: ConnectionOptions,
    shutdown: CancellationToken,
) {
    loop {
        let outgoing = tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = pending.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = pending.borrow_and_update().clone();
                match next {
                    Some(outgoing) => outgoing,
                    None => continue,
                }
            }
        };

        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = deliver(protocol.as_mut(), &outgoing) => result,
        };

        let e = match result {
            Ok(()) => {
                shared.frames_sent.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(e) if e.kind() == ErrorKind::Protocol => {
                warn!("{}: ignoring protocol error: {}", shared.label, e);
                continue;
            }
            Err(e) => e,
        };

        protocol.disconnect().await;
        if e.kind().is_fatal() {
            error!("{}: {}, giving up", shared.label, e);
            shared.set_state(ConnectionState::Failed);
            shared.report(e.kind(), e.to_string());
            return;
        }
        if !options.reconnect {
            warn!("{}: connection lost: {}", shared.label, e);
            shared.set_state(ConnectionState::Disconnected);
            shared.report(ErrorKind::ConnectionLost, e.to_string());
            return;
        }

        warn!(
            "{}: {} ({}), reconnecting in {:?}",
            shared.label,
            e,
            e.kind(),
            options.reconnect_delay()
        );
        shared.report(e.kind(), e.to_string());
        shared.set_state(ConnectionState::Reconnecting);
        match reconnect(protocol.as_mut(), &shared, &options, &shutdown).await {
            Reconnect::Connected => {}
            Reconnect::Cancelled => break,
            Reconnect::Fatal(e) => {
                error!("{}: reconnect failed: {}, giving up", shared.label, e);
                shared.set_state(ConnectionState::Failed);
                shared.report(e.kind(), e.to_string());
                return;
            }
        }
    }

    protocol.disconnect().await;
    debug!("{}: send worker exiting", shared.label);
}

enum Reconnect {
    Connected,
    Cancelled,
    /// Permission or configuration failure; retrying is pointless
    Fatal(BridgeError),
}

/// Retry at a fixed delay until connected, cancelled, or a fatal error.
async fn reconnect(
    protocol: &mut dyn LedProtocol,
    shared: &Shared,
    options: &ConnectionOptions,
    shutdown: &CancellationToken,
) -> Reconnect {
    let mut attempt: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Reconnect::Cancelled,
            _ = tokio::time::sleep(options.reconnect_delay()) => {}
        }
        attempt += 1;

        let result = tokio::select! {
            _ = shutdown.cancelled() => return Reconnect::Cancelled,
            r = tokio::time::timeout(options.connect_timeout(), protocol.connect()) => r,
        };
        match result {
            Ok(Ok(())) => {
                info!("{}: reconnected after {} attempt(s)", shared.label, attempt);
                shared.set_state(ConnectionState::Connected);
                shared.bus.publish(BusEvent::Connected {
                    endpoint: shared.label.clone(),
                });
                return Reconnect::Connected;
            }
            Ok(Err(e)) if e.kind().is_fatal() => {
                protocol.disconnect().await;
                return Reconnect::Fatal(e);
            }
            Ok(Err(e)) => debug!("{}: reconnect attempt {} failed: {}", shared.label, attempt, e),
            Err(_) => debug!("{}: reconnect attempt {} timed out", shared.label, attempt),
        }
        protocol.disconnect().await;
    }
}
