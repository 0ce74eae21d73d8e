//! Caller-driven subnet scan.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DeviceDetector, DiscoveredDevice, ScannerOptions};
use crate::bus::{BusEvent, SharedBus};
use crate::error::BridgeResult;

/// Every host of each address's /24, minus network, broadcast and the
/// local addresses themselves. Order is preserved, duplicates dropped.
pub fn subnet_candidates(locals: &[Ipv4Addr]) -> Vec<IpAddr> {
    let own: HashSet<Ipv4Addr> = locals.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for local in locals {
        let [a, b, c, _] = local.octets();
        for d in 1..=254u8 {
            let ip = Ipv4Addr::new(a, b, c, d);
            if !own.contains(&ip) && seen.insert(ip) {
                out.push(IpAddr::V4(ip));
            }
        }
    }
    out
}

/// Candidates from every non-loopback IPv4 interface.
pub fn local_candidates() -> BridgeResult<Vec<IpAddr>> {
    let locals: Vec<Ipv4Addr> = if_addrs::get_if_addrs()?
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect();
    debug!("Local IPv4 addresses: {:?}", locals);
    Ok(subnet_candidates(&locals))
}

/// Outcome of one scan step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStep {
    /// No candidates left
    Finished,
    Unreachable(IpAddr),
    /// Reachable, but no supported controller answered (or already reported)
    NoController(IpAddr),
    Discovered(DiscoveredDevice),
}

type DiscoveryCallback = Box<dyn FnMut(&DiscoveredDevice) + Send>;

pub struct DeviceScanner {
    detector: DeviceDetector,
    candidates: Vec<IpAddr>,
    next: usize,
    reported: HashSet<String>,
    devices: Vec<DiscoveredDevice>,
    on_discovered: Option<DiscoveryCallback>,
    bus: Option<SharedBus>,
}

impl DeviceScanner {
    /// Scanner over the local /24 subnets.
    pub fn new(options: ScannerOptions) -> BridgeResult<Self> {
        Self::with_candidates(local_candidates()?, options)
    }

    pub fn with_candidates(candidates: Vec<IpAddr>, options: ScannerOptions) -> BridgeResult<Self> {
        info!("Scanner prepared with {} candidates", candidates.len());
        Ok(Self {
            detector: DeviceDetector::new(options)?,
            candidates,
            next: 0,
            reported: HashSet::new(),
            devices: Vec::new(),
            on_discovered: None,
            bus: None,
        })
    }

    /// Called once per newly discovered device.
    pub fn on_discovered(mut self, callback: impl FnMut(&DiscoveredDevice) + Send + 'static) -> Self {
        self.on_discovered = Some(Box::new(callback));
        self
    }

    /// Also publish `DeviceDiscovered` on the bus.
    pub fn with_bus(mut self, bus: SharedBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn total(&self) -> usize {
        self.candidates.len()
    }

    pub fn tried(&self) -> usize {
        self.next
    }

    /// Fraction of candidates tried, in `[0, 1]`; only ever increases.
    pub fn progress(&self) -> f32 {
        if self.candidates.is_empty() {
            return 1.0;
        }
        self.next as f32 / self.candidates.len() as f32
    }

    pub fn is_finished(&self) -> bool {
        self.next >= self.candidates.len()
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    /// Probe the next candidate.
    pub async fn try_next(&mut self) -> ScanStep {
        let Some(&ip) = self.candidates.get(self.next) else {
            return ScanStep::Finished;
        };
        self.next += 1;

        if !self.detector.is_reachable(ip).await {
            return ScanStep::Unreachable(ip);
        }
        let Some(device) = self.detector.detect(ip).await else {
            return ScanStep::NoController(ip);
        };
        if !self.reported.insert(device.host.clone()) {
            return ScanStep::NoController(ip);
        }

        info!(
            "Discovered {} controller at {}:{} ({})",
            device.protocol,
            device.host,
            device.port,
            device.display_name()
        );
        if let Some(callback) = self.on_discovered.as_mut() {
            callback(&device);
        }
        if let Some(bus) = &self.bus {
            bus.publish(BusEvent::DeviceDiscovered {
                device: device.clone(),
            });
        }
        self.devices.push(device.clone());
        ScanStep::Discovered(device)
    }

    /// Step through every remaining candidate until done or cancelled.
    pub async fn scan_all(&mut self, cancel: &CancellationToken) -> Vec<DiscoveredDevice> {
        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scan cancelled at {:.0}%", self.progress() * 100.0);
                    break;
                }
                step = self.try_next() => step,
            };
            if step == ScanStep::Finished {
                break;
            }
        }
        self.devices.clone()
    }
}
