//! Active controller discovery on the local network.
//!
//! The scanner is stepped by its caller one candidate at a time, so a UI or
//! test can pause or abandon a scan between probes.

pub mod detector;
pub mod scanner;

pub use detector::DeviceDetector;
pub use scanner::{local_candidates, subnet_candidates, DeviceScanner, ScanStep};

use serde::{Deserialize, Serialize};

use crate::protocols::{
    hyperion, wled, ControllerEndpoint, HyperionOptions, ProtocolFamily, WledOptions,
};

/// A controller found by the scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub host: String,
    /// Reverse-DNS name, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub protocol: ProtocolFamily,
    pub port: u16,
    /// Name reported by the device itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led_count: Option<u32>,
    /// False when only a UDP probe suggested the device
    pub verified: bool,
}

impl DiscoveredDevice {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.hostname.as_deref())
            .unwrap_or(&self.host)
    }

    /// Endpoint to stream to this device with default options.
    pub fn endpoint(&self) -> Option<ControllerEndpoint> {
        match self.protocol {
            ProtocolFamily::Hyperion => Some(ControllerEndpoint::Hyperion(HyperionOptions {
                host: self.host.clone(),
                port: self.port,
                ..Default::default()
            })),
            ProtocolFamily::Wled => Some(ControllerEndpoint::Wled(WledOptions {
                host: self.host.clone(),
                ..Default::default()
            })),
            ProtocolFamily::Adalight => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerOptions {
    /// TCP ports tried by the reachability probe
    pub probe_ports: Vec<u16>,
    pub reachability_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub hyperion_port: u16,
    /// Port of the WLED JSON API
    pub wled_http_port: u16,
    /// Also try WLED's UDP ports when the HTTP probe fails
    pub udp_probe: bool,
    pub reverse_dns: bool,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            probe_ports: vec![80],
            reachability_timeout_ms: 300,
            probe_timeout_ms: 800,
            hyperion_port: hyperion::DEFAULT_PORT,
            wled_http_port: 80,
            udp_probe: false,
            reverse_dns: true,
        }
    }
}

pub(crate) const WLED_UDP_PORTS: [u16; 2] = [wled::REALTIME_PORT, wled::DDP_PORT];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_serializes_without_empty_fields() {
        let device = DiscoveredDevice {
            host: "192.168.1.20".into(),
            hostname: None,
            protocol: ProtocolFamily::Hyperion,
            port: 19400,
            name: None,
            led_count: None,
            verified: true,
        };
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["protocol"], "hyperion");
        assert!(json.get("hostname").is_none());
        assert_eq!(device.display_name(), "192.168.1.20");
    }

    #[test]
    fn test_endpoint_from_device() {
        let device = DiscoveredDevice {
            host: "10.0.0.9".into(),
            hostname: Some("wled-desk".into()),
            protocol: ProtocolFamily::Wled,
            port: 80,
            name: Some("Desk".into()),
            led_count: Some(60),
            verified: true,
        };
        assert_eq!(device.display_name(), "Desk");
        let endpoint = device.endpoint().unwrap();
        assert_eq!(endpoint.to_string(), "wled-ddp://10.0.0.9:4048");
    }
}
