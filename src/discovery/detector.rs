//! Per-host probes: reachability, then protocol classification.

use serde::Deserialize;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace};

use super::{DiscoveredDevice, ScannerOptions, WLED_UDP_PORTS};
use crate::error::{BridgeError, BridgeResult};
use crate::protocols::ProtocolFamily;

/// The subset of WLED's `/json/info` the detector relies on.
#[derive(Debug, Deserialize)]
struct WledInfo {
    ver: String,
    leds: WledLeds,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WledLeds {
    #[serde(default)]
    count: Option<u32>,
}

pub struct DeviceDetector {
    options: ScannerOptions,
    http: reqwest::Client,
}

impl DeviceDetector {
    pub fn new(options: ScannerOptions) -> BridgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(options.probe_timeout_ms))
            .build()
            .map_err(|e| BridgeError::Transport(io::Error::other(e)))?;
        Ok(Self { options, http })
    }

    pub fn options(&self) -> &ScannerOptions {
        &self.options
    }

    fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.options.reachability_timeout_ms)
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.options.probe_timeout_ms)
    }

    /// A host is up if any probe port accepts or actively refuses.
    pub async fn is_reachable(&self, ip: IpAddr) -> bool {
        for &port in &self.options.probe_ports {
            let addr = SocketAddr::new(ip, port);
            match timeout(self.reachability_timeout(), TcpStream::connect(addr)).await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => return true,
                Ok(Err(e)) => trace!("{} unreachable: {}", addr, e),
                Err(_) => trace!("{} timed out", addr),
            }
        }
        false
    }

    /// Classify a reachable host. `None` if no supported controller answers.
    pub async fn detect(&self, ip: IpAddr) -> Option<DiscoveredDevice> {
        let host = ip.to_string();
        let mut device = if self.probe_hyperion(ip).await {
            DiscoveredDevice {
                host,
                hostname: None,
                protocol: ProtocolFamily::Hyperion,
                port: self.options.hyperion_port,
                name: None,
                led_count: None,
                verified: true,
            }
        } else if let Some(info) = self.probe_wled_http(ip).await {
            debug!("WLED {} at {}", info.ver, ip);
            DiscoveredDevice {
                host,
                hostname: None,
                protocol: ProtocolFamily::Wled,
                port: self.options.wled_http_port,
                name: info.name.filter(|n| !n.is_empty()),
                led_count: info.leds.count,
                verified: true,
            }
        } else if self.options.udp_probe {
            let port = self.probe_wled_udp(ip).await?;
            DiscoveredDevice {
                host,
                hostname: None,
                protocol: ProtocolFamily::Wled,
                port,
                name: None,
                led_count: None,
                verified: false,
            }
        } else {
            return None;
        };

        if self.options.reverse_dns {
            device.hostname = reverse_dns(ip).await;
        }
        Some(device)
    }

    async fn probe_hyperion(&self, ip: IpAddr) -> bool {
        let addr = SocketAddr::new(ip, self.options.hyperion_port);
        matches!(
            timeout(self.probe_timeout(), TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    async fn probe_wled_http(&self, ip: IpAddr) -> Option<WledInfo> {
        let url = format!(
            "http://{}/json/info",
            SocketAddr::new(ip, self.options.wled_http_port)
        );
        let response = self.http.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        match response.json::<WledInfo>().await {
            Ok(info) => Some(info),
            Err(e) => {
                trace!("{} is not WLED: {}", url, e);
                None
            }
        }
    }

    /// Best effort: an ICMP "port unreachable" shows up as a refused
    /// receive; silence means the port may be open.
    async fn probe_wled_udp(&self, ip: IpAddr) -> Option<u16> {
        for port in WLED_UDP_PORTS {
            let Ok(socket) = UdpSocket::bind(("0.0.0.0", 0)).await else {
                return None;
            };
            if socket.connect(SocketAddr::new(ip, port)).await.is_err() {
                continue;
            }
            if socket.send(&[]).await.is_err() {
                continue;
            }
            let mut buf = [0u8; 64];
            match timeout(self.probe_timeout(), socket.recv(&mut buf)).await {
                Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => continue,
                Ok(Err(_)) => continue,
                Ok(Ok(_)) | Err(_) => return Some(port),
            }
        }
        None
    }
}

/// PTR lookup on a blocking worker; `None` if it only echoes the address.
pub async fn reverse_dns(ip: IpAddr) -> Option<String> {
    let name = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip).ok())
        .await
        .ok()
        .flatten()?;
    if name == ip.to_string() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn options_for(port: u16) -> ScannerOptions {
        ScannerOptions {
            probe_ports: vec![port],
            hyperion_port: port,
            wled_http_port: port,
            reverse_dns: false,
            ..Default::default()
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_refused_counts_as_reachable() {
        let port = closed_port().await;
        let detector = DeviceDetector::new(options_for(port)).unwrap();
        assert!(detector.is_reachable(LOCALHOST).await);
        assert!(detector.detect(LOCALHOST).await.is_none());
    }

    #[tokio::test]
    async fn test_listening_port_is_hyperion() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let detector = DeviceDetector::new(options_for(port)).unwrap();

        let device = detector.detect(LOCALHOST).await.unwrap();
        assert_eq!(device.protocol, ProtocolFamily::Hyperion);
        assert_eq!(device.port, port);
        assert!(device.verified);
    }

    #[test]
    fn test_wled_info_requires_ver_and_leds() {
        let ok: Result<WledInfo, _> =
            serde_json::from_str(r#"{"ver":"0.14.0","leds":{"count":120},"name":"Desk"}"#);
        let info = ok.unwrap();
        assert_eq!(info.leds.count, Some(120));

        let missing: Result<WledInfo, _> = serde_json::from_str(r#"{"ver":"1.0"}"#);
        assert!(missing.is_err());
    }
}
