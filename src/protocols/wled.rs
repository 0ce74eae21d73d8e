//! WLED realtime UDP: DDP plus the legacy DRGB and DNRGB formats.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{require_host, LedProtocol};
use crate::color::{ChannelOrder, Rgb};
use crate::error::{BridgeError, BridgeResult};
use crate::util::lock;

pub const DDP_PORT: u16 = 4048;
pub const REALTIME_PORT: u16 = 21324;

pub const DDP_HEADER_LEN: usize = 10;
/// Channel bytes per DDP packet (480 RGB LEDs)
pub const DDP_MAX_CHANNELS: usize = 1440;
const DDP_VERSION_1: u8 = 0x40;
const DDP_PUSH: u8 = 0x01;
const DDP_TYPE_RGB8: u8 = 0x80 | 0x08 | 0x03;
const DDP_TYPE_RGBW8: u8 = 0x80 | 0x18 | 0x03;
const DDP_DEST_DISPLAY: u8 = 1;

const DRGB_PROTOCOL: u8 = 2;
const DNRGB_PROTOCOL: u8 = 4;
pub const DRGB_MAX_LEDS: usize = 490;
pub const DNRGB_MAX_LEDS: usize = 489;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WledVariant {
    #[default]
    Ddp,
    Drgb,
    Dnrgb,
}

impl fmt::Display for WledVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WledVariant::Ddp => "ddp",
            WledVariant::Drgb => "drgb",
            WledVariant::Dnrgb => "dnrgb",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WledOptions {
    pub host: String,
    /// Defaults to the variant's standard port
    pub port: Option<u16>,
    pub variant: WledVariant,
    /// DRGB/DNRGB only
    pub color_order: ChannelOrder,
    /// DDP only: send a fourth white channel
    pub rgbw: bool,
    pub brightness_cap: u8,
    /// Seconds WLED stays in realtime mode after the last legacy packet
    pub timeout_secs: u8,
    pub keepalive_ms: u64,
}

impl Default for WledOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            variant: WledVariant::Ddp,
            color_order: ChannelOrder::Rgb,
            rgbw: false,
            brightness_cap: u8::MAX,
            timeout_secs: 2,
            keepalive_ms: 1000,
        }
    }
}

impl WledOptions {
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(match self.variant {
            WledVariant::Ddp => DDP_PORT,
            WledVariant::Drgb | WledVariant::Dnrgb => REALTIME_PORT,
        })
    }

    pub fn validate(&self) -> BridgeResult<()> {
        require_host(&self.host)?;
        if self.port == Some(0) {
            return Err(BridgeError::config("wled port must be non-zero"));
        }
        if self.keepalive_ms == 0 {
            return Err(BridgeError::config("wled keepalive interval must be non-zero"));
        }
        Ok(())
    }
}

/// Turns color frames into datagrams. Keeps the DDP sequence counter.
#[derive(Debug)]
pub struct WledEncoder {
    variant: WledVariant,
    order: ChannelOrder,
    rgbw: bool,
    cap: u8,
    timeout: u8,
    sequence: u8,
    truncation_logged: bool,
}

impl WledEncoder {
    pub fn new(options: &WledOptions) -> Self {
        Self {
            variant: options.variant,
            order: options.color_order,
            rgbw: options.rgbw,
            cap: options.brightness_cap,
            timeout: options.timeout_secs,
            sequence: 0,
            truncation_logged: false,
        }
    }

    pub fn encode(&mut self, colors: &[Rgb]) -> Vec<Vec<u8>> {
        match self.variant {
            WledVariant::Ddp => self.encode_ddp(colors),
            WledVariant::Drgb => self.encode_drgb(colors),
            WledVariant::Dnrgb => self.encode_dnrgb(colors),
        }
    }

    /// 1..=15; zero means "no sequencing" to receivers.
    fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence % 15 + 1;
        self.sequence
    }

    fn encode_ddp(&mut self, colors: &[Rgb]) -> Vec<Vec<u8>> {
        let channels: Vec<u8> = if self.rgbw {
            colors
                .iter()
                .flat_map(|c| {
                    let c = c.scale(self.cap);
                    let w = c.r.min(c.g).min(c.b);
                    [c.r - w, c.g - w, c.b - w, w]
                })
                .collect()
        } else {
            colors
                .iter()
                .flat_map(|c| {
                    let c = c.scale(self.cap);
                    [c.r, c.g, c.b]
                })
                .collect()
        };
        let data_type = if self.rgbw {
            DDP_TYPE_RGBW8
        } else {
            DDP_TYPE_RGB8
        };
        let sequence = self.next_sequence();

        let chunks = channels.len().div_ceil(DDP_MAX_CHANNELS);
        let mut packets = Vec::with_capacity(chunks);
        for (i, chunk) in channels.chunks(DDP_MAX_CHANNELS).enumerate() {
            let offset = (i * DDP_MAX_CHANNELS) as u32;
            let flags = if i + 1 == chunks {
                DDP_VERSION_1 | DDP_PUSH
            } else {
                DDP_VERSION_1
            };
            let mut packet = Vec::with_capacity(DDP_HEADER_LEN + chunk.len());
            packet.push(flags);
            packet.push(sequence & 0x0F);
            packet.push(data_type);
            packet.push(DDP_DEST_DISPLAY);
            packet.extend_from_slice(&offset.to_be_bytes());
            packet.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
            packet.extend_from_slice(chunk);
            packets.push(packet);
        }
        packets
    }

    fn push_legacy(&self, packet: &mut Vec<u8>, colors: &[Rgb]) {
        for c in colors {
            packet.extend_from_slice(&self.order.apply(c.scale(self.cap)));
        }
    }

    fn encode_drgb(&mut self, colors: &[Rgb]) -> Vec<Vec<u8>> {
        if colors.len() > DRGB_MAX_LEDS && !self.truncation_logged {
            warn!(
                "DRGB carries at most {} LEDs, dropping {}; use DNRGB or DDP",
                DRGB_MAX_LEDS,
                colors.len() - DRGB_MAX_LEDS
            );
            self.truncation_logged = true;
        }
        let colors = &colors[..colors.len().min(DRGB_MAX_LEDS)];
        let mut packet = Vec::with_capacity(2 + colors.len() * 3);
        packet.push(DRGB_PROTOCOL);
        packet.push(self.timeout);
        self.push_legacy(&mut packet, colors);
        vec![packet]
    }

    fn encode_dnrgb(&mut self, colors: &[Rgb]) -> Vec<Vec<u8>> {
        colors
            .chunks(DNRGB_MAX_LEDS)
            .enumerate()
            .map(|(i, chunk)| {
                let start = (i * DNRGB_MAX_LEDS) as u16;
                let mut packet = Vec::with_capacity(4 + chunk.len() * 3);
                packet.push(DNRGB_PROTOCOL);
                packet.push(self.timeout);
                packet.extend_from_slice(&start.to_be_bytes());
                self.push_legacy(&mut packet, chunk);
                packet
            })
            .collect()
    }
}

/// Last frame on the wire, replayed by the keepalive task.
#[derive(Debug)]
struct LastFrame {
    packets: Vec<Vec<u8>>,
    sent_at: Instant,
}

pub struct WledClient {
    options: WledOptions,
    encoder: WledEncoder,
    socket: Option<Arc<UdpSocket>>,
    last: Arc<Mutex<LastFrame>>,
    last_len: usize,
    keepalive: Option<(CancellationToken, JoinHandle<()>)>,
}

impl WledClient {
    pub fn new(options: WledOptions) -> Self {
        let encoder = WledEncoder::new(&options);
        Self {
            options,
            encoder,
            socket: None,
            last: Arc::new(Mutex::new(LastFrame {
                packets: Vec::new(),
                sent_at: Instant::now(),
            })),
            last_len: 0,
            keepalive: None,
        }
    }

    /// Replay the last frame whenever nothing was sent for one period.
    fn spawn_keepalive(&mut self, socket: Arc<UdpSocket>) {
        let token = CancellationToken::new();
        let child = token.clone();
        let last = self.last.clone();
        let period = Duration::from_millis(self.options.keepalive_ms);

        let handle = tokio::spawn(async move {
            loop {
                let due = lock(&last).sent_at + period;
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = sleep_until(due.into()) => {
                        let packets = {
                            let mut last = lock(&last);
                            let now = Instant::now();
                            // A fresh frame went out while we slept
                            if last.sent_at + period > now {
                                continue;
                            }
                            last.sent_at = now;
                            if last.packets.is_empty() {
                                continue;
                            }
                            last.packets.clone()
                        };
                        trace!("WLED keepalive: resending {} packets", packets.len());
                        for packet in &packets {
                            if let Err(e) = socket.send(packet).await {
                                debug!("WLED keepalive send failed: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });
        self.keepalive = Some((token, handle));
    }

    async fn send_packets(&mut self, packets: Vec<Vec<u8>>) -> BridgeResult<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| BridgeError::ConnectionLost("wled not connected".into()))?;
        for packet in &packets {
            socket.send(packet).await?;
        }
        let mut last = lock(&self.last);
        last.packets = packets;
        last.sent_at = Instant::now();
        Ok(())
    }
}

#[async_trait]
impl LedProtocol for WledClient {
    fn name(&self) -> &'static str {
        "wled"
    }

    async fn connect(&mut self) -> BridgeResult<()> {
        let port = self.options.effective_port();
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect((self.options.host.as_str(), port)).await?;
        let socket = Arc::new(socket);
        self.socket = Some(socket.clone());
        self.spawn_keepalive(socket);
        info!(
            "WLED {} stream to {}:{}",
            self.options.variant, self.options.host, port
        );
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some((token, handle)) = self.keepalive.take() {
            token.cancel();
            let _ = handle.await;
        }
        self.socket = None;
        lock(&self.last).packets.clear();
    }

    async fn clear(&mut self) -> BridgeResult<()> {
        let black = vec![Rgb::BLACK; self.last_len];
        let packets = self.encoder.encode(&black);
        self.send_packets(packets).await
    }

    async fn send_frame(&mut self, colors: &[Rgb]) -> BridgeResult<()> {
        self.last_len = colors.len();
        let packets = self.encoder.encode(colors);
        self.send_packets(packets).await
    }
}
