//! Adalight-family serial protocols (ADA, LBAPA, AWA) and the
//! baud-rate-derived update throttle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use super::LedProtocol;
use crate::color::{ChannelOrder, Rgb};
use crate::error::{BridgeError, BridgeResult};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const HEADER_LEN: usize = 6;
pub const AWA_TRAILER_LEN: usize = 3;
const LBAPA_START_FRAME: [u8; 4] = [0; 4];
const LBAPA_LED_PREFIX: u8 = 0xFF;
const MAX_THROTTLE_HZ: u32 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdalightVariant {
    #[default]
    Ada,
    Lbapa,
    Awa,
}

impl fmt::Display for AdalightVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdalightVariant::Ada => "ada",
            AdalightVariant::Lbapa => "lbapa",
            AdalightVariant::Awa => "awa",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdalightOptions {
    /// Serial device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub device: String,
    pub baud_rate: u32,
    pub variant: AdalightVariant,
    pub color_order: ChannelOrder,
    pub brightness_cap: u8,
    pub write_timeout_ms: u64,
}

impl Default for AdalightOptions {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            variant: AdalightVariant::Ada,
            color_order: ChannelOrder::Rgb,
            brightness_cap: u8::MAX,
            write_timeout_ms: 1000,
        }
    }
}

impl AdalightOptions {
    pub fn validate(&self) -> BridgeResult<()> {
        if self.device.trim().is_empty() {
            return Err(BridgeError::config("serial device is empty"));
        }
        if self.baud_rate == 0 {
            return Err(BridgeError::config("baud rate must be non-zero"));
        }
        Ok(())
    }
}

/// `'A' 'd'|'w' 'a'`, big-endian count field, `hi ^ lo ^ 0x55`.
pub fn header(magic: [u8; 3], count_field: u16) -> [u8; HEADER_LEN] {
    let [hi, lo] = count_field.to_be_bytes();
    [magic[0], magic[1], magic[2], hi, lo, hi ^ lo ^ 0x55]
}

/// Fletcher-style trailer over the LED payload.
pub fn awa_trailer(payload: &[u8]) -> [u8; AWA_TRAILER_LEN] {
    let mut fletcher1: u16 = 0;
    let mut fletcher2: u16 = 0;
    let mut extended: u16 = 0;
    for (position, &byte) in payload.iter().enumerate() {
        fletcher1 = (fletcher1 + byte as u16) % 255;
        fletcher2 = (fletcher2 + fletcher1) % 255;
        extended = (extended + (byte ^ position as u8) as u16) % 255;
    }
    // 0x41 would read as the start of a header
    let extended = if extended == 0x41 { 0xAA } else { extended as u8 };
    [fletcher1 as u8, fletcher2 as u8, extended]
}

fn lbapa_end_frame_len(led_count: usize) -> usize {
    led_count.div_ceil(16).max(4)
}

/// Total bytes on the wire for one frame.
pub fn packet_size(variant: AdalightVariant, led_count: usize) -> usize {
    match variant {
        AdalightVariant::Ada => HEADER_LEN + led_count * 3,
        AdalightVariant::Lbapa => {
            HEADER_LEN + LBAPA_START_FRAME.len() + led_count * 4 + lbapa_end_frame_len(led_count)
        }
        AdalightVariant::Awa => HEADER_LEN + led_count * 3 + AWA_TRAILER_LEN,
    }
}

/// Highest update rate the link sustains: 10 bits per byte on the wire,
/// 10% headroom, clamped to 1..=60 Hz.
pub fn max_frequency(baud_rate: u32, packet_size: usize) -> u32 {
    if packet_size == 0 {
        return MAX_THROTTLE_HZ;
    }
    let hz = baud_rate as f64 / 10.0 / packet_size as f64 * 0.9;
    (hz.floor() as u32).clamp(1, MAX_THROTTLE_HZ)
}

/// The rate actually used: never above what was requested.
pub fn effective_frequency(requested: u32, max: Option<u32>) -> u32 {
    match max {
        Some(max) => requested.min(max),
        None => requested,
    }
}

/// Serialize one frame into `out`, replacing its contents.
pub fn encode(
    variant: AdalightVariant,
    colors: &[Rgb],
    order: ChannelOrder,
    cap: u8,
    out: &mut Vec<u8>,
) -> BridgeResult<()> {
    let n = colors.len();
    if n == 0 || n > u16::MAX as usize {
        return Err(BridgeError::config(format!(
            "adalight supports 1..={} LEDs, got {}",
            u16::MAX,
            n
        )));
    }
    out.clear();
    out.reserve(packet_size(variant, n));
    let triples = colors.iter().map(|c| order.apply(c.scale(cap)));

    match variant {
        AdalightVariant::Ada => {
            out.extend_from_slice(&header(*b"Ada", (n - 1) as u16));
            triples.for_each(|t| out.extend_from_slice(&t));
        }
        AdalightVariant::Lbapa => {
            out.extend_from_slice(&header(*b"Ada", n as u16));
            out.extend_from_slice(&LBAPA_START_FRAME);
            triples.for_each(|t| {
                out.push(LBAPA_LED_PREFIX);
                out.extend_from_slice(&t);
            });
            out.resize(out.len() + lbapa_end_frame_len(n), 0);
        }
        AdalightVariant::Awa => {
            out.extend_from_slice(&header(*b"Awa", (n - 1) as u16));
            triples.for_each(|t| out.extend_from_slice(&t));
            let trailer = awa_trailer(&out[HEADER_LEN..]);
            out.extend_from_slice(&trailer);
        }
    }
    Ok(())
}

type Port = Box<dyn serialport::SerialPort>;

fn join_error(e: tokio::task::JoinError) -> BridgeError {
    BridgeError::Transport(io::Error::other(e.to_string()))
}

pub struct AdalightClient {
    options: AdalightOptions,
    /// Moved into the blocking writer for each frame and handed back after.
    port: Option<Port>,
    buffer: Vec<u8>,
    frequency_cap: watch::Sender<Option<u32>>,
    last_packet_size: usize,
    last_len: usize,
}

impl AdalightClient {
    pub fn new(options: AdalightOptions, frequency_cap: watch::Sender<Option<u32>>) -> Self {
        Self {
            options,
            port: None,
            buffer: Vec::new(),
            frequency_cap,
            last_packet_size: 0,
            last_len: 0,
        }
    }

    fn update_throttle(&mut self, size: usize) {
        if size == self.last_packet_size {
            return;
        }
        self.last_packet_size = size;
        let max = max_frequency(self.options.baud_rate, size);
        info!(
            "Adalight packet {} bytes at {} baud: max {} Hz",
            size, self.options.baud_rate, max
        );
        self.frequency_cap.send_replace(Some(max));
    }

    async fn write_buffer(&mut self) -> BridgeResult<()> {
        let mut port = self
            .port
            .take()
            .ok_or_else(|| BridgeError::ConnectionLost("serial port not open".into()))?;
        let buffer = std::mem::take(&mut self.buffer);

        let (port, buffer, result) = tokio::task::spawn_blocking(move || {
            let result = port.write_all(&buffer).and_then(|_| port.flush());
            (port, buffer, result)
        })
        .await
        .map_err(join_error)?;

        self.buffer = buffer;
        result?;
        self.port = Some(port);
        Ok(())
    }
}

#[async_trait]
impl LedProtocol for AdalightClient {
    fn name(&self) -> &'static str {
        "adalight"
    }

    async fn connect(&mut self) -> BridgeResult<()> {
        let device = self.options.device.clone();
        let baud = self.options.baud_rate;
        let timeout = Duration::from_millis(self.options.write_timeout_ms);

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(device, baud).timeout(timeout).open()
        })
        .await
        .map_err(join_error)??;
        self.port = Some(port);
        info!(
            "Opened {} at {} baud ({})",
            self.options.device, baud, self.options.variant
        );
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed {}", self.options.device);
        }
        self.frequency_cap.send_replace(None);
        self.last_packet_size = 0;
    }

    async fn clear(&mut self) -> BridgeResult<()> {
        if self.last_len == 0 {
            return Ok(());
        }
        let black = vec![Rgb::BLACK; self.last_len];
        self.send_frame(&black).await
    }

    async fn send_frame(&mut self, colors: &[Rgb]) -> BridgeResult<()> {
        if colors.is_empty() {
            return Ok(());
        }
        encode(
            self.options.variant,
            colors,
            self.options.color_order,
            self.options.brightness_cap,
            &mut self.buffer,
        )?;
        self.last_len = colors.len();
        self.update_throttle(self.buffer.len());
        trace!("Adalight frame: {} bytes", self.buffer.len());
        self.write_buffer().await
    }
}
