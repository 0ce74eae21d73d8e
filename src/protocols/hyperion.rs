//! Hyperion FlatBuffers client (TCP).
//!
//! Every message is a `hyperionnet.Request` table prefixed by its length as
//! a 4-byte big-endian integer. The client registers once after connecting
//! and then streams LED colors as a one-row raw image.

use async_trait::async_trait;
use flatbuffers::{FlatBufferBuilder, WIPOffset};
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

use super::{require_host, LedProtocol};
use crate::color::Rgb;
use crate::error::{BridgeError, BridgeResult};

pub const DEFAULT_PORT: u16 = 19400;
pub const DEFAULT_PRIORITY: i32 = 150;
/// Priorities Hyperion accepts from external FlatBuffers clients.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<i32> = 100..=199;

// Request.command union tags
const COMMAND_COLOR: u8 = 1;
const COMMAND_IMAGE: u8 = 2;
const COMMAND_CLEAR: u8 = 3;
const COMMAND_REGISTER: u8 = 4;
// Image.data union tag
const IMAGE_TYPE_RAW: u8 = 1;

// Field slots (vtable offsets): 4 + 2 * field index
const SLOT_0: u16 = 4;
const SLOT_1: u16 = 6;
const SLOT_2: u16 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperionOptions {
    pub host: String,
    pub port: u16,
    pub priority: i32,
    /// Shown in Hyperion's input list; defaults to `ambient-bridge@<hostname>`
    pub origin: Option<String>,
    /// How long Hyperion keeps each frame, -1 for indefinitely
    pub duration_ms: i32,
}

impl Default for HyperionOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            priority: DEFAULT_PRIORITY,
            origin: None,
            duration_ms: -1,
        }
    }
}

impl HyperionOptions {
    pub fn validate(&self) -> BridgeResult<()> {
        require_host(&self.host)?;
        if self.port == 0 {
            return Err(BridgeError::config("hyperion port must be non-zero"));
        }
        if !PRIORITY_RANGE.contains(&self.priority) {
            return Err(BridgeError::config(format!(
                "hyperion priority {} outside {}..={}",
                self.priority,
                PRIORITY_RANGE.start(),
                PRIORITY_RANGE.end()
            )));
        }
        Ok(())
    }

    pub fn origin(&self) -> String {
        self.origin.clone().unwrap_or_else(default_origin)
    }
}

fn default_origin() -> String {
    format!(
        "ambient-bridge@{}",
        gethostname::gethostname().to_string_lossy()
    )
}

/// Finish `command` into a `Request` and add the length prefix.
fn finish_request(
    mut fbb: FlatBufferBuilder<'_>,
    command_type: u8,
    command: WIPOffset<flatbuffers::TableFinishedWIPOffset>,
) -> Vec<u8> {
    let start = fbb.start_table();
    fbb.push_slot_always(SLOT_1, command);
    fbb.push_slot_always(SLOT_0, command_type);
    let request = fbb.end_table(start);
    fbb.finish(request, None);

    let body = fbb.finished_data();
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub fn encode_register(origin: &str, priority: i32) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::with_capacity(64 + origin.len());
    let origin = fbb.create_string(origin);
    let start = fbb.start_table();
    fbb.push_slot_always(SLOT_0, origin);
    fbb.push_slot_always(SLOT_1, priority);
    let register = fbb.end_table(start);
    finish_request(fbb, COMMAND_REGISTER, register)
}

pub fn encode_clear(priority: i32) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::with_capacity(32);
    let start = fbb.start_table();
    fbb.push_slot_always(SLOT_0, priority);
    let clear = fbb.end_table(start);
    finish_request(fbb, COMMAND_CLEAR, clear)
}

pub fn encode_color(color: Rgb, duration_ms: i32) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::with_capacity(32);
    let start = fbb.start_table();
    fbb.push_slot_always(SLOT_0, color.to_packed());
    fbb.push_slot_always(SLOT_1, duration_ms);
    let command = fbb.end_table(start);
    finish_request(fbb, COMMAND_COLOR, command)
}

/// `rgb` holds `width * height` packed RGB triples.
pub fn encode_image(rgb: &[u8], width: i32, height: i32, duration_ms: i32) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::with_capacity(64 + rgb.len());
    let data = fbb.create_vector(rgb);
    let start = fbb.start_table();
    fbb.push_slot_always(SLOT_0, data);
    fbb.push_slot_always(SLOT_1, width);
    fbb.push_slot_always(SLOT_2, height);
    let raw = fbb.end_table(start);

    let start = fbb.start_table();
    fbb.push_slot_always(SLOT_1, raw);
    fbb.push_slot_always(SLOT_2, duration_ms);
    fbb.push_slot_always(SLOT_0, IMAGE_TYPE_RAW);
    let image = fbb.end_table(start);
    finish_request(fbb, COMMAND_IMAGE, image)
}

pub struct HyperionClient {
    options: HyperionOptions,
    stream: Option<TcpStream>,
    rgb: Vec<u8>,
}

impl HyperionClient {
    pub fn new(options: HyperionOptions) -> Self {
        Self {
            options,
            stream: None,
            rgb: Vec::new(),
        }
    }

    async fn write(&mut self, message: &[u8]) -> BridgeResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| BridgeError::ConnectionLost("hyperion not connected".into()))?;
        stream.write_all(message).await?;
        Ok(())
    }

    /// Read whatever replies are already buffered without waiting.
    fn drain_replies(&mut self) -> BridgeResult<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Ok(());
        };
        let mut buf = [0u8; 1024];
        loop {
            match stream.try_read(&mut buf) {
                Ok(0) => {
                    return Err(BridgeError::Transport(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "hyperion closed the connection",
                    )));
                }
                Ok(n) => debug!("Hyperion reply: {} bytes", n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl LedProtocol for HyperionClient {
    fn name(&self) -> &'static str {
        "hyperion"
    }

    async fn connect(&mut self) -> BridgeResult<()> {
        let addr = (self.options.host.as_str(), self.options.port);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);

        let origin = self.options.origin();
        self.write(&encode_register(&origin, self.options.priority))
            .await?;
        info!(
            "Registered with Hyperion at {}:{} as {} (priority {})",
            self.options.host, self.options.port, origin, self.options.priority
        );
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.stream.is_none() {
            return;
        }
        if let Err(e) = self.write(&encode_clear(self.options.priority)).await {
            debug!("Hyperion clear on disconnect failed: {}", e);
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    async fn clear(&mut self) -> BridgeResult<()> {
        self.write(&encode_clear(self.options.priority)).await
    }

    async fn send_frame(&mut self, colors: &[Rgb]) -> BridgeResult<()> {
        if colors.is_empty() {
            return Ok(());
        }
        let message = match colors.split_first() {
            Some((first, rest)) if rest.iter().all(|c| c == first) => {
                encode_color(*first, self.options.duration_ms)
            }
            _ => {
                self.rgb.clear();
                self.rgb
                    .extend(colors.iter().flat_map(|c| [c.r, c.g, c.b]));
                encode_image(&self.rgb, colors.len() as i32, 1, self.options.duration_ms)
            }
        };
        trace!("Hyperion frame: {} bytes", message.len());
        self.write(&message).await?;
        self.drain_replies()
    }
}
