//! Ambient Bridge - Rust Implementation
//!
//! Screen-to-LED ambient lighting: captured frames are mapped onto the LED
//! perimeter of a display and streamed to an external controller.
//!
//! This library provides:
//! - Perimeter mapping with letterbox detection
//! - Tone mapping and temporal smoothing
//! - Hyperion (TCP/FlatBuffers), WLED (UDP DDP/DRGB/DNRGB) and
//!   Adalight (serial ADA/LBAPA/AWA) output
//! - Connection supervision with reconnect
//! - Subnet scanning for controllers

pub mod bus;
pub mod capture;
pub mod color;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod pipeline;
pub mod processing;
pub mod protocols;
pub(crate) mod util;

pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use pipeline::{AmbientPipeline, CaptureState, PipelineStats};
