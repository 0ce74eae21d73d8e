//! Classified errors delivered through the connection-error event.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Machine-usable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid endpoint/layout. Fatal, never retried.
    Configuration,
    /// Socket or serial I/O failure.
    Transport,
    /// Malformed or unexpected reply. Logged and ignored.
    Protocol,
    /// Access to the serial device or network was denied.
    Permission,
    /// An established connection dropped and reconnect is disabled.
    ConnectionLost,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Permission => "permission",
            ErrorKind::ConnectionLost => "connection_lost",
        }
    }

    /// Retrying cannot help; the user has to fix something first.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Configuration | ErrorKind::Permission)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Configuration(_) => ErrorKind::Configuration,
            BridgeError::Transport(_) => ErrorKind::Transport,
            BridgeError::Protocol(_) => ErrorKind::Protocol,
            BridgeError::Permission(_) => ErrorKind::Permission,
            BridgeError::ConnectionLost(_) => ErrorKind::ConnectionLost,
        }
    }
}

impl From<io::Error> for BridgeError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => BridgeError::Permission(e.to_string()),
            _ => BridgeError::Transport(e),
        }
    }
}

impl From<serialport::Error> for BridgeError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                BridgeError::Permission(e.description)
            }
            serialport::ErrorKind::InvalidInput => BridgeError::Configuration(e.description),
            serialport::ErrorKind::Io(kind) => {
                BridgeError::Transport(io::Error::new(kind, e.description))
            }
            serialport::ErrorKind::NoDevice | serialport::ErrorKind::Unknown => {
                BridgeError::Transport(io::Error::new(io::ErrorKind::NotFound, e.description))
            }
        }
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
