//! Controller connection lifecycle.

mod manager;

pub use manager::{ConnectionManager, ProtocolFactory};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle of a controller connection.
///
/// `Disconnected -> Connecting -> Connected | Failed`, then
/// `Connected -> Reconnecting -> Connected | Disconnected | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// The first connection attempt failed, or a later failure needs user
    /// action (permission, configuration); nothing is retried
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        })
    }
}

/// Reconnect and teardown policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Retry after a dropped connection (never after a failed first connect)
    pub reconnect: bool,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Bound on waiting for the send worker during disconnect
    pub shutdown_timeout_ms: u64,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnect: true,
            reconnect_delay_ms: 2000,
            connect_timeout_ms: 5000,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl ConnectionOptions {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
