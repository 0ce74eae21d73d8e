//! Configuration loading: defaults, optional config file, then `AMBI_*`
//! environment variables.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::capture::{BorderConfig, LedLayout};
use crate::connection::ConnectionOptions;
use crate::discovery::ScannerOptions;
use crate::error::{BridgeError, BridgeResult};
use crate::processing::{SmoothingSettings, TransformConfig};
use crate::protocols::ControllerEndpoint;

pub const APP_DIR_NAME: &str = "ambient-bridge";
pub const MAX_FRAME_RATE: u32 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Frames per second accepted from the capture source
    pub frame_rate: u32,
    pub layout: LedLayout,
    pub smoothing: SmoothingSettings,
    pub transform: TransformConfig,
    pub border: BorderConfig,
    pub controller: Option<ControllerEndpoint>,
    pub connection: ConnectionOptions,
    pub scanner: ScannerOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            layout: LedLayout::default(),
            smoothing: SmoothingSettings::default(),
            transform: TransformConfig::default(),
            border: BorderConfig::default(),
            controller: None,
            connection: ConnectionOptions::default(),
            scanner: ScannerOptions::default(),
        }
    }
}

impl Config {
    /// Everything that must hold before a connection is attempted.
    pub fn validate(&self) -> BridgeResult<()> {
        self.validate_processing()?;
        if self.connection.connect_timeout_ms == 0 || self.connection.shutdown_timeout_ms == 0 {
            return Err(BridgeError::config("connection timeouts must be non-zero"));
        }
        self.controller
            .as_ref()
            .ok_or_else(|| BridgeError::config("no controller configured"))?
            .validate()
    }

    /// Checks for the capture and processing stages only.
    pub fn validate_processing(&self) -> BridgeResult<()> {
        if self.frame_rate == 0 || self.frame_rate > MAX_FRAME_RATE {
            return Err(BridgeError::config(format!(
                "frame rate {} outside 1..={}",
                self.frame_rate, MAX_FRAME_RATE
            )));
        }
        self.layout.validate()?;
        self.smoothing.resolve().validate()?;
        self.transform.validate()
    }
}

/// Get config directory (AMBI_CONFIG_DIR or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AMBI_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    // Fallback to current directory
    PathBuf::from(".")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();
    tracing::debug!("Loading config from {}", config_dir.display());

    let config = ::config::Config::builder()
        // config.{toml,yaml,json} if present
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // AMBI_FRAME_RATE, AMBI_CONTROLLER__HOST, AMBI_LAYOUT__TOP, ...
        .add_source(
            ::config::Environment::with_prefix("AMBI")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}
