//! Wire protocols for the supported controller families.
//!
//! Each family implements [`LedProtocol`]. The connection manager picks the
//! implementation once, from the configured [`ControllerEndpoint`], and then
//! only talks to the trait.

pub mod adalight;
pub mod hyperion;
pub mod wled;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

use crate::color::Rgb;
use crate::error::{BridgeError, BridgeResult};

pub use adalight::{AdalightOptions, AdalightVariant};
pub use hyperion::HyperionOptions;
pub use wled::{WledOptions, WledVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    Hyperion,
    Wled,
    Adalight,
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolFamily::Hyperion => "hyperion",
            ProtocolFamily::Wled => "wled",
            ProtocolFamily::Adalight => "adalight",
        })
    }
}

/// Where and how to reach the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum ControllerEndpoint {
    Hyperion(HyperionOptions),
    Wled(WledOptions),
    Adalight(AdalightOptions),
}

impl ControllerEndpoint {
    pub fn family(&self) -> ProtocolFamily {
        match self {
            ControllerEndpoint::Hyperion(_) => ProtocolFamily::Hyperion,
            ControllerEndpoint::Wled(_) => ProtocolFamily::Wled,
            ControllerEndpoint::Adalight(_) => ProtocolFamily::Adalight,
        }
    }

    pub fn validate(&self) -> BridgeResult<()> {
        match self {
            ControllerEndpoint::Hyperion(o) => o.validate(),
            ControllerEndpoint::Wled(o) => o.validate(),
            ControllerEndpoint::Adalight(o) => o.validate(),
        }
    }
}

impl fmt::Display for ControllerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerEndpoint::Hyperion(o) => write!(f, "hyperion://{}:{}", o.host, o.port),
            ControllerEndpoint::Wled(o) => {
                write!(f, "wled-{}://{}:{}", o.variant, o.host, o.effective_port())
            }
            ControllerEndpoint::Adalight(o) => {
                write!(f, "adalight-{}://{}@{}", o.variant, o.device, o.baud_rate)
            }
        }
    }
}

/// One controller connection, as seen by the connection manager.
#[async_trait]
pub trait LedProtocol: Send {
    fn name(&self) -> &'static str;

    /// Open the transport and perform any handshake.
    async fn connect(&mut self) -> BridgeResult<()>;

    /// Close the transport. Safe to call when not connected.
    async fn disconnect(&mut self);

    /// Turn the LEDs off (or release them back to the controller).
    async fn clear(&mut self) -> BridgeResult<()>;

    async fn send_frame(&mut self, colors: &[Rgb]) -> BridgeResult<()>;
}

/// Build the protocol implementation for `endpoint`.
///
/// `frequency_cap` receives the highest sustainable update rate for
/// transports that have one (serial).
pub fn create(
    endpoint: &ControllerEndpoint,
    frequency_cap: watch::Sender<Option<u32>>,
) -> Box<dyn LedProtocol> {
    match endpoint {
        ControllerEndpoint::Hyperion(o) => Box::new(hyperion::HyperionClient::new(o.clone())),
        ControllerEndpoint::Wled(o) => Box::new(wled::WledClient::new(o.clone())),
        ControllerEndpoint::Adalight(o) => {
            Box::new(adalight::AdalightClient::new(o.clone(), frequency_cap))
        }
    }
}

pub(crate) fn require_host(host: &str) -> BridgeResult<()> {
    if host.trim().is_empty() {
        return Err(BridgeError::config("controller host is empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_deserializes_by_protocol_tag() {
        let json = r#"{"protocol":"wled","host":"10.0.0.5","variant":"dnrgb"}"#;
        let endpoint: ControllerEndpoint = serde_json::from_str(json).unwrap();
        match &endpoint {
            ControllerEndpoint::Wled(o) => {
                assert_eq!(o.variant, WledVariant::Dnrgb);
                assert_eq!(o.effective_port(), 21324);
            }
            other => panic!("unexpected endpoint {:?}", other),
        }
        assert_eq!(endpoint.family(), ProtocolFamily::Wled);
        assert_eq!(endpoint.to_string(), "wled-dnrgb://10.0.0.5:21324");
    }

    #[test]
    fn test_hyperion_defaults() {
        let json = r#"{"protocol":"hyperion","host":"hyperion.local"}"#;
        let endpoint: ControllerEndpoint = serde_json::from_str(json).unwrap();
        assert_eq!(endpoint.to_string(), "hyperion://hyperion.local:19400");
        assert!(endpoint.validate().is_ok());
    }

    #[test]
    fn test_empty_host_is_configuration_error() {
        let json = r#"{"protocol":"hyperion","host":" "}"#;
        let endpoint: ControllerEndpoint = serde_json::from_str(json).unwrap();
        let err = endpoint.validate().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_create_dispatches_on_family() {
        let (tx, _rx) = watch::channel(None);
        let endpoint = ControllerEndpoint::Adalight(AdalightOptions {
            device: "/dev/null".into(),
            ..Default::default()
        });
        assert_eq!(create(&endpoint, tx).name(), "adalight");
    }
}
