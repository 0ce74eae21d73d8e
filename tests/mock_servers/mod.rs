//! Mock LED controllers for integration testing
//!
//! These mock servers stand in for real controllers (Hyperion, WLED)
//! so the whole send path can be exercised without hardware.

#![allow(dead_code)]

pub mod hyperion;
pub mod wled;

pub use hyperion::{decode_request, HyperionMessage, MockHyperionServer};
pub use wled::{MockWledDevice, MockWledInfo};
