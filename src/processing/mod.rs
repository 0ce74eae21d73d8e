//! Per-frame color processing between sampling and output.

pub mod smoother;
pub mod transform;

pub use smoother::{
    ColorSmoother, DelayQueue, FrameSink, SmoothingConfig, SmoothingPreset, SmoothingSettings,
    SmoothingState,
};
pub use transform::{ColorTransform, TransformConfig};
