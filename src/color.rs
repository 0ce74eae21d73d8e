//! Color sample type shared by every pipeline stage.

use serde::{Deserialize, Serialize};

/// A single LED color.
///
/// Sequences of samples are reused frame to frame, so the type is `Copy` and
/// mutated in place rather than rebuilt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[inline]
    pub fn set(&mut self, r: u8, g: u8, b: u8) {
        self.r = r;
        self.g = g;
        self.b = b;
    }

    /// Rec. 601 luma, the same weights the saturation stage blends toward.
    #[inline]
    pub fn luma(&self) -> f32 {
        0.299 * self.r as f32 + 0.587 * self.g as f32 + 0.114 * self.b as f32
    }

    /// Scale all channels by `cap / 255`. A cap of 255 is a no-op.
    #[inline]
    pub fn scale(self, cap: u8) -> Self {
        if cap == u8::MAX {
            return self;
        }
        let scale = |v: u8| ((v as u16 * cap as u16 + 127) / 255) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }

    /// Pack as `0x00RRGGBB`.
    pub fn to_packed(self) -> i32 {
        ((self.r as i32) << 16) | ((self.g as i32) << 8) | self.b as i32
    }
}

impl From<[u8; 3]> for Rgb {
    fn from(v: [u8; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Physical channel order of a strip, applied per triple on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Grb,
    Brg,
    Rbg,
    Gbr,
    Bgr,
}

impl ChannelOrder {
    #[inline]
    pub fn apply(self, c: Rgb) -> [u8; 3] {
        match self {
            ChannelOrder::Rgb => [c.r, c.g, c.b],
            ChannelOrder::Grb => [c.g, c.r, c.b],
            ChannelOrder::Brg => [c.b, c.r, c.g],
            ChannelOrder::Rbg => [c.r, c.b, c.g],
            ChannelOrder::Gbr => [c.g, c.b, c.r],
            ChannelOrder::Bgr => [c.b, c.g, c.r],
        }
    }
}
