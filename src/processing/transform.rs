//! Tone mapping: brightness, contrast, saturation and output levels.

use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::error::{BridgeError, BridgeResult};

/// All values in percent; 100/100/100/0/100 is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub brightness: u16,
    pub contrast: u16,
    pub saturation: u16,
    pub black_level: u8,
    pub white_level: u8,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl TransformConfig {
    pub const IDENTITY: TransformConfig = TransformConfig {
        brightness: 100,
        contrast: 100,
        saturation: 100,
        black_level: 0,
        white_level: 100,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.white_level > 100 {
            return Err(BridgeError::config(format!(
                "white level {}% exceeds 100%",
                self.white_level
            )));
        }
        if self.black_level >= self.white_level {
            return Err(BridgeError::config(format!(
                "black level {}% must be below white level {}%",
                self.black_level, self.white_level
            )));
        }
        Ok(())
    }
}

/// Stateless per-frame color transform.
///
/// With neutral saturation every channel is independent, so the chain is
/// baked into a 256-entry table once at construction.
#[derive(Debug, Clone)]
pub struct ColorTransform {
    config: TransformConfig,
    brightness: f32,
    contrast: f32,
    saturation: f32,
    black: f32,
    white: f32,
    lut: Option<[u8; 256]>,
}

impl ColorTransform {
    pub fn new(config: TransformConfig) -> Self {
        let mut transform = Self {
            config,
            brightness: config.brightness as f32 / 100.0,
            contrast: config.contrast as f32 / 100.0,
            saturation: config.saturation as f32 / 100.0,
            black: config.black_level as f32 * 255.0 / 100.0,
            white: config.white_level as f32 * 255.0 / 100.0,
            lut: None,
        };
        if !config.is_identity() && config.saturation == 100 {
            let mut lut = [0u8; 256];
            for (v, slot) in lut.iter_mut().enumerate() {
                *slot = to_byte(transform.levels(transform.tone(v as f32)));
            }
            transform.lut = Some(lut);
        }
        transform
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn uses_lut(&self) -> bool {
        self.lut.is_some()
    }

    /// Transform `colors` in place.
    pub fn apply(&self, colors: &mut [Rgb]) {
        if self.config.is_identity() {
            return;
        }
        match &self.lut {
            Some(lut) => {
                for c in colors.iter_mut() {
                    c.set(lut[c.r as usize], lut[c.g as usize], lut[c.b as usize]);
                }
            }
            None => self.apply_per_pixel(colors),
        }
    }

    /// The full per-pixel computation, bypassing the lookup table.
    pub fn apply_per_pixel(&self, colors: &mut [Rgb]) {
        if self.config.is_identity() {
            return;
        }
        for c in colors.iter_mut() {
            let mut r = self.tone(c.r as f32);
            let mut g = self.tone(c.g as f32);
            let mut b = self.tone(c.b as f32);

            if self.config.saturation != 100 {
                let luma = 0.299 * r + 0.587 * g + 0.114 * b;
                r = clamp(luma + (r - luma) * self.saturation);
                g = clamp(luma + (g - luma) * self.saturation);
                b = clamp(luma + (b - luma) * self.saturation);
            }

            c.set(
                to_byte(self.levels(r)),
                to_byte(self.levels(g)),
                to_byte(self.levels(b)),
            );
        }
    }

    /// Brightness then contrast, on one channel.
    #[inline]
    fn tone(&self, v: f32) -> f32 {
        let v = clamp(v * self.brightness);
        clamp(128.0 + (v - 128.0) * self.contrast)
    }

    #[inline]
    fn levels(&self, v: f32) -> f32 {
        if v <= self.black {
            0.0
        } else if v >= self.white {
            255.0
        } else {
            (v - self.black) * 255.0 / (self.white - self.black)
        }
    }
}

#[inline]
fn clamp(v: f32) -> f32 {
    v.clamp(0.0, 255.0)
}

#[inline]
fn to_byte(v: f32) -> u8 {
    clamp(v).round() as u8
}
