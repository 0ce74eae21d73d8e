//! Borrowed view over a producer's pixel buffer.

use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::error::{BridgeError, BridgeResult};

/// Clockwise rotation needed to bring the buffer upright.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// Axis-aligned rectangle in logical (upright) frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Shrink every edge by `percent` of the matching dimension.
    pub fn inset_percent(&self, percent: u8) -> Rect {
        let dx = self.width * percent as usize / 100;
        let dy = self.height * percent as usize / 100;
        Rect {
            x: self.x + dx,
            y: self.y + dy,
            width: self.width.saturating_sub(2 * dx).max(1),
            height: self.height.saturating_sub(2 * dy).max(1),
        }
    }
}

/// A frame as handed over by the capture backend. The core only reads it.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    data: &'a [u8],
    buffer_width: usize,
    buffer_height: usize,
    format: PixelFormat,
    rotation: Rotation,
}

impl<'a> Frame<'a> {
    /// Wrap a packed RGB or RGBA buffer; the format is inferred from its length.
    pub fn new(
        data: &'a [u8],
        width: usize,
        height: usize,
        rotation: Rotation,
    ) -> BridgeResult<Self> {
        if width == 0 || height == 0 {
            return Err(BridgeError::config(format!(
                "frame has no pixels ({}x{})",
                width, height
            )));
        }
        let pixels = width * height;
        let format = if data.len() == pixels * 4 {
            PixelFormat::Rgba
        } else if data.len() == pixels * 3 {
            PixelFormat::Rgb
        } else {
            return Err(BridgeError::config(format!(
                "buffer of {} bytes does not match {}x{} RGB or RGBA",
                data.len(),
                width,
                height
            )));
        };
        Ok(Self {
            data,
            buffer_width: width,
            buffer_height: height,
            format,
            rotation,
        })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Logical width after rotation.
    pub fn width(&self) -> usize {
        if self.rotation.swaps_axes() {
            self.buffer_height
        } else {
            self.buffer_width
        }
    }

    /// Logical height after rotation.
    pub fn height(&self) -> usize {
        if self.rotation.swaps_axes() {
            self.buffer_width
        } else {
            self.buffer_height
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width(), self.height())
    }

    /// Read the pixel at logical `(x, y)`, clamping to the frame extents.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> Rgb {
        let x = x.min(self.width() - 1);
        let y = y.min(self.height() - 1);
        let (bx, by) = match self.rotation {
            Rotation::None => (x, y),
            Rotation::Cw90 => (y, self.buffer_height - 1 - x),
            Rotation::Cw180 => (self.buffer_width - 1 - x, self.buffer_height - 1 - y),
            Rotation::Cw270 => (self.buffer_width - 1 - y, x),
        };
        let offset = (by * self.buffer_width + bx) * self.format.bytes_per_pixel();
        Rgb::new(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        )
    }
}
