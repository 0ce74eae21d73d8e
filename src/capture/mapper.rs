//! Perimeter mapping: pixel buffer + layout geometry → ordered LED colors.

use crate::capture::frame::{Frame, Rect};
use crate::capture::layout::{traversal, LedLayout, Side, SideMode};
use crate::color::Rgb;

/// Maps frames onto the LED perimeter.
///
/// Holds a scratch buffer for the unshifted sequence so that steady-state
/// mapping does not allocate.
#[derive(Debug, Default)]
pub struct PerimeterMapper {
    unshifted: Vec<Rgb>,
}

impl PerimeterMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill `out` with one color per installed LED, in traversal order and
    /// rotated by the layout offset.
    ///
    /// `capture` is the region of interest (typically the frame minus any
    /// detected letterbox); it is clamped to the frame. `out` is only resized
    /// when the LED count changes.
    pub fn map(&mut self, frame: &Frame<'_>, capture: Rect, layout: &LedLayout, out: &mut Vec<Rgb>) {
        let total = layout.total();
        if total == 0 {
            out.clear();
            return;
        }
        resize_if_needed(&mut self.unshifted, total);
        resize_if_needed(out, total);

        let area = clamp_rect(capture, frame.bounds()).inset_percent(layout.margin_percent);

        let mut idx = 0;
        for segment in traversal(layout.start_corner, layout.direction) {
            let side = segment.side;
            let n = layout.count(side);
            if n == 0 {
                continue;
            }
            let gap = if side == Side::Bottom {
                gap_range(n, layout.bottom_gap)
            } else {
                0..0
            };
            let disabled = layout.mode(side) == SideMode::Disabled;

            for k in 0..n {
                let i = if segment.reversed { n - 1 - k } else { k };
                self.unshifted[idx] = if disabled || gap.contains(&i) {
                    Rgb::BLACK
                } else {
                    let (x, y) = sample_point(side, i, n, &area);
                    sample(frame, x, y, layout.sample_radius)
                };
                idx += 1;
            }
        }

        let offset = layout.normalized_offset();
        for (j, slot) in out.iter_mut().enumerate() {
            *slot = self.unshifted[(j + offset) % total];
        }
    }
}

fn resize_if_needed(buf: &mut Vec<Rgb>, len: usize) {
    if buf.len() != len {
        buf.resize(len, Rgb::BLACK);
    }
}

/// Centered gap on the bottom side, in left-to-right index space.
fn gap_range(n: usize, gap: usize) -> std::ops::Range<usize> {
    let gap = gap.min(n);
    let start = (n - gap) / 2;
    start..start + gap
}

fn clamp_rect(rect: Rect, bounds: Rect) -> Rect {
    if rect.is_empty() || rect.x >= bounds.width || rect.y >= bounds.height {
        return bounds;
    }
    Rect {
        x: rect.x,
        y: rect.y,
        width: rect.width.min(bounds.width - rect.x),
        height: rect.height.min(bounds.height - rect.y),
    }
}

/// Point `i` of `n` evenly spaced along `side`, at the center of its cell.
fn sample_point(side: Side, i: usize, n: usize, area: &Rect) -> (usize, usize) {
    let along = |len: usize| (2 * i + 1) * len / (2 * n);
    let right = area.x + area.width - 1;
    let bottom = area.y + area.height - 1;
    match side {
        Side::Top => (area.x + along(area.width), area.y),
        Side::Bottom => (area.x + along(area.width), bottom),
        Side::Left => (area.x, area.y + along(area.height)),
        Side::Right => (right, area.y + along(area.height)),
    }
}

fn sample(frame: &Frame<'_>, x: usize, y: usize, radius: usize) -> Rgb {
    if radius == 0 {
        return frame.pixel(x, y);
    }
    let x0 = x.saturating_sub(radius);
    let y0 = y.saturating_sub(radius);
    let x1 = (x + radius).min(frame.width() - 1);
    let y1 = (y + radius).min(frame.height() - 1);

    let (mut r, mut g, mut b, mut n) = (0u32, 0u32, 0u32, 0u32);
    for py in y0..=y1 {
        for px in x0..=x1 {
            let c = frame.pixel(px, py);
            r += c.r as u32;
            g += c.g as u32;
            b += c.b as u32;
            n += 1;
        }
    }
    Rgb::new((r / n) as u8, (g / n) as u8, (b / n) as u8)
}
