//! Letterbox / pillarbox detection with temporal stabilization.
//!
//! A raw detection is cheap but noisy: dark scenes, fades and single black
//! frames all look like borders. The detector only moves the accepted border
//! after a candidate has been seen consistently for long enough.

use serde::{Deserialize, Serialize};

use crate::capture::frame::{Frame, Rect};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BorderConfig {
    pub enabled: bool,
    /// Channel values below this percent of 255 count as black
    pub black_threshold_percent: u8,
    /// Run detection once every N frames
    pub evaluate_every: u32,
    /// Evaluations a candidate must repeat before it counts as consistent
    pub debounce: u32,
    /// Consistent evaluations before switching to a different border
    pub change_threshold: u32,
    /// Consistent evaluations before dropping to "no border known"
    pub unknown_threshold: u32,
}

impl Default for BorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            black_threshold_percent: 10,
            evaluate_every: 5,
            debounce: 3,
            change_threshold: 15,
            unknown_threshold: 120,
        }
    }
}

/// Detected black bars, in pixels from each edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Border {
    /// Nothing but black inside the probe range
    #[default]
    Unknown,
    Inset {
        horizontal: usize,
        vertical: usize,
    },
}

impl Border {
    pub const NONE: Border = Border::Inset {
        horizontal: 0,
        vertical: 0,
    };

    /// Capture rectangle left after removing the border.
    pub fn crop(&self, bounds: Rect) -> Rect {
        match *self {
            Border::Unknown => bounds,
            Border::Inset {
                horizontal,
                vertical,
            } => {
                if 2 * horizontal >= bounds.width || 2 * vertical >= bounds.height {
                    return bounds;
                }
                Rect::new(
                    bounds.x + horizontal,
                    bounds.y + vertical,
                    bounds.width - 2 * horizontal,
                    bounds.height - 2 * vertical,
                )
            }
        }
    }
}

/// Single-frame border estimate from three probe lines per axis.
pub fn detect(frame: &Frame<'_>, threshold: u8) -> Border {
    let w = frame.width();
    let h = frame.height();
    let is_black = |x: usize, y: usize| {
        let c = frame.pixel(x, y);
        c.r < threshold && c.g < threshold && c.b < threshold
    };

    let columns = [w / 3, 2 * w / 3, w / 2];
    let rows = [h / 3, 2 * h / 3, h / 2];
    let max_v = h.div_ceil(2);
    let max_h = w.div_ceil(2);

    // First non-black row from the top and from the bottom
    let top = (0..max_v).find(|&y| columns.iter().any(|&x| !is_black(x, y)));
    let bottom = (0..max_v).find(|&d| columns.iter().any(|&x| !is_black(x, h - 1 - d)));
    let left = (0..max_h).find(|&x| rows.iter().any(|&y| !is_black(x, y)));
    let right = (0..max_h).find(|&d| rows.iter().any(|&y| !is_black(w - 1 - d, y)));

    match (top, bottom, left, right) {
        (Some(t), Some(b), Some(l), Some(r)) => Border::Inset {
            horizontal: l.min(r),
            vertical: t.min(b),
        },
        _ => Border::Unknown,
    }
}

/// Stabilizes raw detections across frames.
#[derive(Debug)]
pub struct BorderDetector {
    config: BorderConfig,
    threshold: u8,
    frame_counter: u32,
    current: Border,
    candidate: Border,
    consistent: u32,
    adopted_once: bool,
}

impl BorderDetector {
    pub fn new(config: BorderConfig) -> Self {
        let threshold = ((config.black_threshold_percent.min(100) as u32 * 255 + 50) / 100) as u8;
        Self {
            config,
            threshold,
            frame_counter: 0,
            current: Border::Unknown,
            candidate: Border::Unknown,
            consistent: 0,
            adopted_once: false,
        }
    }

    pub fn current(&self) -> Border {
        self.current
    }

    /// Feed a frame; returns the currently accepted border.
    pub fn process(&mut self, frame: &Frame<'_>) -> Border {
        if !self.config.enabled {
            return Border::NONE;
        }
        let every = self.config.evaluate_every.max(1);
        let due = self.frame_counter % every == 0;
        self.frame_counter = self.frame_counter.wrapping_add(1);
        if due {
            let detected = detect(frame, self.threshold);
            self.observe(detected);
        }
        self.current
    }

    /// Apply one evaluation result to the stabilization state.
    pub fn observe(&mut self, detected: Border) -> bool {
        if detected == self.candidate {
            self.consistent = self.consistent.saturating_add(1);
        } else {
            self.candidate = detected;
            self.consistent = 1;
        }

        if self.consistent < self.config.debounce || detected == self.current {
            return false;
        }

        let required = if !self.adopted_once {
            self.config.debounce
        } else if detected == Border::Unknown {
            self.config.unknown_threshold
        } else {
            self.config.change_threshold
        };

        if self.consistent >= required {
            tracing::debug!("Border changed: {:?} -> {:?}", self.current, detected);
            self.current = detected;
            self.adopted_once = true;
            return true;
        }
        false
    }
}
