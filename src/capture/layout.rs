//! LED perimeter geometry.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Largest capture margin, in percent of each dimension.
pub const MAX_MARGIN_PERCENT: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Top,
    Right,
    Bottom,
    Left,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideMode {
    #[default]
    Enabled,
    /// Keeps its slots but always emits black
    Disabled,
    /// No LEDs on this side at all
    NotInstalled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartCorner {
    #[default]
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Clockwise,
    Counterclockwise,
}

/// One leg of the traversal: which side, and whether it runs against the
/// side's natural left-to-right / top-to-bottom orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub side: Side,
    pub reversed: bool,
}

const fn seg(side: Side, reversed: bool) -> Segment {
    Segment { side, reversed }
}

/// The eight sweeps around the rectangle, one per (corner, direction).
pub fn traversal(start: StartCorner, direction: Direction) -> [Segment; 4] {
    use Side::*;
    match (start, direction) {
        (StartCorner::TopLeft, Direction::Clockwise) => [
            seg(Top, false),
            seg(Right, false),
            seg(Bottom, true),
            seg(Left, true),
        ],
        (StartCorner::TopRight, Direction::Clockwise) => [
            seg(Right, false),
            seg(Bottom, true),
            seg(Left, true),
            seg(Top, false),
        ],
        (StartCorner::BottomRight, Direction::Clockwise) => [
            seg(Bottom, true),
            seg(Left, true),
            seg(Top, false),
            seg(Right, false),
        ],
        (StartCorner::BottomLeft, Direction::Clockwise) => [
            seg(Left, true),
            seg(Top, false),
            seg(Right, false),
            seg(Bottom, true),
        ],
        (StartCorner::TopLeft, Direction::Counterclockwise) => [
            seg(Left, false),
            seg(Bottom, false),
            seg(Right, true),
            seg(Top, true),
        ],
        (StartCorner::TopRight, Direction::Counterclockwise) => [
            seg(Top, true),
            seg(Left, false),
            seg(Bottom, false),
            seg(Right, true),
        ],
        (StartCorner::BottomRight, Direction::Counterclockwise) => [
            seg(Right, true),
            seg(Top, true),
            seg(Left, false),
            seg(Bottom, false),
        ],
        (StartCorner::BottomLeft, Direction::Counterclockwise) => [
            seg(Bottom, false),
            seg(Right, true),
            seg(Top, true),
            seg(Left, false),
        ],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedLayout {
    pub top: usize,
    pub right: usize,
    pub bottom: usize,
    pub left: usize,
    pub top_mode: SideMode,
    pub right_mode: SideMode,
    pub bottom_mode: SideMode,
    pub left_mode: SideMode,
    pub start_corner: StartCorner,
    pub direction: Direction,
    /// LEDs blacked out in the middle of the bottom side
    pub bottom_gap: usize,
    pub margin_percent: u8,
    /// Circular shift applied after traversal, any sign
    pub offset: i64,
    /// Radius of the averaging block around each sample point
    pub sample_radius: usize,
}

impl Default for LedLayout {
    fn default() -> Self {
        Self {
            top: 0,
            right: 0,
            bottom: 0,
            left: 0,
            top_mode: SideMode::Enabled,
            right_mode: SideMode::Enabled,
            bottom_mode: SideMode::Enabled,
            left_mode: SideMode::Enabled,
            start_corner: StartCorner::TopLeft,
            direction: Direction::Clockwise,
            bottom_gap: 0,
            margin_percent: 0,
            offset: 0,
            sample_radius: 0,
        }
    }
}

impl LedLayout {
    /// Convenience for the common all-enabled layout.
    pub fn with_counts(top: usize, right: usize, bottom: usize, left: usize) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
            ..Default::default()
        }
    }

    pub fn mode(&self, side: Side) -> SideMode {
        match side {
            Side::Top => self.top_mode,
            Side::Right => self.right_mode,
            Side::Bottom => self.bottom_mode,
            Side::Left => self.left_mode,
        }
    }

    pub fn raw_count(&self, side: Side) -> usize {
        match side {
            Side::Top => self.top,
            Side::Right => self.right,
            Side::Bottom => self.bottom,
            Side::Left => self.left,
        }
    }

    /// Slots a side occupies in the output sequence.
    pub fn count(&self, side: Side) -> usize {
        if self.mode(side) == SideMode::NotInstalled {
            0
        } else {
            self.raw_count(side)
        }
    }

    pub fn total(&self) -> usize {
        [Side::Top, Side::Right, Side::Bottom, Side::Left]
            .iter()
            .map(|&s| self.count(s))
            .sum()
    }

    /// Offset normalized into `[0, total)`; zero for an empty layout.
    pub fn normalized_offset(&self) -> usize {
        let total = self.total() as i64;
        if total == 0 {
            return 0;
        }
        self.offset.rem_euclid(total) as usize
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.margin_percent > MAX_MARGIN_PERCENT {
            return Err(BridgeError::config(format!(
                "capture margin {}% exceeds {}%",
                self.margin_percent, MAX_MARGIN_PERCENT
            )));
        }
        if self.total() == 0 {
            return Err(BridgeError::config("LED layout has no installed LEDs"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_skips_not_installed() {
        let mut layout = LedLayout::with_counts(10, 5, 10, 5);
        assert_eq!(layout.total(), 30);

        layout.right_mode = SideMode::Disabled;
        assert_eq!(layout.total(), 30);

        layout.left_mode = SideMode::NotInstalled;
        assert_eq!(layout.total(), 25);
    }

    #[test]
    fn test_all_not_installed_is_empty() {
        let layout = LedLayout {
            top_mode: SideMode::NotInstalled,
            right_mode: SideMode::NotInstalled,
            bottom_mode: SideMode::NotInstalled,
            left_mode: SideMode::NotInstalled,
            ..LedLayout::with_counts(10, 5, 10, 5)
        };
        assert_eq!(layout.total(), 0);
        assert_eq!(layout.normalized_offset(), 0);
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_negative_offset_normalizes() {
        let layout = LedLayout {
            offset: -3,
            ..LedLayout::with_counts(10, 0, 0, 0)
        };
        assert_eq!(layout.normalized_offset(), 7);

        let layout = LedLayout {
            offset: 23,
            ..LedLayout::with_counts(10, 0, 0, 0)
        };
        assert_eq!(layout.normalized_offset(), 3);
    }

    #[test]
    fn test_every_traversal_visits_each_side_once() {
        let corners = [
            StartCorner::TopLeft,
            StartCorner::TopRight,
            StartCorner::BottomRight,
            StartCorner::BottomLeft,
        ];
        for corner in corners {
            for direction in [Direction::Clockwise, Direction::Counterclockwise] {
                let order = traversal(corner, direction);
                for side in [Side::Top, Side::Right, Side::Bottom, Side::Left] {
                    assert_eq!(
                        order.iter().filter(|s| s.side == side).count(),
                        1,
                        "{:?} {:?}",
                        corner,
                        direction
                    );
                }
            }
        }
    }

    #[test]
    fn test_margin_over_limit_rejected() {
        let layout = LedLayout {
            margin_percent: 41,
            ..LedLayout::with_counts(1, 1, 1, 1)
        };
        assert!(layout.validate().is_err());
    }
}
