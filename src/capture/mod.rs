//! Frame ingestion: borrowed frames, layout geometry, letterbox detection
//! and perimeter mapping.

pub mod border;
pub mod frame;
pub mod layout;
pub mod mapper;
pub mod test_pattern;

pub use border::{Border, BorderConfig, BorderDetector};
pub use frame::{Frame, PixelFormat, Rect, Rotation};
pub use layout::{Direction, LedLayout, Side, SideMode, StartCorner};
pub use mapper::PerimeterMapper;
pub use test_pattern::TestPattern;
