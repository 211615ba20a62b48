//! Types shared between the frame source, the detection pipeline and the
//! overlay consumer.

mod detection;
mod frame;

pub use detection::{BoundingBox, CoordinateSpace, Detection, DetectionSet, ParseSpaceError};
pub use frame::{Frame, PixelLayout};
