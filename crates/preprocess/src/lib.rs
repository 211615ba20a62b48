pub mod adapter;
pub mod errors;
pub mod layout;

use ndarray::Array4;

pub use adapter::{DEFAULT_INPUT_SIZE, FrameAdapter, Normalization};
pub use errors::ConversionError;

/// Model input in NHWC order: `[1, height, width, 3]`.
pub type Tensor = Array4<f32>;
