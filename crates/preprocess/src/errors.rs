use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Buffer size mismatch: expected {expected}, got {actual} bytes")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("YUYV frames need an even width, got {0}")]
    OddYuyvWidth(u32),

    #[error("Resize failed: {0}")]
    Resize(String),

    #[error("Tensor shape error: {0}")]
    Shape(String),
}
