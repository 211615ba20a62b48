use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Memory layout of a frame's pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    Rgb,
    Bgr,
    Rgba,
    Bgra,
    /// Packed YUV 4:2:2, two pixels in four bytes: [Y0, U, Y1, V]
    Yuyv,
}

impl PixelLayout {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::Rgb | PixelLayout::Bgr => 3,
            PixelLayout::Rgba | PixelLayout::Bgra => 4,
            PixelLayout::Yuyv => 2,
        }
    }
}

/// One captured image, borrowed from the frame source for the duration of a
/// callback. Anything that must outlive the callback has to be copied out.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub pixels: &'a [u8],
    /// Capture time relative to the source's own clock
    pub timestamp: Option<Duration>,
}

impl<'a> Frame<'a> {
    pub fn new(width: u32, height: u32, layout: PixelLayout, pixels: &'a [u8]) -> Self {
        Self {
            width,
            height,
            layout,
            pixels,
            timestamp: None,
        }
    }

    /// Tightly packed RGB frame, the layout most sources hand out.
    pub fn rgb(width: u32, height: u32, pixels: &'a [u8]) -> Self {
        Self::new(width, height, PixelLayout::Rgb, pixels)
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Buffer length implied by the dimensions and layout, `None` on overflow.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.layout.bytes_per_pixel())
    }
}
