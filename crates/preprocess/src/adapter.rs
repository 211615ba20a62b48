use crate::{ConversionError, Tensor, layout::to_rgb};
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use schema::{Frame, PixelLayout};

/// Input resolution of the stock YOLOv8 exports.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (640, 640);

const RGB_CHANNELS: usize = 3;

/// Per-pixel affine normalization, `(value - mean) / std`.
///
/// The default maps `0..=255` onto `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: f32,
    pub std: f32,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            mean: 0.0,
            std: 255.0,
        }
    }
}

/// Turns camera frames into model-ready tensors.
///
/// Stretches the frame to the model resolution with bilinear filtering (no
/// letterboxing, so the frame's normalized coordinates equal the model's) and
/// emits NHWC `[1, height, width, 3]`. Holds no per-frame state: every call
/// allocates its own buffers and the returned tensor owns a copy of the pixels.
#[derive(Debug, Clone)]
pub struct FrameAdapter {
    input_size: (u32, u32),
    normalization: Normalization,
}

impl FrameAdapter {
    pub fn new(input_size: (u32, u32)) -> Self {
        Self {
            input_size,
            normalization: Normalization::default(),
        }
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// Shape of every tensor this adapter returns.
    pub fn tensor_shape(&self) -> [usize; 4] {
        [
            1,
            self.input_size.1 as usize,
            self.input_size.0 as usize,
            RGB_CHANNELS,
        ]
    }

    pub fn to_tensor(&self, frame: &Frame<'_>) -> Result<Tensor, ConversionError> {
        let _s = span!("frame_to_tensor");

        tracing::trace!(
            width = frame.width,
            height = frame.height,
            layout = ?frame.layout,
            pixel_bytes = frame.pixels.len(),
            "Converting frame"
        );

        Self::validate(frame)?;

        let rgb = to_rgb(frame);
        let resized = self.resize(&rgb, frame.width, frame.height)?;
        self.normalize(resized.buffer())
    }

    fn validate(frame: &Frame<'_>) -> Result<(), ConversionError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(ConversionError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            });
        }

        if frame.layout == PixelLayout::Yuyv && frame.width % 2 != 0 {
            return Err(ConversionError::OddYuyvWidth(frame.width));
        }

        let expected = frame
            .expected_len()
            .ok_or(ConversionError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            })?;

        if frame.pixels.len() != expected {
            return Err(ConversionError::BufferSizeMismatch {
                expected,
                actual: frame.pixels.len(),
            });
        }

        Ok(())
    }

    fn resize(&self, rgb: &[u8], width: u32, height: u32) -> Result<Image<'static>, ConversionError> {
        let _s = span!("resize");

        let (dst_width, dst_height) = self.input_size;
        if dst_width == 0 || dst_height == 0 {
            return Err(ConversionError::InvalidDimensions {
                width: dst_width,
                height: dst_height,
            });
        }

        let src = ImageRef::new(width, height, rgb, PixelType::U8x3)
            .map_err(|e| ConversionError::Resize(e.to_string()))?;

        let mut resized = Image::new(dst_width, dst_height, PixelType::U8x3);

        Resizer::new()
            .resize(
                &src,
                &mut resized,
                &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
            )
            .map_err(|e| ConversionError::Resize(e.to_string()))?;

        Ok(resized)
    }

    fn normalize(&self, rgb: &[u8]) -> Result<Tensor, ConversionError> {
        let _s = span!("normalize");

        let Normalization { mean, std } = self.normalization;
        let scale = 1.0 / std;
        let data: Vec<f32> = rgb.iter().map(|&v| (v as f32 - mean) * scale).collect();

        let [n, h, w, c] = self.tensor_shape();
        Tensor::from_shape_vec((n, h, w, c), data).map_err(|e| ConversionError::Shape(e.to_string()))
    }
}

impl Default for FrameAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}
