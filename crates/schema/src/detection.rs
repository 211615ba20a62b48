use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Which coordinate space published boxes are expressed in.
///
/// Fixed for the lifetime of a pipeline so that a consumer never has to guess.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    /// Pixels of the source frame
    #[default]
    Pixels,
    /// Fractions of the source frame's width and height, in [0, 1]
    Normalized,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown coordinate space '{0}' (expected 'pixels' or 'normalized')")]
pub struct ParseSpaceError(String);

impl FromStr for CoordinateSpace {
    type Err = ParseSpaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pixels" | "pixel" | "px" => Ok(CoordinateSpace::Pixels),
            "normalized" | "normalised" | "norm" => Ok(CoordinateSpace::Normalized),
            other => Err(ParseSpaceError(other.to_string())),
        }
    }
}

/// Axis-aligned box anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One recognized object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(flatten)]
    bbox: BoundingBox,
    label: String,
    score: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, score: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            score,
        }
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    /// Overlay caption, e.g. `person (87%)`.
    pub fn label_text(&self) -> String {
        format!("{} ({}%)", self.label, (self.score * 100.0).round() as i32)
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at [{:.0}, {:.0}, {:.0}, {:.0}]",
            self.label_text(),
            self.bbox.x,
            self.bbox.y,
            self.bbox.width,
            self.bbox.height
        )
    }
}

/// Complete result of one detection cycle, in decoder order.
///
/// Consumers receive it as a full replacement of the previous set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSet {
    sequence: u64,
    frame_width: u32,
    frame_height: u32,
    space: CoordinateSpace,
    timestamp: Option<Duration>,
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(
        sequence: u64,
        frame_width: u32,
        frame_height: u32,
        space: CoordinateSpace,
        detections: Vec<Detection>,
    ) -> Self {
        Self {
            sequence,
            frame_width,
            frame_height,
            space,
            timestamp: None,
            detections,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Option<Duration>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Cycle number assigned by the pipeline; 0 is the empty initial set.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    pub fn space(&self) -> CoordinateSpace {
        self.space
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}
