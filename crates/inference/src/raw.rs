//! Engine-agnostic view of what a detection model returned.
//!
//! Engines disagree on almost everything: tensor layouts, whether boxes are
//! corners or rectangles, and what the record fields are called. Everything is
//! normalized into [`RawOutput`] before decoding, so the decoder only deals
//! with one shape.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// One box as reported by a model, before mapping to frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawBox {
    /// `[ymin, xmin, ymax, xmax]`, each a fraction of the frame.
    Corners {
        ymin: f32,
        xmin: f32,
        ymax: f32,
        xmax: f32,
    },
    /// Top-left plus size, fractions of the frame.
    NormalizedRect { x: f32, y: f32, w: f32, h: f32 },
    /// Top-left plus size, already in source-frame pixels.
    PixelRect { x: f32, y: f32, w: f32, h: f32 },
}

impl RawBox {
    pub fn is_finite(&self) -> bool {
        match *self {
            RawBox::Corners {
                ymin,
                xmin,
                ymax,
                xmax,
            } => [ymin, xmin, ymax, xmax].iter().all(|v| v.is_finite()),
            RawBox::NormalizedRect { x, y, w, h } | RawBox::PixelRect { x, y, w, h } => {
                [x, y, w, h].iter().all(|v| v.is_finite())
            }
        }
    }

    /// Negative extent on either axis.
    pub fn is_inverted(&self) -> bool {
        match *self {
            RawBox::Corners {
                ymin,
                xmin,
                ymax,
                xmax,
            } => ymax < ymin || xmax < xmin,
            RawBox::NormalizedRect { w, h, .. } | RawBox::PixelRect { w, h, .. } => {
                w < 0.0 || h < 0.0
            }
        }
    }
}

/// Units of the `rect` field in record-style outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RectUnits {
    #[default]
    Normalized,
    Pixels,
}

/// Parallel per-detection sequences.
///
/// The three vectors may differ in length when an engine misbehaves; entry `i`
/// exists for every `i` below the longest one, and any missing part makes
/// that entry malformed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
    pub boxes: Vec<Option<RawBox>>,
    pub scores: Vec<Option<f32>>,
    pub classes: Vec<Option<i64>>,
}

impl RawOutput {
    pub fn new(boxes: Vec<RawBox>, scores: Vec<f32>, classes: Vec<i64>) -> Self {
        Self {
            boxes: boxes.into_iter().map(Some).collect(),
            scores: scores.into_iter().map(Some).collect(),
            classes: classes.into_iter().map(Some).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of entries, including malformed ones.
    pub fn len(&self) -> usize {
        self.boxes
            .len()
            .max(self.scores.len())
            .max(self.classes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parts of entry `index`; `None` for any part the engine did not provide.
    pub fn entry(&self, index: usize) -> (Option<RawBox>, Option<f32>, Option<i64>) {
        (
            self.boxes.get(index).copied().flatten(),
            self.scores.get(index).copied().flatten(),
            self.classes.get(index).copied().flatten(),
        )
    }

    /// Build from record-style output (one object per detection).
    pub fn from_records(records: &[RawRecord], units: RectUnits) -> Self {
        let mut out = Self::default();
        for record in records {
            out.boxes.push(record.raw_box(units));
            out.scores.push(record.score());
            out.classes.push(record.class());
        }
        out
    }

    /// Parse a JSON array of records.
    ///
    /// Only a document that is not an array fails. An element that does not
    /// parse as a record becomes an entry with every part missing.
    pub fn from_json(json: &str, units: RectUnits) -> anyhow::Result<Self> {
        let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
        let records: Vec<RawRecord> = values
            .into_iter()
            .map(|value| serde_json::from_value(value).unwrap_or_default())
            .collect();
        Ok(Self::from_records(&records, units))
    }

    /// Build from the SSD-style tensor triple.
    ///
    /// `boxes` is `[.., N, 4]` of `[ymin, xmin, ymax, xmax]`; `scores` and
    /// `classes` hold `N` values each, with any leading batch axes.
    pub fn from_tensors<C: ClassValue>(
        boxes: &ArrayD<f32>,
        scores: &ArrayD<f32>,
        classes: &ArrayD<C>,
    ) -> anyhow::Result<Self> {
        if boxes.ndim() == 0 || boxes.shape()[boxes.ndim() - 1] != 4 {
            anyhow::bail!(
                "Expected boxes with a trailing dimension of 4, got shape {:?}",
                boxes.shape()
            );
        }

        let flat: Vec<f32> = boxes.iter().copied().collect();
        let boxes = flat
            .chunks_exact(4)
            .map(|c| {
                Some(RawBox::Corners {
                    ymin: c[0],
                    xmin: c[1],
                    ymax: c[2],
                    xmax: c[3],
                })
            })
            .collect();

        Ok(Self {
            boxes,
            scores: scores.iter().map(|s| Some(*s)).collect(),
            classes: classes.iter().map(ClassValue::class_index).collect(),
        })
    }
}

/// Numeric types an engine may use for class indices.
pub trait ClassValue {
    fn class_index(&self) -> Option<i64>;
}

impl ClassValue for i64 {
    fn class_index(&self) -> Option<i64> {
        Some(*self)
    }
}

impl ClassValue for i32 {
    fn class_index(&self) -> Option<i64> {
        Some(i64::from(*self))
    }
}

impl ClassValue for f32 {
    fn class_index(&self) -> Option<i64> {
        f64::from(*self).class_index()
    }
}

impl ClassValue for f64 {
    fn class_index(&self) -> Option<i64> {
        self.is_finite().then(|| self.trunc() as i64)
    }
}

/// Rectangle as found in record-style outputs; each coordinate has two
/// accepted spellings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
}

/// One detection in record form.
///
/// Fields are kept separate rather than aliased so that a record carrying
/// both spellings still parses; the first spelling wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_in_class: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<RawRect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_class: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_index: Option<f64>,
}

impl RawRecord {
    pub fn score(&self) -> Option<f32> {
        self.confidence.or(self.confidence_in_class)
    }

    pub fn class(&self) -> Option<i64> {
        self.detected_class
            .or(self.class_index)
            .and_then(|c| c.class_index())
    }

    /// `None` when any coordinate is missing under both spellings.
    pub fn raw_box(&self, units: RectUnits) -> Option<RawBox> {
        let rect = self.rect.as_ref()?;
        let x = rect.x.or(rect.left)?;
        let y = rect.y.or(rect.top)?;
        let w = rect.w.or(rect.width)?;
        let h = rect.h.or(rect.height)?;

        Some(match units {
            RectUnits::Normalized => RawBox::NormalizedRect { x, y, w, h },
            RectUnits::Pixels => RawBox::PixelRect { x, y, w, h },
        })
    }
}
