use crate::{
    labels::LabelTable,
    raw::{RawBox, RawOutput},
};
use schema::{BoundingBox, CoordinateSpace, Detection};

/// Turns raw model output into labelled detections in frame coordinates.
///
/// Keeps entries whose score is strictly above the threshold, in the order the
/// model produced them. Entries with a missing or non-finite part, an inverted
/// box or a negative class are skipped.
/// Boxes are mapped but never clamped to the frame.
#[derive(Debug, Clone, Default)]
pub struct DetectionDecoder {
    labels: LabelTable,
    space: CoordinateSpace,
}

impl DetectionDecoder {
    pub fn new(labels: LabelTable, space: CoordinateSpace) -> Self {
        Self { labels, space }
    }

    pub fn space(&self) -> CoordinateSpace {
        self.space
    }

    pub fn decode(
        &self,
        raw: &RawOutput,
        frame_width: u32,
        frame_height: u32,
        confidence_threshold: f32,
    ) -> Vec<Detection> {
        let mut detections = Vec::new();
        let mut malformed = 0usize;

        for index in 0..raw.len() {
            let (raw_box, score, class) = raw.entry(index);

            let (Some(raw_box), Some(score), Some(class)) = (raw_box, score, class) else {
                malformed += 1;
                continue;
            };

            if !score.is_finite() || !raw_box.is_finite() || raw_box.is_inverted() || class < 0 {
                malformed += 1;
                continue;
            }

            if score <= confidence_threshold {
                continue;
            }

            let bbox = self.map_box(raw_box, frame_width as f32, frame_height as f32);
            detections.push(Detection::new(bbox, self.labels.resolve(class), score));
        }

        if malformed > 0 {
            tracing::warn!(malformed, total = raw.len(), "Skipped malformed detections");
        }

        tracing::debug!(
            kept = detections.len(),
            total = raw.len(),
            threshold = confidence_threshold,
            "Decoded detections"
        );

        detections
    }

    fn map_box(&self, raw: RawBox, frame_width: f32, frame_height: f32) -> BoundingBox {
        let (x, y, w, h, normalized) = match raw {
            RawBox::Corners {
                ymin,
                xmin,
                ymax,
                xmax,
            } => (xmin, ymin, xmax - xmin, ymax - ymin, true),
            RawBox::NormalizedRect { x, y, w, h } => (x, y, w, h, true),
            RawBox::PixelRect { x, y, w, h } => (x, y, w, h, false),
        };

        match (self.space, normalized) {
            (CoordinateSpace::Pixels, true) => BoundingBox::new(
                x * frame_width,
                y * frame_height,
                w * frame_width,
                h * frame_height,
            ),
            (CoordinateSpace::Normalized, false) => BoundingBox::new(
                x / frame_width,
                y / frame_height,
                w / frame_width,
                h / frame_height,
            ),
            _ => BoundingBox::new(x, y, w, h),
        }
    }
}
