use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};

/// Counters reported through the global meter. Without an installed meter
/// provider every call is a no-op.
#[derive(Clone)]
pub struct PipelineMetrics {
    frames: Counter<u64>,
    inference_failures: Counter<u64>,
    inference_duration: Histogram<f64>,
    detections: Counter<u64>,
}

impl PipelineMetrics {
    pub fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.005, 0.01, 0.02, 0.03, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 2.0,
        ];

        Self {
            frames: meter
                .u64_counter("pipeline_frames_total")
                .with_description("Frames offered to the pipeline, by outcome")
                .build(),
            inference_failures: meter
                .u64_counter("pipeline_inference_failures_total")
                .with_description("Inference calls that failed or timed out")
                .build(),
            inference_duration: meter
                .f64_histogram("pipeline_inference_duration_seconds")
                .with_description("Time spent in a single inference call")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            detections: meter
                .u64_counter("pipeline_detections_total")
                .with_description("Detections published")
                .build(),
        }
    }

    pub fn frame(&self, outcome: &'static str) {
        self.frames.add(1, &[KeyValue::new("outcome", outcome)]);
    }

    pub fn inference_failed(&self) {
        self.inference_failures.add(1, &[]);
    }

    pub fn inference_duration(&self, seconds: f64) {
        self.inference_duration.record(seconds, &[]);
    }

    pub fn detections(&self, count: usize) {
        self.detections.add(count as u64, &[]);
    }
}
