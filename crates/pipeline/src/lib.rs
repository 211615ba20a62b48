pub mod config;
pub mod controller;
pub mod errors;
pub mod gate;
pub mod metrics;
pub mod sink;

pub use config::PipelineConfig;
pub use controller::{FrameOutcome, Pipeline};
pub use errors::PipelineError;
pub use gate::{
    Admission, DEFAULT_MIN_INVOCATION_INTERVAL, InferenceGate, MIN_INVOCATION_INTERVAL_FLOOR,
    PipelineState,
};
pub use sink::{CallbackSink, DetectionSink, WatchSink};
