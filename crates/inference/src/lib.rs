pub mod backend;
pub mod config;
pub mod decoder;
pub mod errors;
pub mod invoker;
pub mod labels;
pub mod raw;

pub use backend::{EngineOptions, InferenceEngine};
pub use config::{DEFAULT_CONFIDENCE_THRESHOLD, InferenceConfig};
pub use decoder::DetectionDecoder;
pub use errors::{InferenceError, ModelLoadError};
pub use invoker::InferenceInvoker;
pub use labels::{COCO_LABELS, LabelTable};
pub use raw::{RawBox, RawOutput, RawRecord, RectUnits};
