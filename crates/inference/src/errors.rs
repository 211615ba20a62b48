use std::time::Duration;
use thiserror::Error;

/// Failure to bring a model up. Fatal to the current session until
/// `initialize` is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelLoadError {
    #[error("Model asset not found: {0}")]
    AssetMissing(String),

    #[error("Model could not be loaded: {0}")]
    Engine(String),

    #[error("Model load task failed: {0}")]
    Task(String),
}

/// Failure of a single inference call. Never outlives the frame it belongs to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Model is not loaded")]
    NotReady,

    #[error("Input shape mismatch: model expects {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Inference engine is still running a previous call")]
    Busy,

    #[error("Inference engine failed: {0}")]
    Engine(String),

    #[error("Inference exceeded {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let err = ModelLoadError::AssetMissing("models/missing.onnx".to_string());
        assert_eq!(err.to_string(), "Model asset not found: models/missing.onnx");

        let err = InferenceError::ShapeMismatch {
            expected: vec![1, 640, 640, 3],
            actual: vec![1, 320, 320, 3],
        };
        assert_eq!(
            err.to_string(),
            "Input shape mismatch: model expects [1, 640, 640, 3], got [1, 320, 320, 3]"
        );

        assert_eq!(
            InferenceError::Timeout(Duration::from_millis(250)).to_string(),
            "Inference exceeded 250ms"
        );
    }
}
