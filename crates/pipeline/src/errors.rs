use inference::{InferenceError, ModelLoadError};
use preprocess::ConversionError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("Failed to load class labels: {0}")]
    Labels(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_errors_convert() {
        let err: PipelineError = ModelLoadError::AssetMissing("model.onnx".into()).into();
        assert_eq!(err.to_string(), "Model asset not found: model.onnx");

        let err: PipelineError = InferenceError::NotReady.into();
        assert!(matches!(err, PipelineError::Inference(InferenceError::NotReady)));
    }
}
