use crate::{backend::EngineOptions, labels::LabelTable};
use common::{env_opt, env_or};
use preprocess::{DEFAULT_INPUT_SIZE, Normalization};
use schema::CoordinateSpace;
use std::{collections::BTreeMap, time::Duration};

/// Detections must score strictly above this to be reported.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;

pub const DEFAULT_MODEL_PATH: &str = "models/yolov8n.onnx";

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub model_path: String,
    pub num_threads: usize,
    pub input_size: (u32, u32),
    pub confidence_threshold: f32,
    pub output_space: CoordinateSpace,
    pub labels_path: Option<String>,
    pub inference_timeout: Option<Duration>,
    pub normalization: Normalization,
    pub execution_provider: Option<String>,
}

impl InferenceConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Self {
        let input_width = env_or("INPUT_WIDTH", DEFAULT_INPUT_SIZE.0);
        let input_height = env_or("INPUT_HEIGHT", DEFAULT_INPUT_SIZE.1);

        let confidence_threshold = env_opt::<f32>("CONFIDENCE_THRESHOLD")
            .filter(|t| t.is_finite())
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);

        let image_std = env_opt::<f32>("IMAGE_STD")
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(Normalization::default().std);
        let image_mean = env_opt::<f32>("IMAGE_MEAN")
            .filter(|m| m.is_finite())
            .unwrap_or(Normalization::default().mean);

        Self {
            model_path: env_or("MODEL_PATH", DEFAULT_MODEL_PATH.to_string()),
            num_threads: env_or("NUM_THREADS", 4usize).max(1),
            input_size: (input_width, input_height),
            confidence_threshold,
            output_space: env_or("OUTPUT_SPACE", CoordinateSpace::Pixels),
            labels_path: env_opt("CLASS_LABELS_PATH"),
            inference_timeout: env_opt::<u64>("INFERENCE_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            normalization: Normalization {
                mean: image_mean,
                std: image_std,
            },
            execution_provider: env_opt("EXECUTION_PROVIDER"),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        let mut params = BTreeMap::new();
        if let Some(provider) = &self.execution_provider {
            params.insert("execution_provider".to_string(), provider.to_lowercase());
        }

        EngineOptions {
            threads: self.num_threads,
            input_size: self.input_size,
            params,
        }
    }

    /// Configured label file, or the COCO names when none is set.
    pub fn labels(&self) -> anyhow::Result<LabelTable> {
        match &self.labels_path {
            Some(path) => LabelTable::from_file(path),
            None => Ok(LabelTable::coco()),
        }
    }

    /// Create default configuration for testing
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            model_path: "/models/model.onnx".to_string(),
            num_threads: 4,
            input_size: (640, 640),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            output_space: CoordinateSpace::Pixels,
            labels_path: None,
            inference_timeout: None,
            normalization: Normalization::default(),
            execution_provider: None,
        }
    }
}
