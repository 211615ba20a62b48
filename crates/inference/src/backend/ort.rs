use super::{EngineOptions, InferenceEngine};
use crate::raw::RawOutput;
use ndarray::ArrayD;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use preprocess::Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

impl ExecutionProvider {
    fn from_options(options: &EngineOptions) -> Self {
        match options.params.get("execution_provider").map(String::as_str) {
            Some("cuda") => Self::Cuda,
            _ => Self::Cpu,
        }
    }
}

/// ONNX Runtime session for TFLite-style SSD/YOLO exports with
/// `images -> (boxes, scores, classes)` signatures.
pub struct OrtBackend {
    session: Session,
    input_shape: [usize; 4],
}

impl OrtBackend {
    pub fn load_model_with_provider(
        path: &str,
        options: &EngineOptions,
        provider: ExecutionProvider,
    ) -> anyhow::Result<Self> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(options.threads)?;

        match provider {
            ExecutionProvider::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ])?;
            }
            ExecutionProvider::Cpu => {
                tracing::info!(
                    threads = options.threads,
                    "Initializing ONNX Runtime with CPU execution provider"
                );
            }
        }

        let session = builder.commit_from_file(path)?;

        let (width, height) = options.input_size;
        tracing::info!("Model loaded from {}", path);
        Ok(Self {
            session,
            input_shape: [1, height as usize, width as usize, 3],
        })
    }
}

impl InferenceEngine for OrtBackend {
    fn load_model(path: &str, options: &EngineOptions) -> anyhow::Result<Self> {
        Self::load_model_with_provider(path, options, ExecutionProvider::from_options(options))
    }

    fn input_shape(&self) -> Option<[usize; 4]> {
        Some(self.input_shape)
    }

    fn infer(&mut self, input: &Tensor) -> anyhow::Result<RawOutput> {
        let outputs = self.session.run(ort::inputs![
            "images" => TensorRef::from_array_view(input.view())?
        ])?;

        let boxes: ArrayD<f32> = outputs["boxes"].try_extract_array::<f32>()?.into_owned();
        let scores: ArrayD<f32> = outputs["scores"].try_extract_array::<f32>()?.into_owned();

        // Exports disagree on the class tensor type
        let classes = &outputs["classes"];
        if let Ok(classes) = classes.try_extract_array::<i64>() {
            return RawOutput::from_tensors(&boxes, &scores, &classes.into_owned());
        }
        if let Ok(classes) = classes.try_extract_array::<i32>() {
            return RawOutput::from_tensors(&boxes, &scores, &classes.into_owned());
        }
        let classes: ArrayD<f32> = classes.try_extract_array::<f32>()?.into_owned();
        RawOutput::from_tensors(&boxes, &scores, &classes)
    }
}
