use crate::raw::RawOutput;
use preprocess::Tensor;
use std::collections::BTreeMap;

#[cfg(feature = "ort-backend")]
pub mod ort;

/// Knobs handed to an engine at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub threads: usize,
    /// `(width, height)` the model was exported for.
    pub input_size: (u32, u32),
    /// Engine-specific settings, e.g. `execution_provider = cuda`.
    pub params: BTreeMap<String, String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            threads: 4,
            input_size: preprocess::DEFAULT_INPUT_SIZE,
            params: BTreeMap::new(),
        }
    }
}

/// A loaded detection model.
///
/// Implementations are driven from a blocking thread, one call at a time.
pub trait InferenceEngine: Send + 'static {
    fn load_model(path: &str, options: &EngineOptions) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Shape the model accepts, when the engine can report it.
    fn input_shape(&self) -> Option<[usize; 4]> {
        None
    }

    fn infer(&mut self, input: &Tensor) -> anyhow::Result<RawOutput>;
}
