use crate::{
    backend::{EngineOptions, InferenceEngine},
    errors::{InferenceError, ModelLoadError},
    raw::RawOutput,
};
use common::span;
use preprocess::Tensor;
use std::{
    path::Path,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

type Loader<E> = dyn Fn() -> Result<E, ModelLoadError> + Send + Sync;

/// Owns the model handle and runs it off the async executor.
///
/// Loading and inference both go through `spawn_blocking`. At most one engine
/// call exists at a time: a call abandoned by the timeout keeps the engine
/// claimed until it returns, and `execute` rejects with `Busy` meanwhile.
pub struct InferenceInvoker<E: InferenceEngine> {
    loader: Arc<Loader<E>>,
    model: Mutex<Option<Arc<Mutex<E>>>>,
    in_flight: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

/// Clears the in-flight flag when the blocking call ends.
struct EngineClaim(Arc<AtomicBool>);

impl Drop for EngineClaim {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<E: InferenceEngine> InferenceInvoker<E> {
    /// Invoker loading `E` from a model file.
    pub fn new(model_path: impl Into<String>, options: EngineOptions) -> Self {
        let model_path = model_path.into();
        Self::from_loader(move || {
            if !Path::new(&model_path).exists() {
                return Err(ModelLoadError::AssetMissing(model_path.clone()));
            }
            E::load_model(&model_path, &options)
                .map_err(|e| ModelLoadError::Engine(format!("{e:#}")))
        })
    }

    /// Invoker using an arbitrary constructor, e.g. an in-memory engine.
    pub fn with_loader<F>(loader: F) -> Self
    where
        F: Fn() -> anyhow::Result<E> + Send + Sync + 'static,
    {
        Self::from_loader(move || loader().map_err(|e| ModelLoadError::Engine(format!("{e:#}"))))
    }

    fn from_loader<F>(loader: F) -> Self
    where
        F: Fn() -> Result<E, ModelLoadError> + Send + Sync + 'static,
    {
        Self {
            loader: Arc::new(loader),
            model: Mutex::new(None),
            in_flight: Arc::new(AtomicBool::new(false)),
            timeout: None,
        }
    }

    /// Bound every inference call. Unbounded by default.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Load the model, replacing any previously loaded one.
    pub async fn initialize(&self) -> Result<(), ModelLoadError> {
        let loader = Arc::clone(&self.loader);
        let start = Instant::now();

        let engine = tokio::task::spawn_blocking(move || (loader)())
            .await
            .map_err(|e| ModelLoadError::Task(e.to_string()))??;

        *self.slot() = Some(Arc::new(Mutex::new(engine)));

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model loaded"
        );
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.slot().is_some()
    }

    /// Whether an engine call is running, including one abandoned by the
    /// timeout.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one inference. The tensor is moved into the blocking task.
    pub async fn execute(&self, tensor: Tensor) -> Result<RawOutput, InferenceError> {
        let engine = {
            let slot = self.slot();
            slot.clone().ok_or(InferenceError::NotReady)?
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(InferenceError::Busy);
        }
        let claim = EngineClaim(Arc::clone(&self.in_flight));

        let task = tokio::task::spawn_blocking(move || {
            let _claim = claim;
            let _s = span!("inference");
            let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(expected) = engine.input_shape()
                && tensor.shape() != expected.as_slice()
            {
                return Err(InferenceError::ShapeMismatch {
                    expected: expected.to_vec(),
                    actual: tensor.shape().to_vec(),
                });
            }

            engine
                .infer(&tensor)
                .map_err(|e| InferenceError::Engine(format!("{e:#}")))
        });

        let joined = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| InferenceError::Timeout(limit))?,
            None => task.await,
        };

        joined.map_err(|e| InferenceError::Engine(e.to_string()))?
    }

    /// Release the model. Returns `false` if nothing was loaded.
    pub fn dispose(&self) -> bool {
        let released = self.slot().take().is_some();
        if released {
            tracing::info!("Model released");
        }
        released
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<Mutex<E>>>> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
