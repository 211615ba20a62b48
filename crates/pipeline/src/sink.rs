use crate::errors::PipelineError;
use schema::DetectionSet;
use std::sync::Arc;
use tokio::sync::watch;

/// Receives the output of the pipeline.
///
/// Each published set is a full replacement for the previous one.
pub trait DetectionSink: Send + Sync {
    fn publish(&self, set: Arc<DetectionSet>);

    /// Called once per failed `initialize`.
    fn model_load_failed(&self, _error: &PipelineError) {}
}

/// Keeps the latest set in a watch channel for overlay consumers.
#[derive(Debug)]
pub struct WatchSink {
    sets: watch::Sender<Option<Arc<DetectionSet>>>,
    failures: watch::Sender<Option<PipelineError>>,
}

impl WatchSink {
    pub fn new() -> Self {
        let (sets, _) = watch::channel(None);
        let (failures, _) = watch::channel(None);
        Self { sets, failures }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<DetectionSet>>> {
        self.sets.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<DetectionSet>> {
        self.sets.borrow().clone()
    }

    pub fn subscribe_failures(&self) -> watch::Receiver<Option<PipelineError>> {
        self.failures.subscribe()
    }

    /// Most recent model load failure, if any.
    pub fn load_failure(&self) -> Option<PipelineError> {
        self.failures.borrow().clone()
    }
}

impl Default for WatchSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionSink for WatchSink {
    fn publish(&self, set: Arc<DetectionSet>) {
        self.sets.send_replace(Some(set));
    }

    fn model_load_failed(&self, error: &PipelineError) {
        self.failures.send_replace(Some(error.clone()));
    }
}

type PublishFn = dyn Fn(Arc<DetectionSet>) + Send + Sync;
type FailureFn = dyn Fn(&PipelineError) + Send + Sync;

/// Adapts closures to [`DetectionSink`].
pub struct CallbackSink {
    on_publish: Box<PublishFn>,
    on_load_failure: Option<Box<FailureFn>>,
}

impl CallbackSink {
    pub fn new<F>(on_publish: F) -> Self
    where
        F: Fn(Arc<DetectionSet>) + Send + Sync + 'static,
    {
        Self {
            on_publish: Box::new(on_publish),
            on_load_failure: None,
        }
    }

    pub fn with_load_failure<F>(mut self, on_load_failure: F) -> Self
    where
        F: Fn(&PipelineError) + Send + Sync + 'static,
    {
        self.on_load_failure = Some(Box::new(on_load_failure));
        self
    }
}

impl DetectionSink for CallbackSink {
    fn publish(&self, set: Arc<DetectionSet>) {
        (self.on_publish)(set);
    }

    fn model_load_failed(&self, error: &PipelineError) {
        if let Some(callback) = &self.on_load_failure {
            callback(error);
        }
    }
}
