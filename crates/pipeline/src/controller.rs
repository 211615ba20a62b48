use crate::{
    config::PipelineConfig,
    errors::PipelineError,
    gate::{Admission, InferenceGate, PipelineState},
    metrics::PipelineMetrics,
    sink::DetectionSink,
};
use inference::{DetectionDecoder, InferenceEngine, InferenceError, InferenceInvoker};
use preprocess::{ConversionError, FrameAdapter, Tensor};
use schema::{DetectionSet, Frame};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;

/// What happened to one offered frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// Model not loaded, still loading, or disposed.
    NotReady,
    /// Dropped: a cycle is in flight, the interval has not elapsed, or the
    /// engine is still running a timed-out call.
    Throttled,
    /// The frame buffer could not be converted.
    Rejected(ConversionError),
    /// Cycle spawned on the runtime; resolves to `Completed`, `Failed`,
    /// `Throttled` or `Discarded`.
    Dispatched(JoinHandle<FrameOutcome>),
    /// A set with this many detections was published.
    Completed(usize),
    Failed(InferenceError),
    /// Inference finished after `dispose`; nothing was published.
    Discarded,
}

impl FrameOutcome {
    /// Whether the frame got past the gate and the adapter.
    pub fn is_admitted(&self) -> bool {
        matches!(
            self,
            FrameOutcome::Dispatched(_)
                | FrameOutcome::Completed(_)
                | FrameOutcome::Failed(_)
                | FrameOutcome::Discarded
        )
    }
}

/// Releases the gate when the cycle ends, including on task cancellation.
struct InFlight<'a>(&'a InferenceGate);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

struct FrameInfo {
    width: u32,
    height: u32,
    timestamp: Option<Duration>,
}

/// Frame intake, throttling, inference and publication for one camera session.
pub struct Pipeline<E: InferenceEngine> {
    gate: InferenceGate,
    adapter: FrameAdapter,
    invoker: InferenceInvoker<E>,
    decoder: DetectionDecoder,
    confidence_threshold: f32,
    sink: Arc<dyn DetectionSink>,
    metrics: PipelineMetrics,
    sequence: AtomicU64,
}

impl<E: InferenceEngine> Pipeline<E> {
    /// Pipeline loading its engine from `config.inference.model_path`.
    pub fn from_config(
        config: &PipelineConfig,
        sink: Arc<dyn DetectionSink>,
    ) -> Result<Self, PipelineError> {
        let invoker = InferenceInvoker::new(
            config.inference.model_path.clone(),
            config.inference.engine_options(),
        );
        Self::new(config, invoker, sink)
    }

    pub fn new(
        config: &PipelineConfig,
        invoker: InferenceInvoker<E>,
        sink: Arc<dyn DetectionSink>,
    ) -> Result<Self, PipelineError> {
        let labels = config
            .inference
            .labels()
            .map_err(|e| PipelineError::Labels(format!("{e:#}")))?;

        let adapter = FrameAdapter::new(config.inference.input_size)
            .with_normalization(config.inference.normalization);

        Ok(Self {
            gate: InferenceGate::new(config.min_invocation_interval),
            adapter,
            invoker: invoker.with_timeout(config.inference.inference_timeout),
            decoder: DetectionDecoder::new(labels, config.inference.output_space),
            confidence_threshold: config.inference.confidence_threshold,
            sink,
            metrics: PipelineMetrics::new("pipeline"),
            sequence: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.gate.state()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), PipelineState::Ready | PipelineState::Busy) && self.invoker.is_ready()
    }

    pub fn min_invocation_interval(&self) -> Duration {
        self.gate.min_interval()
    }

    /// Change the gate interval at runtime. Returns the clamped value.
    pub fn set_min_invocation_interval(&self, interval: Duration) -> Duration {
        let effective = self.gate.set_min_interval(interval);
        tracing::info!(
            interval_ms = effective.as_millis() as u64,
            "Minimum invocation interval updated"
        );
        effective
    }

    /// Load the model. Returns `false` on failure; the sink is told once per
    /// failed attempt and `initialize` may be called again.
    pub async fn initialize(&self) -> bool {
        match self.state() {
            PipelineState::Ready | PipelineState::Busy => return true,
            PipelineState::Disposed => {
                tracing::warn!("Initialize called on a disposed pipeline");
                return false;
            }
            PipelineState::Loading => {
                tracing::debug!("Model load already in progress");
                return false;
            }
            PipelineState::Uninitialized | PipelineState::Failed => {}
        }

        if !self.gate.transition(PipelineState::Uninitialized, PipelineState::Loading)
            && !self.gate.transition(PipelineState::Failed, PipelineState::Loading)
        {
            return self.is_ready();
        }

        tracing::info!("Loading model");

        match self.invoker.initialize().await {
            Ok(()) => {
                if self.gate.transition(PipelineState::Loading, PipelineState::Ready) {
                    tracing::info!(
                        interval_ms = self.gate.min_interval().as_millis() as u64,
                        threshold = self.confidence_threshold,
                        "Pipeline ready"
                    );
                    true
                } else {
                    // Disposed while loading
                    self.invoker.dispose();
                    false
                }
            }
            Err(e) => {
                self.gate.transition(PipelineState::Loading, PipelineState::Failed);
                tracing::error!(error = %e, "Model load failed");
                self.sink.model_load_failed(&PipelineError::from(e));
                false
            }
        }
    }

    /// Offer a frame from the capture callback.
    ///
    /// Admission and tensor conversion happen on the caller's thread; the
    /// frame is not referenced after this returns. Inference runs on a spawned
    /// task. Must be called from within a Tokio runtime.
    pub fn on_frame(self: &Arc<Self>, frame: &Frame<'_>) -> FrameOutcome {
        let (tensor, info) = match self.admit(frame) {
            Ok(admitted) => admitted,
            Err(outcome) => return outcome,
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No Tokio runtime available, dropping frame");
            self.gate.abort();
            return FrameOutcome::NotReady;
        };

        let pipeline = Arc::clone(self);
        FrameOutcome::Dispatched(runtime.spawn(async move { pipeline.run_cycle(tensor, info).await }))
    }

    /// Run one full cycle for `frame` on the current task.
    pub async fn process_frame(&self, frame: &Frame<'_>) -> FrameOutcome {
        match self.admit(frame) {
            Ok((tensor, info)) => self.run_cycle(tensor, info).await,
            Err(outcome) => outcome,
        }
    }

    /// Enter `Disposed` and release the model. Safe to call repeatedly.
    pub fn dispose(&self) {
        let previous = self.gate.dispose();
        if previous == PipelineState::Disposed {
            return;
        }

        self.invoker.dispose();
        tracing::info!(previous = ?previous, "Pipeline disposed");
    }

    fn admit(&self, frame: &Frame<'_>) -> Result<(Tensor, FrameInfo), FrameOutcome> {
        match self.gate.admit(Instant::now()) {
            Admission::Admitted => {}
            Admission::NotReady => {
                self.metrics.frame("not_ready");
                return Err(FrameOutcome::NotReady);
            }
            Admission::Busy | Admission::TooSoon => {
                tracing::trace!("Frame dropped by gate");
                self.metrics.frame("throttled");
                return Err(FrameOutcome::Throttled);
            }
        }

        match self.adapter.to_tensor(frame) {
            Ok(tensor) => {
                self.metrics.frame("admitted");
                Ok((
                    tensor,
                    FrameInfo {
                        width: frame.width,
                        height: frame.height,
                        timestamp: frame.timestamp,
                    },
                ))
            }
            Err(e) => {
                self.gate.abort();
                tracing::warn!(
                    error = %e,
                    frame_width = frame.width,
                    frame_height = frame.height,
                    "Frame conversion failed"
                );
                self.metrics.frame("rejected");
                Err(FrameOutcome::Rejected(e))
            }
        }
    }

    async fn run_cycle(&self, tensor: Tensor, info: FrameInfo) -> FrameOutcome {
        let _in_flight = InFlight(&self.gate);
        let start = Instant::now();

        let raw = match self.invoker.execute(tensor).await {
            Ok(raw) => raw,
            Err(InferenceError::Busy) => {
                tracing::trace!("Engine still running an abandoned call, frame dropped");
                return FrameOutcome::Throttled;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Inference failed");
                self.metrics.inference_failed();
                return FrameOutcome::Failed(e);
            }
        };
        self.metrics.inference_duration(start.elapsed().as_secs_f64());

        let detections = self.decoder.decode(
            &raw,
            info.width,
            info.height,
            self.confidence_threshold,
        );
        drop(raw);

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let set = DetectionSet::new(
            sequence,
            info.width,
            info.height,
            self.decoder.space(),
            detections,
        )
        .with_timestamp(info.timestamp);
        let count = set.len();

        if self.state() == PipelineState::Disposed {
            tracing::debug!(sequence, "Pipeline disposed during inference, result discarded");
            return FrameOutcome::Discarded;
        }

        tracing::debug!(
            sequence,
            detections = count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Cycle complete"
        );
        self.metrics.detections(count);
        self.sink.publish(Arc::new(set));

        FrameOutcome::Completed(count)
    }
}

impl<E: InferenceEngine> Drop for Pipeline<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}
