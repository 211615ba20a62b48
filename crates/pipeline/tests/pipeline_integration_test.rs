use common::Environment;
use inference::{
    EngineOptions, InferenceConfig, InferenceEngine, InferenceError, InferenceInvoker,
    ModelLoadError, RawBox, RawOutput,
};
use pipeline::{
    CallbackSink, FrameOutcome, Pipeline, PipelineConfig, PipelineError, PipelineState, WatchSink,
};
use preprocess::{ConversionError, Normalization, Tensor};
use schema::{BoundingBox, CoordinateSpace, Frame};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

const INTERVAL: Duration = Duration::from_millis(100);

/// Engine returning a fixed output, recording how many calls overlap
#[derive(Clone, Default)]
struct Probe {
    calls: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

struct ScriptedEngine {
    output: RawOutput,
    delay: Duration,
    fail: bool,
    probe: Probe,
}

impl InferenceEngine for ScriptedEngine {
    fn load_model(_path: &str, _options: &EngineOptions) -> anyhow::Result<Self> {
        anyhow::bail!("scripted engines are built in-process")
    }

    fn input_shape(&self) -> Option<[usize; 4]> {
        Some([1, 32, 32, 3])
    }

    fn infer(&mut self, _input: &Tensor) -> anyhow::Result<RawOutput> {
        let active = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active.fetch_max(active, Ordering::SeqCst);
        self.probe.calls.fetch_add(1, Ordering::SeqCst);

        std::thread::sleep(self.delay);

        self.probe.active.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("delegate crashed");
        }
        Ok(self.output.clone())
    }
}

fn three_detections() -> RawOutput {
    let corners = |ymin, xmin, ymax, xmax| RawBox::Corners {
        ymin,
        xmin,
        ymax,
        xmax,
    };
    RawOutput::new(
        vec![
            corners(0.1, 0.2, 0.6, 0.8),
            corners(0.0, 0.0, 0.5, 0.5),
            corners(0.5, 0.5, 1.0, 1.0),
        ],
        vec![0.9, 0.3, 0.5],
        vec![0, 1, 2],
    )
}

fn config() -> PipelineConfig {
    PipelineConfig {
        environment: Environment::Development,
        otel_endpoint: None,
        min_invocation_interval: INTERVAL,
        inference: InferenceConfig {
            model_path: "/nonexistent/model.onnx".to_string(),
            num_threads: 1,
            input_size: (32, 32),
            confidence_threshold: 0.4,
            output_space: CoordinateSpace::Pixels,
            labels_path: None,
            inference_timeout: None,
            normalization: Normalization::default(),
            execution_provider: None,
        },
    }
}

fn scripted(delay: Duration, fail: bool, probe: &Probe) -> InferenceInvoker<ScriptedEngine> {
    let probe = probe.clone();
    InferenceInvoker::with_loader(move || {
        Ok(ScriptedEngine {
            output: three_detections(),
            delay,
            fail,
            probe: probe.clone(),
        })
    })
}

fn build(
    config: &PipelineConfig,
    delay: Duration,
    fail: bool,
) -> (Arc<Pipeline<ScriptedEngine>>, Arc<WatchSink>, Probe) {
    let probe = Probe::default();
    let sink = Arc::new(WatchSink::new());
    let pipeline = Pipeline::new(config, scripted(delay, fail, &probe), sink.clone()).unwrap();
    (Arc::new(pipeline), sink, probe)
}

fn rgb(width: u32, height: u32) -> Vec<u8> {
    vec![128u8; (width * height * 3) as usize]
}

#[tokio::test]
async fn test_frames_ignored_before_initialize() {
    let (pipeline, sink, probe) = build(&config(), Duration::ZERO, false);
    let pixels = rgb(8, 8);

    let outcome = pipeline.process_frame(&Frame::rgb(8, 8, &pixels)).await;

    assert!(matches!(outcome, FrameOutcome::NotReady));
    assert!(!pipeline.is_ready());
    assert_eq!(pipeline.state(), PipelineState::Uninitialized);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    assert!(sink.latest().is_none());
}

#[tokio::test]
async fn test_cycle_publishes_thresholded_detections() {
    let (pipeline, sink, _probe) = build(&config(), Duration::ZERO, false);
    assert!(pipeline.initialize().await);
    assert!(pipeline.is_ready());

    let pixels = rgb(200, 100);
    let frame = Frame::rgb(200, 100, &pixels).with_timestamp(Duration::from_millis(42));
    let outcome = pipeline.process_frame(&frame).await;

    assert!(matches!(outcome, FrameOutcome::Completed(2)), "got {outcome:?}");
    assert_eq!(pipeline.state(), PipelineState::Ready, "Gate must be released");

    let set = sink.latest().expect("A set should have been published");
    assert_eq!(set.sequence(), 1);
    assert_eq!(set.frame_size(), (200, 100));
    assert_eq!(set.timestamp(), Some(Duration::from_millis(42)));

    let labels: Vec<_> = set.iter().map(|d| d.label()).collect();
    assert_eq!(labels, ["person", "car"], "Order follows the model output");

    let bbox = set.detections()[0].bbox();
    assert!((bbox.x - 40.0).abs() < 1e-3);
    assert!((bbox.y - 10.0).abs() < 1e-3);
    assert!((bbox.width - 120.0).abs() < 1e-3);
    assert!((bbox.height - 50.0).abs() < 1e-3);
}

#[tokio::test]
async fn test_gate_throttles_frames_inside_interval() {
    let (pipeline, _sink, probe) = build(&config(), Duration::ZERO, false);
    assert!(pipeline.initialize().await);
    let pixels = rgb(16, 16);
    let frame = Frame::rgb(16, 16, &pixels);

    assert!(matches!(pipeline.process_frame(&frame).await, FrameOutcome::Completed(_)));
    for _ in 0..5 {
        assert!(matches!(
            pipeline.process_frame(&frame).await,
            FrameOutcome::Throttled
        ));
    }
    assert_eq!(probe.calls.load(Ordering::SeqCst), 1, "Only the first frame reaches the model");

    tokio::time::sleep(INTERVAL + Duration::from_millis(20)).await;

    assert!(matches!(pipeline.process_frame(&frame).await, FrameOutcome::Completed(_)));
    assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_under_concurrent_frames() {
    let (pipeline, _sink, probe) = build(&config(), Duration::from_millis(150), false);
    assert!(pipeline.initialize().await);

    let producers: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                let pixels = rgb(16, 16);
                let mut cycles = Vec::new();
                for _ in 0..40 {
                    if let FrameOutcome::Dispatched(handle) =
                        pipeline.on_frame(&Frame::rgb(16, 16, &pixels))
                    {
                        cycles.push(handle);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                cycles
            })
        })
        .collect();

    let mut dispatched = 0;
    for producer in producers {
        for cycle in producer.await.unwrap() {
            assert!(matches!(cycle.await.unwrap(), FrameOutcome::Completed(2)));
            dispatched += 1;
        }
    }

    assert_eq!(
        probe.max_active.load(Ordering::SeqCst),
        1,
        "At most one inference may be in flight"
    );
    assert!(dispatched >= 1);
    assert_eq!(dispatched, probe.calls.load(Ordering::SeqCst));
    assert_eq!(pipeline.state(), PipelineState::Ready);
}

#[tokio::test]
async fn test_malformed_frame_dropped_and_next_processed() {
    let (pipeline, sink, _probe) = build(&config(), Duration::ZERO, false);
    assert!(pipeline.initialize().await);

    let bad = vec![0u8; 200];
    let outcome = pipeline.process_frame(&Frame::rgb(10, 10, &bad)).await;
    assert!(matches!(
        outcome,
        FrameOutcome::Rejected(ConversionError::BufferSizeMismatch {
            expected: 300,
            actual: 200
        })
    ));
    assert_eq!(pipeline.state(), PipelineState::Ready);
    assert!(sink.latest().is_none());

    let good = rgb(10, 10);
    let outcome = pipeline.process_frame(&Frame::rgb(10, 10, &good)).await;
    assert!(
        matches!(outcome, FrameOutcome::Completed(2)),
        "A rejected frame must not consume the interval, got {outcome:?}"
    );
}

#[tokio::test]
async fn test_inference_failure_releases_gate() {
    let (pipeline, sink, _probe) = build(&config(), Duration::ZERO, true);
    assert!(pipeline.initialize().await);
    let pixels = rgb(8, 8);

    let outcome = pipeline.process_frame(&Frame::rgb(8, 8, &pixels)).await;

    assert!(matches!(
        outcome,
        FrameOutcome::Failed(InferenceError::Engine(ref msg)) if msg.contains("delegate crashed")
    ));
    assert_eq!(pipeline.state(), PipelineState::Ready);
    assert!(pipeline.is_ready());
    assert!(sink.latest().is_none(), "Failed cycles publish nothing");
}

#[tokio::test]
async fn test_timeout_reported_as_failure() {
    let mut config = config();
    config.inference.inference_timeout = Some(Duration::from_millis(20));
    let (pipeline, _sink, _probe) = build(&config, Duration::from_millis(200), false);
    assert!(pipeline.initialize().await);
    let pixels = rgb(8, 8);

    let outcome = pipeline.process_frame(&Frame::rgb(8, 8, &pixels)).await;

    assert!(matches!(
        outcome,
        FrameOutcome::Failed(InferenceError::Timeout(limit)) if limit == Duration::from_millis(20)
    ));
    assert_eq!(pipeline.state(), PipelineState::Ready);
}

#[tokio::test]
async fn test_timed_out_engine_does_not_queue_frames() {
    let mut config = config();
    config.inference.inference_timeout = Some(Duration::from_millis(20));
    let (pipeline, sink, probe) = build(&config, Duration::from_millis(600), false);
    assert!(pipeline.initialize().await);
    let pixels = rgb(8, 8);

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(pipeline.process_frame(&Frame::rgb(8, 8, &pixels)).await);
        tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;
    }

    assert!(matches!(outcomes[0], FrameOutcome::Failed(InferenceError::Timeout(_))));
    for outcome in &outcomes[1..] {
        assert!(
            matches!(outcome, FrameOutcome::Throttled),
            "Frames behind a hung engine are dropped, got {outcome:?}"
        );
    }

    // Let the abandoned call finish
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(
        probe.calls.load(Ordering::SeqCst),
        1,
        "No stale frame may reach the engine later"
    );
    assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
    assert!(sink.latest().is_none());
    assert_eq!(pipeline.state(), PipelineState::Ready);
}

#[tokio::test]
async fn test_result_discarded_after_dispose() {
    let (pipeline, sink, _probe) = build(&config(), Duration::from_millis(100), false);
    assert!(pipeline.initialize().await);
    let pixels = rgb(8, 8);

    let FrameOutcome::Dispatched(handle) = pipeline.on_frame(&Frame::rgb(8, 8, &pixels)) else {
        panic!("Frame should be admitted");
    };
    // Let the cycle reach the engine
    tokio::time::sleep(Duration::from_millis(30)).await;
    pipeline.dispose();

    assert!(matches!(handle.await.unwrap(), FrameOutcome::Discarded));
    assert!(sink.latest().is_none(), "Nothing is published after dispose");
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let (pipeline, _sink, _probe) = build(&config(), Duration::ZERO, false);
    assert!(pipeline.initialize().await);

    pipeline.dispose();
    assert!(!pipeline.is_ready());
    pipeline.dispose();
    assert!(!pipeline.is_ready());

    assert_eq!(pipeline.state(), PipelineState::Disposed);
    let pixels = rgb(8, 8);
    assert!(matches!(
        pipeline.process_frame(&Frame::rgb(8, 8, &pixels)).await,
        FrameOutcome::NotReady
    ));
    assert!(!pipeline.initialize().await, "Disposed is terminal");
}

#[tokio::test]
async fn test_load_failure_notifies_and_allows_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let invoker = {
        let attempts = Arc::clone(&attempts);
        InferenceInvoker::with_loader(move || {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("truncated model file");
            }
            Ok(ScriptedEngine {
                output: three_detections(),
                delay: Duration::ZERO,
                fail: false,
                probe: Probe::default(),
            })
        })
    };
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let failures = Arc::clone(&failures);
        Arc::new(
            CallbackSink::new(|_| {})
                .with_load_failure(move |e| failures.lock().unwrap().push(e.clone())),
        )
    };
    let pipeline = Pipeline::new(&config(), invoker, sink).unwrap();

    assert!(!pipeline.initialize().await);
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(!pipeline.is_ready());
    assert_eq!(failures.lock().unwrap().len(), 1, "Consumer is told once per failure");
    assert!(matches!(
        failures.lock().unwrap()[0],
        PipelineError::ModelLoad(ModelLoadError::Engine(_))
    ));

    assert!(pipeline.initialize().await, "Retry after failure should succeed");
    assert!(pipeline.is_ready());
    assert_eq!(failures.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_model_asset_reported() {
    let sink = Arc::new(WatchSink::new());
    let pipeline: Pipeline<ScriptedEngine> =
        Pipeline::from_config(&config(), sink.clone()).unwrap();

    assert!(!pipeline.initialize().await);

    assert_eq!(
        sink.load_failure(),
        Some(PipelineError::ModelLoad(ModelLoadError::AssetMissing(
            "/nonexistent/model.onnx".to_string()
        )))
    );
}

#[tokio::test]
async fn test_sets_published_in_order() {
    let sequences = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let sequences = Arc::clone(&sequences);
        Arc::new(CallbackSink::new(move |set| {
            sequences.lock().unwrap().push(set.sequence())
        }))
    };
    let invoker = scripted(Duration::ZERO, false, &Probe::default());
    let pipeline = Pipeline::new(&config(), invoker, sink).unwrap();
    assert!(pipeline.initialize().await);
    let pixels = rgb(8, 8);

    for _ in 0..3 {
        assert!(matches!(
            pipeline.process_frame(&Frame::rgb(8, 8, &pixels)).await,
            FrameOutcome::Completed(_)
        ));
        tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;
    }

    assert_eq!(*sequences.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_on_frame_dispatches_cycle() {
    let (pipeline, sink, _probe) = build(&config(), Duration::from_millis(20), false);
    assert!(pipeline.initialize().await);
    let pixels = rgb(64, 48);

    let FrameOutcome::Dispatched(handle) = pipeline.on_frame(&Frame::rgb(64, 48, &pixels)) else {
        panic!("Frame should be admitted");
    };
    drop(pixels);

    assert!(matches!(
        pipeline.on_frame(&Frame::rgb(2, 2, &rgb(2, 2))),
        FrameOutcome::Throttled
    ));
    assert!(matches!(handle.await.unwrap(), FrameOutcome::Completed(2)));
    assert_eq!(sink.latest().map(|s| s.frame_size()), Some((64, 48)));
}

#[tokio::test]
async fn test_normalized_output_space() {
    let mut config = config();
    config.inference.output_space = CoordinateSpace::Normalized;
    let (pipeline, sink, _probe) = build(&config, Duration::ZERO, false);
    assert!(pipeline.initialize().await);
    let pixels = rgb(200, 100);

    pipeline.process_frame(&Frame::rgb(200, 100, &pixels)).await;

    let set = sink.latest().unwrap();
    assert_eq!(set.space(), CoordinateSpace::Normalized);
    let bbox = *set.detections()[0].bbox();
    let expected = BoundingBox::new(0.2, 0.1, 0.6, 0.5);
    assert!((bbox.x - expected.x).abs() < 1e-5);
    assert!((bbox.y - expected.y).abs() < 1e-5);
    assert!((bbox.width - expected.width).abs() < 1e-5);
    assert!((bbox.height - expected.height).abs() < 1e-5);
}

#[tokio::test]
async fn test_interval_adjustable_at_runtime() {
    let (pipeline, _sink, _probe) = build(&config(), Duration::ZERO, false);

    assert_eq!(
        pipeline.set_min_invocation_interval(Duration::from_millis(30)),
        Duration::from_millis(100),
        "Floor applies to runtime changes too"
    );
    assert_eq!(
        pipeline.set_min_invocation_interval(Duration::from_millis(250)),
        Duration::from_millis(250)
    );
    assert_eq!(pipeline.min_invocation_interval(), Duration::from_millis(250));
}
