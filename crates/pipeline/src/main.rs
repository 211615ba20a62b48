use clap::Parser;
use common::{TelemetryGuard, setup_logging};
use inference::backend::ort::OrtBackend;
use pipeline::{CallbackSink, FrameOutcome, Pipeline, PipelineConfig};
use schema::Frame;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Feed still images through the detection pipeline as if they came from a
/// camera, printing each published detection set as a JSON line.
#[derive(Parser, Debug)]
#[command(name = "replay")]
struct Args {
    /// Glob matching the frames to replay, e.g. "frames/*.jpg"
    pattern: String,

    /// Delay between two frames
    #[arg(long, default_value_t = 1000)]
    capture_interval_ms: u64,

    /// Model load attempts before giving up
    #[arg(long, default_value_t = 5)]
    load_attempts: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = PipelineConfig::from_env();

    let _telemetry = match config.otel_endpoint.as_deref() {
        Some(endpoint) => Some(TelemetryGuard::init("pipeline", endpoint, config.environment)?),
        None => {
            setup_logging(config.environment);
            None
        }
    };

    tracing::info!("Replay starting with config: {:?}", config);

    let sink = Arc::new(CallbackSink::new(|set| match serde_json::to_string(&*set) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize detection set"),
    }));
    let pipeline = Arc::new(Pipeline::<OrtBackend>::from_config(&config, sink)?);

    initialize_with_retry(&pipeline, args.load_attempts).await?;

    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.capture_interval_ms.max(1)));
    let mut frames = 0u64;
    let mut pending = None;

    for entry in glob::glob(&args.pattern)? {
        let path = entry?;
        ticker.tick().await;

        // Decoding belongs to the frame source, not the pipeline
        let image = match image::open(&path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable image");
                continue;
            }
        };

        let frame = Frame::rgb(image.width(), image.height(), image.as_raw())
            .with_timestamp(started.elapsed());

        match pipeline.on_frame(&frame) {
            FrameOutcome::Dispatched(handle) => pending = Some(handle),
            outcome => tracing::debug!(path = %path.display(), ?outcome, "Frame not processed"),
        }

        frames += 1;
        if frames.is_multiple_of(30) {
            tracing::info!(frames, "Replay status");
        }
    }

    if let Some(handle) = pending {
        handle.await?;
    }

    pipeline.dispose();
    tracing::info!(frames, "Replay finished");
    Ok(())
}

async fn initialize_with_retry(
    pipeline: &Pipeline<OrtBackend>,
    attempts: u32,
) -> anyhow::Result<()> {
    let mut delay = Duration::from_millis(500);

    for attempt in 1..=attempts.max(1) {
        if pipeline.initialize().await {
            return Ok(());
        }

        tracing::warn!(attempt, retry_in_ms = delay.as_millis() as u64, "Model not ready");
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_secs(10));
    }

    anyhow::bail!("Model failed to load after {attempts} attempts")
}
