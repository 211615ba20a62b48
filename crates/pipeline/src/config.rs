use crate::gate::{DEFAULT_MIN_INVOCATION_INTERVAL, MIN_INVOCATION_INTERVAL_FLOOR};
use common::{Environment, env_opt};
use inference::InferenceConfig;
use std::{env, time::Duration};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub environment: Environment,
    pub otel_endpoint: Option<String>,
    pub min_invocation_interval: Duration,
    pub inference: InferenceConfig,
}

impl PipelineConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Self {
        let min_invocation_interval = env_opt::<u64>("MIN_INVOCATION_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MIN_INVOCATION_INTERVAL)
            .max(MIN_INVOCATION_INTERVAL_FLOOR);

        Self {
            environment: Environment::from_env(),
            otel_endpoint: env::var("OTEL_ENDPOINT").ok().filter(|s| !s.is_empty()),
            min_invocation_interval,
            inference: InferenceConfig::from_env(),
        }
    }
}
