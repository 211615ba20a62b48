use crate::config::Environment;
use tracing_subscriber::{
    Layer, Registry, layer::Identity, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Initialize tracing subscriber with pretty formatting for development
/// and JSON formatting for production.
///
/// Uses RUST_LOG environment variable for filtering (defaults to "info" if not set).
/// Use [`crate::TelemetryGuard::init`] instead when spans should also be
/// exported over OTLP; it installs the same layers plus the OpenTelemetry bridge.
pub fn setup_logging(environment: Environment) {
    install_subscriber(environment, None::<Identity>);
}

pub(crate) fn install_subscriber<L>(environment: Environment, extra: Option<L>)
where
    L: Layer<Registry> + Send + Sync + 'static,
{
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let registry = tracing_subscriber::registry().with(extra).with(env_filter);

    match environment {
        Environment::Production => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_level(true))
                .init();
        }
        Environment::Development => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
                .init();
        }
    }
}
