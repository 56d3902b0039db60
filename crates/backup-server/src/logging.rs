//! Tracing subscriber setup

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Install the global subscriber: `RUST_LOG` if set, else the configured filter
pub fn init_logging(config: &ServerConfig) -> ServerResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| ServerError::ConfigError(format!("Invalid log filter: {}", e)))?;

    let layer = tracing_subscriber::fmt::layer().with_target(true);
    let layer = if config.log_json {
        layer.json().boxed()
    } else {
        layer.pretty().boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| ServerError::StartupError(format!("Failed to install tracing subscriber: {}", e)))
}
