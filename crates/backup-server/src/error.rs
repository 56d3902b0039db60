//! Error types for the backup server

use backup_core::CoreError;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Error raised by the core or one of its adapters
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Listener or socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Process wiring failed
    #[error("Startup error: {0}")]
    StartupError(String),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl From<config::ConfigError> for ServerError {
    fn from(err: config::ConfigError) -> Self {
        ServerError::ConfigError(err.to_string())
    }
}
