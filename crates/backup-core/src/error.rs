use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::events::EventEnvelope;
use crate::resilience::CircuitBreaker;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Handle to the circuit breaker of the dependency that failed to connect.
///
/// Attached to dependency errors when the failure was at the transport level.
/// Consumers use it to park the triggering event in the breaker's retry drain
/// instead of burning their own retry budget.
#[derive(Clone)]
pub struct ConnectFailureInfo {
    breaker: Arc<CircuitBreaker>,
}

impl ConnectFailureInfo {
    /// Wrap the breaker owned by the failing adapter
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }

    /// Name of the dependency the breaker protects
    pub fn service_name(&self) -> &str {
        self.breaker.service_name()
    }

    /// Whether the dependency is currently trusted
    pub fn is_connected(&self) -> bool {
        self.breaker.is_connected()
    }

    /// Queue an event for replay once the dependency is healthy again
    pub fn add_retry_event(&self, event: EventEnvelope) {
        self.breaker.add_retry_event(event);
    }
}

impl fmt::Debug for ConnectFailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectFailureInfo")
            .field("service_name", &self.service_name())
            .field("is_connected", &self.is_connected())
            .finish()
    }
}

/// Core error type for the backup request service
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Invalid or missing domain input; never retried
    #[error("Invalid properties: {0}")]
    PropsError(String),

    /// Entity not found
    #[error("{0} not found")]
    NotFound(String),

    /// Request is in a status that does not allow the operation
    #[error("Backup request {backup_request_id} is {status}, cannot {operation}")]
    StatusError {
        /// Request the operation was attempted on
        backup_request_id: String,
        /// Status the request was found in
        status: String,
        /// Operation that was rejected
        operation: String,
    },

    /// Relational store error
    #[error("Database error: {message}")]
    DatabaseError {
        /// Driver-level description, stripped before reaching HTTP callers
        message: String,
        /// Present when the failure was at the connection level
        connect_failure: Option<ConnectFailureInfo>,
    },

    /// Event bus error
    #[error("Event bus error: {message}")]
    EventBusError {
        /// Backend-level description
        message: String,
        /// Present when the failure was at the connection level
        connect_failure: Option<ConnectFailureInfo>,
    },

    /// Backup job lookup service error
    #[error("Backup job service error: {message}")]
    BackupJobServiceError {
        /// Service-level description
        message: String,
        /// Present when the failure was at the connection level
        connect_failure: Option<ConnectFailureInfo>,
    },

    /// Backup interface store error
    #[error("Interface store error: {message}")]
    InterfaceStoreError {
        /// Store-level description
        message: String,
        /// Present when the failure was at the connection level
        connect_failure: Option<ConnectFailureInfo>,
    },

    /// Terminal failure; the queue backend must not retry
    #[error("Unrecoverable: {0}")]
    Unrecoverable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl CoreError {
    /// Database error that did not involve the connection
    pub fn database(message: impl Into<String>) -> Self {
        CoreError::DatabaseError {
            message: message.into(),
            connect_failure: None,
        }
    }

    /// Database error raised because the store could not be reached
    pub fn database_connect(message: impl Into<String>, info: ConnectFailureInfo) -> Self {
        CoreError::DatabaseError {
            message: message.into(),
            connect_failure: Some(info),
        }
    }

    /// Event bus error that did not involve the connection
    pub fn event_bus(message: impl Into<String>) -> Self {
        CoreError::EventBusError {
            message: message.into(),
            connect_failure: None,
        }
    }

    /// Event bus error raised because the backend could not be reached
    pub fn event_bus_connect(message: impl Into<String>, info: ConnectFailureInfo) -> Self {
        CoreError::EventBusError {
            message: message.into(),
            connect_failure: Some(info),
        }
    }

    /// Backup job service error that did not involve the connection
    pub fn backup_job_service(message: impl Into<String>) -> Self {
        CoreError::BackupJobServiceError {
            message: message.into(),
            connect_failure: None,
        }
    }

    /// Backup job service error raised because the service could not be reached
    pub fn backup_job_service_connect(message: impl Into<String>, info: ConnectFailureInfo) -> Self {
        CoreError::BackupJobServiceError {
            message: message.into(),
            connect_failure: Some(info),
        }
    }

    /// Interface store error that did not involve the connection
    pub fn interface_store(message: impl Into<String>) -> Self {
        CoreError::InterfaceStoreError {
            message: message.into(),
            connect_failure: None,
        }
    }

    /// Interface store error raised because the store could not be reached
    pub fn interface_store_connect(message: impl Into<String>, info: ConnectFailureInfo) -> Self {
        CoreError::InterfaceStoreError {
            message: message.into(),
            connect_failure: Some(info),
        }
    }

    /// Status error for an operation attempted from the wrong status
    pub fn status(
        backup_request_id: impl Into<String>,
        status: impl fmt::Display,
        operation: impl Into<String>,
    ) -> Self {
        CoreError::StatusError {
            backup_request_id: backup_request_id.into(),
            status: status.to_string(),
            operation: operation.into(),
        }
    }

    /// Connect failure details, if this error was caused by a dependency being unreachable
    pub fn connect_failure(&self) -> Option<&ConnectFailureInfo> {
        match self {
            CoreError::DatabaseError { connect_failure, .. }
            | CoreError::EventBusError { connect_failure, .. }
            | CoreError::BackupJobServiceError { connect_failure, .. }
            | CoreError::InterfaceStoreError { connect_failure, .. } => connect_failure.as_ref(),
            _ => None,
        }
    }

    /// Check if the error is a connection-level failure
    pub fn is_connect_failure(&self) -> bool {
        self.connect_failure().is_some()
    }

    /// Check if the error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }

    /// Check if the error is a props error
    pub fn is_props_error(&self) -> bool {
        matches!(self, CoreError::PropsError(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}
