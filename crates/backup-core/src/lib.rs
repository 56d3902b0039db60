//!
//! Backup Core - domain model and resilience layer for the backup request service
//!
//! This crate defines the backup request saga (accept, receive, check allowed,
//! send to interface, receive store status reply, restart stalled), the
//! circuit breaker and retry drain that protect every external dependency,
//! and the event bus abstraction the saga steps use to hand off work.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - backup requests, jobs, backups, events and repository traits
pub mod domain;

/// Application services - the saga use cases and their event subscribers
pub mod application;

/// Circuit breaker and retry drain
pub mod resilience;

/// Event bus abstraction and its backends
pub mod event_bus;

/// Durable job queue abstraction and worker
pub mod queue;

/// Configuration types shared by every component
pub mod config;

/// Error types
pub mod error;

// Re-export key types
pub use config::{CircuitBreakerConfig, EventBusBackend, EventBusConfig, RestartStalledConfig};
pub use error::{ConnectFailureInfo, CoreError, CoreResult};

pub use domain::backup::{Backup, BackupId};
pub use domain::backup_job::{BackupJob, BackupJobId};
pub use domain::backup_request::{
    BackupRequest, BackupRequestId, RequestStatusType, RequestTransportType,
};
pub use domain::events::{Event, EventEnvelope};
pub use domain::repository::{
    BackupInterfaceStore, BackupJobService, BackupRepository, BackupRequestRepository,
    StoreStatusReplySource,
};

pub use event_bus::{EventBus, EventHandler};
pub use resilience::{AdapterLivenessCheck, CircuitBreaker, CircuitState, RetryDrain};
