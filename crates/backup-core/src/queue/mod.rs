//! Durable job queue abstraction used by the durable event bus
//!
//! A job wraps one event envelope. Job ids are derived from the event type
//! and key, so enqueueing an event that is already pending is a no-op.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::events::EventEnvelope;

#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryJobQueue;
pub use worker::{JobConsumer, JobError, QueueWorker};

/// Errors raised by queue backends
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// Backend could not be reached
    #[error("Queue connection error: {0}")]
    Connect(String),

    /// Backend answered with an error
    #[error("Queue error: {0}")]
    Backend(String),

    /// Stored job could not be read back
    #[error("Queue serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// One queued event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    /// `event_type|event_key`
    pub id: String,
    /// Topic (queue name) the job lives on
    pub topic: String,
    /// The event to deliver
    pub envelope: EventEnvelope,
    /// Delivery attempts that ended in a retryable failure
    pub attempts_made: u32,
    /// Attempts allowed before the job is dead-lettered
    pub max_attempts: u32,
}

impl QueuedJob {
    /// Job for an event on its own topic
    pub fn new(envelope: EventEnvelope, max_attempts: u32) -> Self {
        Self {
            id: envelope.job_id(),
            topic: envelope.topic_name.clone(),
            envelope,
            attempts_made: 0,
            max_attempts,
        }
    }
}

/// Storage backend of the durable event bus
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for immediate delivery. Returns false, without changing
    /// anything, when a job with the same id is already pending.
    async fn add(&self, job: QueuedJob) -> QueueResult<bool>;

    /// Claim the next job on `topic` whose ready time has passed
    async fn next_ready(&self, topic: &str) -> QueueResult<Option<QueuedJob>>;

    /// Remove a delivered job
    async fn ack(&self, job: &QueuedJob) -> QueueResult<()>;

    /// Store the job as given and make it ready again after `delay`
    async fn retry_later(&self, job: &QueuedJob, delay: Duration) -> QueueResult<()>;

    /// Remove the job and record it as dead with a reason
    async fn dead_letter(&self, job: &QueuedJob, reason: &str) -> QueueResult<()>;

    /// Whether the backend answers
    async fn is_alive(&self) -> QueueResult<bool>;
}
