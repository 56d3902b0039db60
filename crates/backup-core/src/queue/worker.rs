//!
//! Queue worker
//! Polls one topic, hands claimed jobs to a consumer and settles each job
//! (ack, retry with exponential backoff, or dead letter) from the outcome.
//!

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{JobQueue, QueuedJob};
use crate::config::EventBusConfig;

/// Consumer outcome that tells the worker how to settle a job
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// Try again later, subject to the attempt limit
    #[error("retryable: {0}")]
    Retryable(String),

    /// Never retry; dead-letter the job
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

/// Processes claimed jobs; may update the job's envelope before it is re-queued
#[async_trait]
pub trait JobConsumer: Send + Sync {
    /// Process one job
    async fn consume(&self, job: &mut QueuedJob) -> Result<(), JobError>;
}

/// Worker loop for one topic
pub struct QueueWorker {
    queue: Arc<dyn JobQueue>,
    consumer: Arc<dyn JobConsumer>,
    topic: String,
    config: EventBusConfig,
}

impl QueueWorker {
    /// Create a worker for `topic`
    pub fn new(
        queue: Arc<dyn JobQueue>,
        consumer: Arc<dyn JobConsumer>,
        topic: impl Into<String>,
        config: EventBusConfig,
    ) -> Self {
        Self {
            queue,
            consumer,
            topic: topic.into(),
            config,
        }
    }

    /// Run until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        info!(topic = %self.topic, "Queue worker started");
        let idle = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let claimed = tokio::select! {
                _ = cancel.cancelled() => break,
                claimed = self.queue.next_ready(&self.topic) => claimed,
            };

            match claimed {
                Ok(Some(job)) => {
                    self.process(job).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!(topic = %self.topic, "Failed to poll queue: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(idle) => {}
            }
        }

        info!(topic = %self.topic, "Queue worker stopped");
    }

    /// Hand one job to the consumer and settle it
    pub async fn process(&self, mut job: QueuedJob) {
        debug!(topic = %self.topic, job_id = %job.id, attempt = job.attempts_made + 1, "Processing job");

        let settled = match self.consumer.consume(&mut job).await {
            Ok(()) => self.queue.ack(&job).await,
            Err(JobError::Unrecoverable(reason)) => {
                warn!(job_id = %job.id, "Job failed permanently: {}", reason);
                self.queue.dead_letter(&job, &reason).await
            }
            Err(JobError::Retryable(reason)) => {
                job.attempts_made += 1;
                if job.attempts_made >= job.max_attempts {
                    warn!(job_id = %job.id, attempts = job.attempts_made, "Job out of attempts: {}", reason);
                    self.queue.dead_letter(&job, &reason).await
                } else {
                    let delay = self.backoff(job.attempts_made);
                    debug!(job_id = %job.id, delay_ms = delay.as_millis() as u64, "Retrying job later: {}", reason);
                    self.queue.retry_later(&job, delay).await
                }
            }
        };

        if let Err(e) = settled {
            error!(job_id = %job.id, "Failed to settle job: {}", e);
        }
    }

    fn backoff(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16);
        Duration::from_millis(self.config.backoff_delay_ms.saturating_mul(1u64 << exponent))
    }
}
