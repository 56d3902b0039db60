//!
//! Durable event bus
//! Publishing enqueues one job per event on its topic; queue workers later
//! hand the job to the subscribed handlers. The bus owns the circuit breaker
//! protecting the queue backend.
//!

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{park_on_connect_failure, EventBus, EventHandler};
use crate::config::{CircuitBreakerConfig, EventBusConfig};
use crate::domain::events::{topic_name_for, EventEnvelope};
use crate::queue::{JobConsumer, JobError, JobQueue, QueueError, QueueWorker, QueuedJob};
use crate::resilience::{AdapterLivenessCheck, CircuitBreaker};
use crate::{CoreError, CoreResult};

/// Liveness probe of a queue backend
struct QueueLiveness {
    queue: Arc<dyn JobQueue>,
}

#[async_trait]
impl AdapterLivenessCheck for QueueLiveness {
    async fn is_alive(&self) -> CoreResult<bool> {
        self.queue
            .is_alive()
            .await
            .map_err(|e| CoreError::event_bus(e.to_string()))
    }
}

/// Dispatches claimed jobs to handlers and classifies their failures.
///
/// A connect failure parks the event in the failing dependency's retry drain
/// and completes the job. Props and unrecoverable errors give the job up at
/// once. Any other failure is retried until the envelope's retry count
/// reaches `max_true_failures`.
pub struct EventJobConsumer {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    max_true_failures: u32,
}

impl EventJobConsumer {
    /// Create a consumer with no handlers
    pub fn new(max_true_failures: u32) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            max_true_failures,
        }
    }

    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    fn clear(&self) {
        self.handlers.write().clear();
    }
}

#[async_trait]
impl JobConsumer for EventJobConsumer {
    async fn consume(&self, job: &mut QueuedJob) -> Result<(), JobError> {
        let handlers = self
            .handlers
            .read()
            .get(&job.envelope.event_type)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            warn!(event_type = %job.envelope.event_type, "No handler subscribed, dropping job");
            return Ok(());
        }

        for handler in handlers {
            let Err(e) = handler.handle(job.envelope.clone()).await else {
                continue;
            };

            if let Some(parked) = park_on_connect_failure(&job.envelope, &e) {
                job.envelope = parked;
                return Ok(());
            }

            if matches!(e, CoreError::PropsError(_) | CoreError::Unrecoverable(_))
                || job.envelope.retry_count >= self.max_true_failures
            {
                return Err(JobError::Unrecoverable(e.to_string()));
            }
            job.envelope = job.envelope.with_incremented_retry_count();
            return Err(JobError::Retryable(e.to_string()));
        }

        Ok(())
    }
}

/// Event bus backed by a durable job queue
pub struct DurableEventBus {
    queue: Arc<dyn JobQueue>,
    breaker: Arc<CircuitBreaker>,
    consumer: Arc<EventJobConsumer>,
    topics: RwLock<BTreeSet<String>>,
    config: EventBusConfig,
}

impl DurableEventBus {
    /// Create the bus and its breaker. The breaker still has to be settled.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        config: EventBusConfig,
        breaker_config: CircuitBreakerConfig,
        shutdown: &CancellationToken,
    ) -> Arc<Self> {
        let liveness = Arc::new(QueueLiveness { queue: queue.clone() });
        let breaker = CircuitBreaker::with_cancellation(breaker_config, liveness, shutdown);

        let bus = Arc::new(Self {
            queue,
            breaker,
            consumer: Arc::new(EventJobConsumer::new(config.max_true_failures)),
            topics: RwLock::new(BTreeSet::new()),
            config,
        });

        let publisher: Arc<dyn EventBus> = bus.clone();
        bus.breaker.set_retry_publisher(&publisher);
        bus
    }

    /// Breaker protecting the queue backend
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Topics that currently have handlers
    pub fn topics(&self) -> Vec<String> {
        self.topics.read().iter().cloned().collect()
    }

    /// Spawn one worker per subscribed topic; they stop when `cancel` fires
    pub fn start_workers(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.topics()
            .into_iter()
            .map(|topic| {
                let worker = QueueWorker::new(
                    self.queue.clone(),
                    self.consumer.clone(),
                    topic,
                    self.config.clone(),
                );
                tokio::spawn(worker.run(cancel.child_token()))
            })
            .collect()
    }

    fn map_queue_error(&self, err: QueueError) -> CoreError {
        match err {
            QueueError::Connect(message) => {
                CoreError::event_bus_connect(message, self.breaker.connect_failure_info())
            }
            other => CoreError::event_bus(other.to_string()),
        }
    }
}

#[async_trait]
impl EventBus for DurableEventBus {
    async fn publish_event(&self, event: EventEnvelope) -> CoreResult<EventEnvelope> {
        if !self.breaker.is_connected() {
            return Err(CoreError::event_bus_connect(
                "circuit open, event not enqueued",
                self.breaker.connect_failure_info(),
            ));
        }

        let job = QueuedJob::new(event.clone(), self.config.max_attempts);
        let result = self
            .queue
            .add(job)
            .await
            .map_err(|e| self.map_queue_error(e));
        self.breaker.record_outcome(&result);

        if result? {
            debug!(topic = %event.topic_name, event_key = %event.event_key, "Event enqueued");
        } else {
            debug!(topic = %event.topic_name, event_key = %event.event_key, "Event already pending");
        }
        Ok(event)
    }

    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.consumer.subscribe(event_type, handler);
        self.topics.write().insert(topic_name_for(event_type));
    }

    fn clear_handlers(&self) {
        self.consumer.clear();
        self.topics.write().clear();
    }
}
