//! Event bus abstraction
//!
//! Two backends implement [`EventBus`]: an in-process bus that dispatches
//! synchronously to subscribed handlers, and a durable bus that enqueues one
//! job per event on a [`JobQueue`](crate::queue::JobQueue) and lets queue
//! workers dispatch later.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::events::{Event, EventEnvelope};
use crate::{CoreError, CoreResult};

pub mod durable;
pub mod memory;

pub use durable::DurableEventBus;
pub use memory::MemoryEventBus;

/// Handler invoked for every published event of the type it subscribed to
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event
    async fn handle(&self, event: EventEnvelope) -> CoreResult<()>;
}

/// Publish/subscribe contract shared by all backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one event and return it
    async fn publish_event(&self, event: EventEnvelope) -> CoreResult<EventEnvelope>;

    /// Publish several events, one after another, stopping at the first failure
    async fn publish_events_bulk(&self, events: Vec<EventEnvelope>) -> CoreResult<Vec<EventEnvelope>> {
        let mut published = Vec::with_capacity(events.len());
        for event in events {
            published.push(self.publish_event(event).await?);
        }
        Ok(published)
    }

    /// Register a handler for an event type
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>);

    /// Drop every registered handler
    fn clear_handlers(&self);
}

/// Wrap a typed event and publish it
pub async fn publish<E: Event>(bus: &dyn EventBus, event: &E) -> CoreResult<EventEnvelope> {
    let envelope = EventEnvelope::wrap(event)?;
    bus.publish_event(envelope).await
}

/// Park an event whose handler hit an unreachable dependency.
///
/// Bumps the envelope's connect failure count and hands it to the failing
/// dependency's retry drain. Returns the parked envelope, or `None` when the
/// error is not a connect failure. Both backends route handler failures
/// through here.
pub fn park_on_connect_failure(envelope: &EventEnvelope, err: &CoreError) -> Option<EventEnvelope> {
    let info = err.connect_failure()?;
    let parked = envelope.with_incremented_connect_failure_count();
    warn!(
        event_type = %parked.event_type,
        event_key = %parked.event_key,
        service = %info.service_name(),
        connect_failure_count = parked.connect_failure_count,
        "Dependency unreachable, parking event for retry"
    );
    info.add_retry_event(parked.clone());
    Some(parked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::domain::backup_request::BackupRequestId;
    use crate::domain::events::BackupRequestReceived;
    use crate::resilience::{liveness_fn, CircuitBreaker};

    fn envelope() -> EventEnvelope {
        EventEnvelope::wrap(&BackupRequestReceived::new(BackupRequestId("r1".to_string()))).unwrap()
    }

    #[tokio::test]
    async fn test_connect_failure_is_parked_with_bumped_counter() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::for_service("database"),
            liveness_fn(|| async { Ok(false) }),
        );
        let err = CoreError::database_connect("connection refused", breaker.connect_failure_info());

        let parked = park_on_connect_failure(&envelope(), &err).unwrap();

        assert_eq!(parked.connect_failure_count, 1);
        assert_eq!(parked.retry_count, 0);
        assert_eq!(breaker.retry_event_count(), 1);
    }

    #[test]
    fn test_other_failures_are_not_parked() {
        let err = CoreError::database("syntax error");
        assert!(park_on_connect_failure(&envelope(), &err).is_none());
    }
}
