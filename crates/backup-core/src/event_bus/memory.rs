//! In-process event bus

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error};

use super::{park_on_connect_failure, EventBus, EventHandler};
use crate::domain::events::EventEnvelope;
use crate::CoreResult;

/// Event bus that calls subscribed handlers directly, in subscription order.
///
/// Handler failures never reach the publisher. A connect failure parks the
/// event in the failing dependency's retry drain; anything else is logged.
#[derive(Default)]
pub struct MemoryEventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl MemoryEventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers registered for an event type
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish_event(&self, event: EventEnvelope) -> CoreResult<EventEnvelope> {
        let handlers = self
            .handlers
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        debug!(
            event_type = %event.event_type,
            event_key = %event.event_key,
            handlers = handlers.len(),
            "Dispatching event"
        );

        for handler in handlers {
            let Err(e) = handler.handle(event.clone()).await else {
                continue;
            };
            if park_on_connect_failure(&event, &e).is_none() {
                error!(
                    event_type = %event.event_type,
                    event_key = %event.event_key,
                    "Event handler failed: {}",
                    e
                );
            }
        }

        Ok(event)
    }

    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    fn clear_handlers(&self) {
        self.handlers.write().clear();
    }
}
