//!
//! Retry drain
//! Holds events parked while a dependency was unreachable and republishes
//! them one at a time, with a delay between items, once the owning circuit
//! breaker lets it run.
//!

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::events::EventEnvelope;
use crate::event_bus::EventBus;

/// Drain run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Idle; a run may start
    Stop,
    /// A run is draining the queue
    Run,
    /// Terminal; new events are discarded
    Halt,
}

struct DrainInner {
    queue: VecDeque<EventEnvelope>,
    state: DrainState,
    delay_ms: u64,
    stop_requested: bool,
}

/// Deduplicated FIFO of events waiting to be republished
pub struct RetryDrain {
    name: String,
    publisher: RwLock<Option<Weak<dyn EventBus>>>,
    inner: Mutex<DrainInner>,
    cancel: CancellationToken,
}

impl RetryDrain {
    /// Create a drain; cancelling `cancel` halts it
    pub fn new(name: impl Into<String>, delay_ms: u64, cancel: CancellationToken) -> Self {
        Self {
            name: name.into(),
            publisher: RwLock::new(None),
            inner: Mutex::new(DrainInner {
                queue: VecDeque::new(),
                state: DrainState::Stop,
                delay_ms,
                stop_requested: false,
            }),
            cancel,
        }
    }

    /// Set the bus drained events are republished on.
    ///
    /// Only a weak reference is kept so a bus can own the breaker whose
    /// drain publishes back onto it.
    pub fn set_publisher(&self, bus: &Arc<dyn EventBus>) {
        *self.publisher.write() = Some(Arc::downgrade(bus));
    }

    /// Queue an event. Returns false when it was discarded, either because
    /// the same event is already queued or because the drain is halted.
    pub fn add_event(&self, event: EventEnvelope) -> bool {
        let mut inner = self.inner.lock();

        if inner.state == DrainState::Halt {
            debug!(drain = %self.name, event_type = %event.event_type, "Drain halted, discarding event");
            return false;
        }

        if inner.queue.iter().any(|queued| queued.is_same_event(&event)) {
            debug!(drain = %self.name, event_key = %event.event_key, "Event already queued");
            return false;
        }

        inner.queue.push_back(event);
        true
    }

    /// Drain the queue until it is empty, stopped, or cancelled.
    ///
    /// No-op when the queue is empty or another run is in progress.
    pub async fn run_events(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.queue.is_empty() || inner.state != DrainState::Stop {
                return;
            }
            inner.state = DrainState::Run;
            inner.stop_requested = false;
            debug!(drain = %self.name, queued = inner.queue.len(), "Draining retry events");
        }

        loop {
            let (event, delay_ms) = {
                let mut inner = self.inner.lock();
                if inner.state == DrainState::Halt {
                    return;
                }
                if inner.stop_requested {
                    inner.state = DrainState::Stop;
                    return;
                }
                match inner.queue.pop_front() {
                    Some(event) => (event, inner.delay_ms),
                    None => {
                        inner.state = DrainState::Stop;
                        return;
                    }
                }
            };

            if !self.publish(&event).await {
                let mut inner = self.inner.lock();
                if inner.state != DrainState::Halt {
                    if !inner.queue.iter().any(|queued| queued.is_same_event(&event)) {
                        inner.queue.push_front(event);
                    }
                    inner.state = DrainState::Stop;
                }
                return;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.inner.lock().state = DrainState::Halt;
                    info!(drain = %self.name, "Retry drain cancelled");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
        }
    }

    async fn publish(&self, event: &EventEnvelope) -> bool {
        let publisher = self.publisher.read().as_ref().and_then(Weak::upgrade);
        let Some(bus) = publisher else {
            warn!(drain = %self.name, "No event bus attached, keeping event queued");
            return false;
        };

        match bus.publish_event(event.clone()).await {
            Ok(_) => {
                debug!(drain = %self.name, event_type = %event.event_type, event_key = %event.event_key, "Republished event");
                true
            }
            Err(e) => {
                warn!(drain = %self.name, event_type = %event.event_type, "Failed to republish event: {}", e);
                false
            }
        }
    }

    /// Ask a running drain to stop after the current item; queued events are kept
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.state == DrainState::Run {
            inner.stop_requested = true;
        }
    }

    /// Halt for good and drop everything queued
    pub fn halt(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = DrainState::Halt;
            inner.queue.clear();
        }
        self.cancel.cancel();
    }

    /// Change the delay used between items of the next runs
    pub fn set_delay_ms(&self, delay_ms: u64) {
        self.inner.lock().delay_ms = delay_ms;
    }

    /// Delay between items
    pub fn delay_ms(&self) -> u64 {
        self.inner.lock().delay_ms
    }

    /// Current run state
    pub fn state(&self) -> DrainState {
        self.inner.lock().state
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }
}
