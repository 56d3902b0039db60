use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::events::StoreStatusReplyReceived;
use crate::domain::repository::StoreStatusReplySource;
use crate::domain::store_status::StoreStatusReply;
use crate::event_bus::{publish, EventBus};

/// Feeds replies read from the interface into the saga as `StoreStatusReplyReceived`
pub struct StoreStatusReplyPoller {
    source: Arc<dyn StoreStatusReplySource>,
    event_bus: Arc<dyn EventBus>,
    poll_interval: Duration,
}

impl StoreStatusReplyPoller {
    /// Create a poller that idles `poll_interval` when nothing is waiting
    pub fn new(
        source: Arc<dyn StoreStatusReplySource>,
        event_bus: Arc<dyn EventBus>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            event_bus,
            poll_interval,
        }
    }

    /// Run until `cancel` fires.
    ///
    /// A reply that could not be published is held and retried on the next
    /// tick; it has already left the source.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Store status reply poller started");
        let mut held: Option<StoreStatusReply> = None;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let next = match held.take() {
                Some(reply) => Some(reply),
                None => match self.source.next_reply().await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("Failed to read store status reply: {}", e);
                        None
                    }
                },
            };

            if let Some(reply) = next {
                match self.forward(&reply).await {
                    Ok(()) => continue,
                    Err(e) => {
                        warn!(backup_request_id = %reply.backup_request_id, "Failed to publish store status reply: {}", e);
                        held = Some(reply);
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        if let Some(reply) = held {
            warn!(backup_request_id = %reply.backup_request_id, "Dropping unpublished store status reply at shutdown");
        }
        info!("Store status reply poller stopped");
    }

    async fn forward(&self, reply: &StoreStatusReply) -> crate::CoreResult<()> {
        debug!(backup_request_id = %reply.backup_request_id, result = ?reply.result_type_code, "Store status reply read");
        publish(
            self.event_bus.as_ref(),
            &StoreStatusReplyReceived {
                reply: reply.clone(),
            },
        )
        .await
        .map(|_| ())
    }
}
