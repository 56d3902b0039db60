use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::config::RestartStalledConfig;
use crate::domain::backup_request::{BackupRequest, BackupRequestId, RequestStatusType};
use crate::domain::events::{BackupRequestAllowed, BackupRequestReceived, EventEnvelope};
use crate::domain::repository::BackupRequestRepository;
use crate::event_bus::EventBus;
use crate::CoreResult;

/// Outcome of one recovery run; each branch succeeds or fails on its own
#[derive(Debug)]
pub struct RestartStalledResult {
    /// Requests stuck in Allowed whose `BackupRequestAllowed` was republished
    pub allowed: CoreResult<Vec<BackupRequestId>>,
    /// Requests stuck in Received whose `BackupRequestReceived` was republished
    pub received: CoreResult<Vec<BackupRequestId>>,
}

/// Re-drives requests whose saga stopped moving, typically after a restart
pub struct RestartStalled {
    request_repo: Arc<dyn BackupRequestRepository>,
    event_bus: Arc<dyn EventBus>,
    config: RestartStalledConfig,
}

impl RestartStalled {
    /// Create the use case
    pub fn new(
        request_repo: Arc<dyn BackupRequestRepository>,
        event_bus: Arc<dyn EventBus>,
        config: RestartStalledConfig,
    ) -> Self {
        Self {
            request_repo,
            event_bus,
            config,
        }
    }

    /// Republish the events of requests stuck in Allowed or Received since before the cutoff
    pub async fn execute(&self) -> RestartStalledResult {
        let cutoff = Utc::now() - Duration::milliseconds(self.config.stalled_after_ms as i64);

        let allowed = self
            .restart(RequestStatusType::Allowed, cutoff, |r| {
                EventEnvelope::wrap(&BackupRequestAllowed::new(r.backup_request_id.clone()))
            })
            .await;
        let received = self
            .restart(RequestStatusType::Received, cutoff, |r| {
                EventEnvelope::wrap(&BackupRequestReceived::new(r.backup_request_id.clone()))
            })
            .await;

        match (&allowed, &received) {
            (Ok(a), Ok(r)) => info!(allowed = a.len(), received = r.len(), "Restarted stalled requests"),
            _ => warn!(
                allowed_ok = allowed.is_ok(),
                received_ok = received.is_ok(),
                "Restarting stalled requests partly failed"
            ),
        }

        RestartStalledResult { allowed, received }
    }

    async fn restart<F>(
        &self,
        status: RequestStatusType,
        cutoff: chrono::DateTime<Utc>,
        to_event: F,
    ) -> CoreResult<Vec<BackupRequestId>>
    where
        F: Fn(&BackupRequest) -> CoreResult<EventEnvelope>,
    {
        let stalled = match self
            .request_repo
            .get_by_status_before_timestamp(status, cutoff)
            .await
        {
            Ok(requests) => requests,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                warn!(status = %status, "Failed to query stalled requests: {}", e);
                return Err(e);
            }
        };

        let mut restarted = Vec::with_capacity(stalled.len());
        for request in &stalled {
            self.event_bus.publish_event(to_event(request)?).await?;
            restarted.push(request.backup_request_id.clone());
        }
        Ok(restarted)
    }
}
