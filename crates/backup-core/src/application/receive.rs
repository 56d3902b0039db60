use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::backup_request::{BackupRequest, RequestStatusType};
use crate::domain::events::{BackupRequestAccepted, BackupRequestReceived};
use crate::domain::repository::BackupRequestRepository;
use crate::event_bus::{publish, EventBus};
use crate::{CoreError, CoreResult};

/// Persists an accepted request in Received status
pub struct ReceiveBackupRequest {
    request_repo: Arc<dyn BackupRequestRepository>,
    event_bus: Arc<dyn EventBus>,
}

impl ReceiveBackupRequest {
    /// Create the use case
    pub fn new(request_repo: Arc<dyn BackupRequestRepository>, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            request_repo,
            event_bus,
        }
    }

    /// Create the request if it does not exist yet, then publish `BackupRequestReceived`.
    ///
    /// A redelivered accept for a request still in Received publishes again
    /// without saving; a request that already moved on is a status error.
    pub async fn execute(&self, accepted: BackupRequestAccepted) -> CoreResult<BackupRequest> {
        let id = accepted.backup_request_id.clone();

        let request = if self.request_repo.exists(&id).await? {
            let existing = self.request_repo.get_by_id(&id).await?;
            if existing.status_type != RequestStatusType::Received {
                return Err(CoreError::status(id.as_str(), existing.status_type, "receive"));
            }
            debug!(backup_request_id = %id, "Backup request already received, publishing again");
            existing
        } else {
            let request = BackupRequest::new_received(
                accepted.backup_request_id,
                accepted.backup_job_id,
                accepted.data_date,
                accepted.prepared_data_path_name,
                accepted.transport_type,
                accepted.requester_id,
                accepted.accepted_timestamp,
                Utc::now(),
            );
            let saved = self.request_repo.save(&request).await?;
            info!(backup_request_id = %id, "Backup request received");
            saved
        };

        publish(
            self.event_bus.as_ref(),
            &BackupRequestReceived::new(request.backup_request_id.clone()),
        )
        .await?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backup_job::BackupJobId;
    use crate::domain::backup_request::{BackupRequestId, RequestTransportType};
    use crate::domain::repository::MockBackupRequestRepository;
    use crate::event_bus::MockEventBus;
    use chrono::NaiveDate;

    fn accepted() -> BackupRequestAccepted {
        BackupRequestAccepted {
            backup_request_id: BackupRequestId("backup-request-id".to_string()),
            backup_job_id: BackupJobId("backup-job-id".to_string()),
            data_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            prepared_data_path_name: "prepared/path".to_string(),
            transport_type: RequestTransportType::Http,
            requester_id: None,
            accepted_timestamp: Utc::now(),
        }
    }

    fn stored(status: RequestStatusType) -> BackupRequest {
        let a = accepted();
        let mut request = BackupRequest::new_received(
            a.backup_request_id,
            a.backup_job_id,
            a.data_date,
            a.prepared_data_path_name,
            a.transport_type,
            a.requester_id,
            a.accepted_timestamp,
            Utc::now(),
        );
        request.status_type = status;
        request
    }

    fn received_bus(times: usize) -> MockEventBus {
        let mut bus = MockEventBus::new();
        bus.expect_publish_event()
            .withf(|event| event.event_type == "BackupRequestReceived" && event.event_key == "backup-request-id")
            .times(times)
            .returning(Ok);
        bus
    }

    #[tokio::test]
    async fn test_creates_request_and_publishes_once() {
        let mut repo = MockBackupRequestRepository::new();
        repo.expect_exists().times(1).returning(|_| Ok(false));
        repo.expect_save()
            .withf(|r| r.status_type == RequestStatusType::Received && r.received_timestamp.is_some())
            .times(1)
            .returning(|r| Ok(r.clone()));

        let use_case = ReceiveBackupRequest::new(Arc::new(repo), Arc::new(received_bus(1)));
        let request = use_case.execute(accepted()).await.unwrap();

        assert_eq!(request.backup_request_id.as_str(), "backup-request-id");
        assert_eq!(request.status_type, RequestStatusType::Received);
    }

    #[tokio::test]
    async fn test_redelivery_republishes_without_saving() {
        let mut repo = MockBackupRequestRepository::new();
        repo.expect_exists().returning(|_| Ok(true));
        repo.expect_get_by_id()
            .returning(|_| Ok(stored(RequestStatusType::Received)));
        repo.expect_save().never();

        let use_case = ReceiveBackupRequest::new(Arc::new(repo), Arc::new(received_bus(1)));
        use_case.execute(accepted()).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_in_later_status_is_status_error() {
        let mut repo = MockBackupRequestRepository::new();
        repo.expect_exists().returning(|_| Ok(true));
        repo.expect_get_by_id()
            .returning(|_| Ok(stored(RequestStatusType::Sent)));
        repo.expect_save().never();

        let use_case = ReceiveBackupRequest::new(Arc::new(repo), Arc::new(received_bus(0)));
        let err = use_case.execute(accepted()).await.unwrap_err();

        assert!(matches!(err, CoreError::StatusError { .. }));
    }

    #[tokio::test]
    async fn test_database_error_stops_before_publish() {
        let mut repo = MockBackupRequestRepository::new();
        repo.expect_exists().returning(|_| Ok(false));
        repo.expect_save()
            .returning(|_| Err(CoreError::database("constraint violation")));

        let use_case = ReceiveBackupRequest::new(Arc::new(repo), Arc::new(received_bus(0)));
        let err = use_case.execute(accepted()).await.unwrap_err();

        assert!(matches!(err, CoreError::DatabaseError { .. }));
    }
}
