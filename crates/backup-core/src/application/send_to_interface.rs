use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::domain::backup_request::{BackupRequest, BackupRequestId, RequestStatusType};
use crate::domain::events::BackupRequestSentToInterface;
use crate::domain::repository::{BackupInterfaceStore, BackupRequestRepository};
use crate::event_bus::{publish, EventBus};
use crate::{CoreError, CoreResult};

/// Hands allowed requests to the backup interface
pub struct SendToInterface {
    request_repo: Arc<dyn BackupRequestRepository>,
    interface_store: Arc<dyn BackupInterfaceStore>,
    event_bus: Arc<dyn EventBus>,
}

impl SendToInterface {
    /// Create the use case
    pub fn new(
        request_repo: Arc<dyn BackupRequestRepository>,
        interface_store: Arc<dyn BackupInterfaceStore>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            request_repo,
            interface_store,
            event_bus,
        }
    }

    /// Send the request and record it as Sent. Only valid from Allowed.
    pub async fn execute(&self, id: &BackupRequestId) -> CoreResult<BackupRequest> {
        let mut request = self.request_repo.get_by_id(id).await?;
        if request.status_type != RequestStatusType::Allowed {
            return Err(CoreError::status(id.as_str(), request.status_type, "send to interface"));
        }

        self.interface_store.send_request(&request).await?;

        request.mark_sent(Utc::now())?;
        let request = self.request_repo.save(&request).await?;
        info!(backup_request_id = %id, "Backup request sent to interface");

        publish(self.event_bus.as_ref(), &BackupRequestSentToInterface::new(id.clone())).await?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backup_job::BackupJobId;
    use crate::domain::backup_request::RequestTransportType;
    use crate::domain::repository::{MockBackupInterfaceStore, MockBackupRequestRepository};
    use crate::event_bus::MockEventBus;
    use chrono::NaiveDate;

    fn request(status: RequestStatusType) -> BackupRequest {
        let now = Utc::now();
        let mut request = BackupRequest::new_received(
            BackupRequestId("backup-request-id".to_string()),
            BackupJobId("backup-job-id".to_string()),
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            "prepared/path".to_string(),
            RequestTransportType::Queue,
            None,
            now,
            now,
        );
        request.status_type = status;
        request
    }

    fn id() -> BackupRequestId {
        BackupRequestId("backup-request-id".to_string())
    }

    #[tokio::test]
    async fn test_allowed_request_is_sent_and_saved() {
        let mut repo = MockBackupRequestRepository::new();
        repo.expect_get_by_id()
            .returning(|_| Ok(request(RequestStatusType::Allowed)));
        repo.expect_save()
            .withf(|r| r.status_type == RequestStatusType::Sent && r.sent_to_interface_timestamp.is_some())
            .times(1)
            .returning(|r| Ok(r.clone()));
        let mut store = MockBackupInterfaceStore::new();
        store.expect_send_request().times(1).returning(|_| Ok(()));
        let mut bus = MockEventBus::new();
        bus.expect_publish_event()
            .withf(|event| event.event_type == "BackupRequestSentToInterface")
            .times(1)
            .returning(Ok);

        let use_case = SendToInterface::new(Arc::new(repo), Arc::new(store), Arc::new(bus));
        let sent = use_case.execute(&id()).await.unwrap();

        assert_eq!(sent.status_type, RequestStatusType::Sent);
    }

    #[tokio::test]
    async fn test_other_statuses_are_rejected() {
        for status in [
            RequestStatusType::NotAllowed,
            RequestStatusType::Sent,
            RequestStatusType::Succeeded,
            RequestStatusType::Failed,
        ] {
            let mut repo = MockBackupRequestRepository::new();
            repo.expect_get_by_id().returning(move |_| Ok(request(status)));
            repo.expect_save().never();
            let mut store = MockBackupInterfaceStore::new();
            store.expect_send_request().never();

            let use_case = SendToInterface::new(Arc::new(repo), Arc::new(store), Arc::new(MockEventBus::new()));
            let err = use_case.execute(&id()).await.unwrap_err();
            assert!(matches!(err, CoreError::StatusError { .. }));
        }
    }

    #[tokio::test]
    async fn test_failed_send_leaves_request_allowed() {
        let mut repo = MockBackupRequestRepository::new();
        repo.expect_get_by_id()
            .returning(|_| Ok(request(RequestStatusType::Allowed)));
        repo.expect_save().never();
        let mut store = MockBackupInterfaceStore::new();
        store.expect_send_request()
            .returning(|_| Err(CoreError::interface_store("queue full")));

        let use_case = SendToInterface::new(Arc::new(repo), Arc::new(store), Arc::new(MockEventBus::new()));
        let err = use_case.execute(&id()).await.unwrap_err();

        assert!(matches!(err, CoreError::InterfaceStoreError { .. }));
    }
}
