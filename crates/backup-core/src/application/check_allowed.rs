use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::backup_request::{BackupRequest, BackupRequestId, RequestStatusType};
use crate::domain::events::{BackupRequestAllowed, BackupRequestNotAllowed, EventEnvelope};
use crate::domain::repository::{BackupJobService, BackupRequestRepository};
use crate::event_bus::EventBus;
use crate::{CoreError, CoreResult};

/// Decides whether a received request may be backed up by its job
pub struct CheckAllowed {
    request_repo: Arc<dyn BackupRequestRepository>,
    job_service: Arc<dyn BackupJobService>,
    event_bus: Arc<dyn EventBus>,
}

impl CheckAllowed {
    /// Create the use case
    pub fn new(
        request_repo: Arc<dyn BackupRequestRepository>,
        job_service: Arc<dyn BackupJobService>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            request_repo,
            job_service,
            event_bus,
        }
    }

    /// Check the request against its job and publish the verdict
    pub async fn execute(&self, id: &BackupRequestId) -> CoreResult<BackupRequest> {
        let mut request = self.request_repo.get_by_id(id).await?;

        match request.status_type {
            RequestStatusType::Allowed => {
                debug!(backup_request_id = %id, "Already allowed, publishing again");
            }
            RequestStatusType::Received => {
                let job = self.job_service.get_by_id(&request.backup_job_id).await?;
                let is_allowed = job.allows_backups();

                request.mark_checked(&job, is_allowed, Utc::now())?;
                request = self.request_repo.save(&request).await?;

                info!(
                    backup_request_id = %id,
                    backup_job_id = %job.backup_job_id,
                    is_active = job.is_active,
                    hold_flag = job.hold_flag,
                    status = %request.status_type,
                    "Backup request checked"
                );
            }
            other => return Err(CoreError::status(id.as_str(), other, "check allowed")),
        }

        let verdict = if request.status_type == RequestStatusType::Allowed {
            EventEnvelope::wrap(&BackupRequestAllowed::new(id.clone()))?
        } else {
            EventEnvelope::wrap(&BackupRequestNotAllowed::new(id.clone()))?
        };
        self.event_bus.publish_event(verdict).await?;

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backup_job::{BackupJob, BackupJobId};
    use crate::domain::backup_request::RequestTransportType;
    use crate::domain::repository::{MockBackupJobService, MockBackupRequestRepository};
    use crate::event_bus::MockEventBus;
    use chrono::NaiveDate;

    fn request(status: RequestStatusType) -> BackupRequest {
        let now = Utc::now();
        let mut request = BackupRequest::new_received(
            BackupRequestId("backup-request-id".to_string()),
            BackupJobId("backup-job-id".to_string()),
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            "prepared/path".to_string(),
            RequestTransportType::Http,
            None,
            now,
            now,
        );
        request.status_type = status;
        request
    }

    fn job(is_active: bool, hold_flag: bool) -> BackupJob {
        BackupJob {
            backup_job_id: BackupJobId("backup-job-id".to_string()),
            storage_path_name: "storage/path".to_string(),
            backup_provider_code: "CloudA".to_string(),
            days_to_keep: 30,
            is_active,
            hold_flag,
        }
    }

    fn bus_expecting(event_type: &'static str) -> MockEventBus {
        let mut bus = MockEventBus::new();
        bus.expect_publish_event()
            .withf(move |event| event.event_type == event_type)
            .times(1)
            .returning(Ok);
        bus
    }

    fn id() -> BackupRequestId {
        BackupRequestId("backup-request-id".to_string())
    }

    #[tokio::test]
    async fn test_already_allowed_republishes_without_saving() {
        let mut repo = MockBackupRequestRepository::new();
        repo.expect_get_by_id()
            .returning(|_| Ok(request(RequestStatusType::Allowed)));
        repo.expect_save().never();
        let mut jobs = MockBackupJobService::new();
        jobs.expect_get_by_id().never();

        let use_case = CheckAllowed::new(Arc::new(repo), Arc::new(jobs), Arc::new(bus_expecting("BackupRequestAllowed")));
        let checked = use_case.execute(&id()).await.unwrap();

        assert_eq!(checked.status_type, RequestStatusType::Allowed);
    }

    #[tokio::test]
    async fn test_active_job_allows_and_copies_job_fields() {
        let mut repo = MockBackupRequestRepository::new();
        repo.expect_get_by_id()
            .returning(|_| Ok(request(RequestStatusType::Received)));
        repo.expect_save()
            .withf(|r| {
                r.status_type == RequestStatusType::Allowed
                    && r.checked_timestamp.is_some()
                    && r.backup_provider_code.as_deref() == Some("CloudA")
                    && r.storage_path_name.as_deref() == Some("storage/path")
            })
            .times(1)
            .returning(|r| Ok(r.clone()));
        let mut jobs = MockBackupJobService::new();
        jobs.expect_get_by_id().times(1).returning(|_| Ok(job(true, false)));

        let use_case = CheckAllowed::new(Arc::new(repo), Arc::new(jobs), Arc::new(bus_expecting("BackupRequestAllowed")));
        use_case.execute(&id()).await.unwrap();
    }

    #[tokio::test]
    async fn test_inactive_or_held_job_is_not_allowed() {
        for (is_active, hold_flag) in [(false, false), (true, true)] {
            let mut repo = MockBackupRequestRepository::new();
            repo.expect_get_by_id()
                .returning(|_| Ok(request(RequestStatusType::Received)));
            repo.expect_save()
                .withf(|r| r.status_type == RequestStatusType::NotAllowed && r.backup_provider_code.is_none())
                .times(1)
                .returning(|r| Ok(r.clone()));
            let mut jobs = MockBackupJobService::new();
            jobs.expect_get_by_id()
                .returning(move |_| Ok(job(is_active, hold_flag)));

            let use_case = CheckAllowed::new(
                Arc::new(repo),
                Arc::new(jobs),
                Arc::new(bus_expecting("BackupRequestNotAllowed")),
            );
            use_case.execute(&id()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_sent_request_is_status_error() {
        let mut repo = MockBackupRequestRepository::new();
        repo.expect_get_by_id()
            .returning(|_| Ok(request(RequestStatusType::Sent)));
        let mut bus = MockEventBus::new();
        bus.expect_publish_event().never();

        let use_case = CheckAllowed::new(Arc::new(repo), Arc::new(MockBackupJobService::new()), Arc::new(bus));
        let err = use_case.execute(&id()).await.unwrap_err();

        assert!(matches!(err, CoreError::StatusError { .. }));
    }

    #[tokio::test]
    async fn test_not_allowed_request_is_status_error() {
        let mut repo = MockBackupRequestRepository::new();
        repo.expect_get_by_id()
            .returning(|_| Ok(request(RequestStatusType::NotAllowed)));
        repo.expect_save().never();
        let mut jobs = MockBackupJobService::new();
        jobs.expect_get_by_id().never();
        let mut bus = MockEventBus::new();
        bus.expect_publish_event().never();

        let use_case = CheckAllowed::new(Arc::new(repo), Arc::new(jobs), Arc::new(bus));
        let err = use_case.execute(&id()).await.unwrap_err();

        assert!(matches!(err, CoreError::StatusError { .. }));
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let mut repo = MockBackupRequestRepository::new();
        repo.expect_get_by_id()
            .returning(|_| Ok(request(RequestStatusType::Received)));
        repo.expect_save().never();
        let mut jobs = MockBackupJobService::new();
        jobs.expect_get_by_id()
            .returning(|id| Err(CoreError::NotFound(format!("Backup job {}", id))));

        let use_case = CheckAllowed::new(Arc::new(repo), Arc::new(jobs), Arc::new(MockEventBus::new()));
        assert!(use_case.execute(&id()).await.unwrap_err().is_not_found());
    }
}
