use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::backup_job::BackupJobId;
use crate::domain::backup_request::{BackupRequestId, RequestTransportType};
use crate::domain::events::BackupRequestAccepted;
use crate::event_bus::{publish, EventBus};
use crate::{CoreError, CoreResult};

/// Request body of the accept call. Fields are optional so that missing
/// values surface as props errors rather than deserialization failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptBackupRequestDto {
    /// Job the backup is for
    pub backup_job_id: Option<String>,
    /// Business date, `YYYY-MM-DD`
    pub data_date: Option<String>,
    /// Where the prepared data can be picked up
    pub prepared_data_path_name: Option<String>,
    /// `HTTP` or `Queue`
    pub transport_type: Option<String>,
    /// Who asked for the backup
    pub requester_id: Option<String>,
}

/// Validates a new request, assigns its id and announces it
pub struct AcceptBackupRequest {
    event_bus: Arc<dyn EventBus>,
}

impl AcceptBackupRequest {
    /// Create the use case
    pub fn new(event_bus: Arc<dyn EventBus>) -> Self {
        Self { event_bus }
    }

    /// Validate and publish `BackupRequestAccepted`; nothing is persisted here
    pub async fn execute(&self, dto: AcceptBackupRequestDto) -> CoreResult<BackupRequestAccepted> {
        let event = Self::validate(dto)?;
        publish(self.event_bus.as_ref(), &event).await?;

        info!(
            backup_request_id = %event.backup_request_id,
            backup_job_id = %event.backup_job_id,
            "Backup request accepted"
        );
        Ok(event)
    }

    fn validate(dto: AcceptBackupRequestDto) -> CoreResult<BackupRequestAccepted> {
        let transport_type = required(dto.transport_type, "transportType")?
            .parse::<RequestTransportType>()?;
        let backup_job_id = required(dto.backup_job_id, "backupJobId")?;
        let data_date = required(dto.data_date, "dataDate")?;
        let data_date = NaiveDate::parse_from_str(&data_date, "%Y-%m-%d").map_err(|_| {
            CoreError::PropsError(format!("dataDate must be YYYY-MM-DD; got {}", data_date))
        })?;
        let prepared_data_path_name = required(dto.prepared_data_path_name, "preparedDataPathName")?;

        Ok(BackupRequestAccepted {
            backup_request_id: BackupRequestId::generate(),
            backup_job_id: BackupJobId(backup_job_id),
            data_date,
            prepared_data_path_name,
            transport_type,
            requester_id: dto.requester_id.filter(|r| !r.trim().is_empty()),
            accepted_timestamp: Utc::now(),
        })
    }
}

fn required(value: Option<String>, name: &str) -> CoreResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(CoreError::PropsError(format!("{} is required", name))),
    }
}
