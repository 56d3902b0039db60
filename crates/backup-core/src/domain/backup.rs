use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::backup_job::BackupJobId;
use super::backup_request::{BackupRequest, BackupRequestId};
use super::store_status::StoreStatusReply;
use crate::{CoreError, CoreResult};

/// Value object: Backup ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupId(pub String);

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entity: a backup the interface reported as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    /// Unique identifier
    pub backup_id: BackupId,

    /// Request that produced this backup; at most one backup per request
    pub backup_request_id: BackupRequestId,

    /// Job the backup belongs to
    pub backup_job_id: BackupJobId,

    /// Business date of the backed up data
    pub data_date: NaiveDate,

    /// Where the backup is stored
    pub storage_path_name: String,

    /// Which provider stores the backup
    pub backup_provider_code: String,

    /// Size reported by the interface
    pub backup_byte_count: u64,

    /// When the interface started copying
    pub copy_start_timestamp: DateTime<Utc>,

    /// When the interface finished copying
    pub copy_end_timestamp: DateTime<Utc>,
}

impl Backup {
    /// Build the backup record for a successful reply.
    ///
    /// Fails with a props error when the reply or the request lacks a field
    /// the record needs.
    pub fn from_reply(request: &BackupRequest, reply: &StoreStatusReply) -> CoreResult<Self> {
        let missing = |name: &str| CoreError::PropsError(format!("{} is required to create a backup", name));

        let storage_path_name = request
            .storage_path_name
            .clone()
            .ok_or_else(|| missing("storagePathName"))?;
        let backup_provider_code = request
            .backup_provider_code
            .clone()
            .ok_or_else(|| missing("backupProviderCode"))?;
        let backup_byte_count = reply.backup_byte_count.ok_or_else(|| missing("backupByteCount"))?;
        let copy_start_timestamp = reply
            .copy_start_timestamp
            .ok_or_else(|| missing("copyStartTimestamp"))?;
        let copy_end_timestamp = reply
            .copy_end_timestamp
            .ok_or_else(|| missing("copyEndTimestamp"))?;

        if copy_end_timestamp < copy_start_timestamp {
            return Err(CoreError::PropsError(
                "copyEndTimestamp is before copyStartTimestamp".to_string(),
            ));
        }

        Ok(Self {
            backup_id: BackupId(uuid::Uuid::new_v4().to_string()),
            backup_request_id: request.backup_request_id.clone(),
            backup_job_id: request.backup_job_id.clone(),
            data_date: request.data_date,
            storage_path_name,
            backup_provider_code,
            backup_byte_count,
            copy_start_timestamp,
            copy_end_timestamp,
        })
    }
}
