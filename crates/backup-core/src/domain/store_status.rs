use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::backup_request::{BackupRequestId, RequestStatusType};

/// Outcome reported by the backup interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreResultType {
    /// The backup was stored
    Succeeded,
    /// The backup could not be stored
    Failed,
}

impl StoreResultType {
    /// Request status this outcome maps to
    pub fn as_request_status(self) -> RequestStatusType {
        match self {
            StoreResultType::Succeeded => RequestStatusType::Succeeded,
            StoreResultType::Failed => RequestStatusType::Failed,
        }
    }
}

/// Reply from the backup interface for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatusReply {
    /// Request the reply is about
    pub backup_request_id: BackupRequestId,

    /// Outcome
    pub result_type_code: StoreResultType,

    /// Free-form message from the interface
    #[serde(default)]
    pub message_text: Option<String>,

    /// Stored size, required on success
    #[serde(default)]
    pub backup_byte_count: Option<u64>,

    /// Copy start, required on success
    #[serde(default)]
    pub copy_start_timestamp: Option<DateTime<Utc>>,

    /// Copy end, required on success
    #[serde(default)]
    pub copy_end_timestamp: Option<DateTime<Utc>>,
}
