use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::backup::Backup;
use crate::domain::backup_request::{BackupRequest, RequestStatusType};
use crate::domain::repository::{BackupRepository, BackupRequestRepository};
use crate::domain::store_status::{StoreResultType, StoreStatusReply};
use crate::{CoreError, CoreResult};

/// Applies the interface's reply to a sent request.
///
/// Replies may be delivered more than once and in any order. A request that
/// already has a Backup always ends up Succeeded, whatever the reply says.
pub struct ReceiveStoreStatusReply {
    request_repo: Arc<dyn BackupRequestRepository>,
    backup_repo: Arc<dyn BackupRepository>,
}

impl ReceiveStoreStatusReply {
    /// Create the use case
    pub fn new(
        request_repo: Arc<dyn BackupRequestRepository>,
        backup_repo: Arc<dyn BackupRepository>,
    ) -> Self {
        Self {
            request_repo,
            backup_repo,
        }
    }

    /// Apply one reply and return the request as stored afterwards
    pub async fn execute(&self, reply: StoreStatusReply) -> CoreResult<BackupRequest> {
        let id = reply.backup_request_id.clone();
        let mut request = self.request_repo.get_by_id(&id).await?;

        if !request.status_type.has_been_sent() {
            return Err(CoreError::status(
                id.as_str(),
                request.status_type,
                "receive store status reply",
            ));
        }

        let existing = self.backup_repo.get_by_backup_request_id(&id).await?;
        let now = Utc::now();

        match (existing, reply.result_type_code) {
            (Some(backup), result) => {
                if request.status_type == RequestStatusType::Succeeded {
                    debug!(backup_request_id = %id, "Backup exists and request succeeded, nothing to do");
                    return Ok(request);
                }
                if result == StoreResultType::Failed {
                    warn!(backup_request_id = %id, backup_id = %backup.backup_id.0, "Failed reply for a request with a backup, keeping the backup");
                }
                request.mark_replied(RequestStatusType::Succeeded, now, None)?;
                let saved = self.request_repo.save(&request).await?;
                info!(backup_request_id = %id, "Backup request succeeded");
                Ok(saved)
            }
            (None, StoreResultType::Succeeded) => {
                let backup = Backup::from_reply(&request, &reply)?;
                self.backup_repo.save(&backup).await?;

                request.mark_replied(RequestStatusType::Succeeded, now, reply.message_text)?;
                let saved = self.request_repo.save(&request).await?;
                info!(
                    backup_request_id = %id,
                    backup_id = %backup.backup_id.0,
                    backup_byte_count = backup.backup_byte_count,
                    "Backup created, request succeeded"
                );
                Ok(saved)
            }
            (None, StoreResultType::Failed) => {
                if request.status_type != RequestStatusType::Sent {
                    debug!(backup_request_id = %id, status = %request.status_type, "Failed reply ignored");
                    return Ok(request);
                }
                request.mark_replied(RequestStatusType::Failed, now, reply.message_text)?;
                let saved = self.request_repo.save(&request).await?;
                info!(backup_request_id = %id, "Backup request failed");
                Ok(saved)
            }
        }
    }
}
