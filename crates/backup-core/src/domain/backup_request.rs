use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::backup_job::{BackupJob, BackupJobId};
use crate::{CoreError, CoreResult};

/// Value object: Backup Request ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupRequestId(pub String);

impl BackupRequestId {
    /// Generate a fresh, unique request id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the prepared data reached the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestTransportType {
    /// Submitted through the HTTP API
    #[serde(rename = "HTTP")]
    Http,
    /// Submitted through the request queue
    Queue,
}

impl fmt::Display for RequestTransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestTransportType::Http => write!(f, "HTTP"),
            RequestTransportType::Queue => write!(f, "Queue"),
        }
    }
}

impl FromStr for RequestTransportType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP" => Ok(RequestTransportType::Http),
            "Queue" => Ok(RequestTransportType::Queue),
            other => Err(CoreError::PropsError(format!(
                "transportType must be one of HTTP, Queue; got {}",
                other
            ))),
        }
    }
}

/// Backup request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatusType {
    /// Accepted by the API, not yet persisted
    Accepted,
    /// Persisted and waiting for the allowed check
    Received,
    /// The backup job allows this request
    Allowed,
    /// The backup job refuses this request
    NotAllowed,
    /// Handed to the backup interface
    Sent,
    /// The interface stored the backup
    Succeeded,
    /// The interface failed to store the backup
    Failed,
}

impl RequestStatusType {
    /// All statuses, in saga order
    pub const ALL: [RequestStatusType; 7] = [
        RequestStatusType::Accepted,
        RequestStatusType::Received,
        RequestStatusType::Allowed,
        RequestStatusType::NotAllowed,
        RequestStatusType::Sent,
        RequestStatusType::Succeeded,
        RequestStatusType::Failed,
    ];

    /// Check whether moving from `self` to `next` is a legal saga step.
    ///
    /// Re-observing the current status is always legal (idempotent replay).
    /// Failed may still move to Succeeded: a materialized Backup always wins.
    pub fn can_transition_to(self, next: RequestStatusType) -> bool {
        use RequestStatusType::*;

        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Accepted, Received)
                | (Received, Allowed)
                | (Received, NotAllowed)
                | (Allowed, Sent)
                | (Sent, Succeeded)
                | (Sent, Failed)
                | (Failed, Succeeded)
        )
    }

    /// Whether the request has been handed to the interface
    pub fn has_been_sent(self) -> bool {
        matches!(
            self,
            RequestStatusType::Sent | RequestStatusType::Succeeded | RequestStatusType::Failed
        )
    }
}

impl fmt::Display for RequestStatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStatusType::Accepted => "Accepted",
            RequestStatusType::Received => "Received",
            RequestStatusType::Allowed => "Allowed",
            RequestStatusType::NotAllowed => "NotAllowed",
            RequestStatusType::Sent => "Sent",
            RequestStatusType::Succeeded => "Succeeded",
            RequestStatusType::Failed => "Failed",
        };
        f.write_str(name)
    }
}

impl FromStr for RequestStatusType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestStatusType::ALL
            .into_iter()
            .find(|status| status.to_string() == s)
            .ok_or_else(|| CoreError::PropsError(format!("unknown statusType {}", s)))
    }
}

/// Aggregate: Backup request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
    /// Unique identifier
    pub backup_request_id: BackupRequestId,

    /// Backup job this request belongs to
    pub backup_job_id: BackupJobId,

    /// Business date of the prepared data
    pub data_date: NaiveDate,

    /// Where the prepared data can be picked up
    pub prepared_data_path_name: String,

    /// How the request reached the service
    pub transport_type: RequestTransportType,

    /// Current status
    pub status_type: RequestStatusType,

    /// When the request was accepted
    pub accepted_timestamp: DateTime<Utc>,

    /// When the request was persisted
    pub received_timestamp: Option<DateTime<Utc>>,

    /// When the allowed check ran
    pub checked_timestamp: Option<DateTime<Utc>>,

    /// When the request was handed to the interface
    pub sent_to_interface_timestamp: Option<DateTime<Utc>>,

    /// When the interface replied
    pub reply_timestamp: Option<DateTime<Utc>>,

    /// Who asked for the backup
    pub requester_id: Option<String>,

    /// Provider copied from the job once allowed
    pub backup_provider_code: Option<String>,

    /// Storage path copied from the job once allowed
    pub storage_path_name: Option<String>,

    /// Message text from the interface reply
    pub reply_message_text: Option<String>,
}

impl BackupRequest {
    /// Create a request in Received status from the data accepted by the API
    #[allow(clippy::too_many_arguments)]
    pub fn new_received(
        backup_request_id: BackupRequestId,
        backup_job_id: BackupJobId,
        data_date: NaiveDate,
        prepared_data_path_name: String,
        transport_type: RequestTransportType,
        requester_id: Option<String>,
        accepted_timestamp: DateTime<Utc>,
        received_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            backup_request_id,
            backup_job_id,
            data_date,
            prepared_data_path_name,
            transport_type,
            status_type: RequestStatusType::Received,
            accepted_timestamp,
            received_timestamp: Some(received_timestamp),
            checked_timestamp: None,
            sent_to_interface_timestamp: None,
            reply_timestamp: None,
            requester_id,
            backup_provider_code: None,
            storage_path_name: None,
            reply_message_text: None,
        }
    }

    /// Timestamp of the transition into the current status
    pub fn status_timestamp(&self) -> DateTime<Utc> {
        let timestamp = match self.status_type {
            RequestStatusType::Accepted => None,
            RequestStatusType::Received => self.received_timestamp,
            RequestStatusType::Allowed | RequestStatusType::NotAllowed => self.checked_timestamp,
            RequestStatusType::Sent => self.sent_to_interface_timestamp,
            RequestStatusType::Succeeded | RequestStatusType::Failed => self.reply_timestamp,
        };
        timestamp.unwrap_or(self.accepted_timestamp)
    }

    fn transition_to(&mut self, next: RequestStatusType, operation: &str) -> CoreResult<()> {
        if !self.status_type.can_transition_to(next) {
            return Err(CoreError::status(
                self.backup_request_id.as_str(),
                self.status_type,
                operation,
            ));
        }
        self.status_type = next;
        Ok(())
    }

    /// Record the outcome of the allowed check against the job
    pub fn mark_checked(
        &mut self,
        job: &BackupJob,
        is_allowed: bool,
        checked_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        if self.status_type != RequestStatusType::Received {
            return Err(CoreError::status(
                self.backup_request_id.as_str(),
                self.status_type,
                "check allowed",
            ));
        }

        let next = if is_allowed {
            RequestStatusType::Allowed
        } else {
            RequestStatusType::NotAllowed
        };
        self.transition_to(next, "check allowed")?;
        self.checked_timestamp = Some(checked_at);

        if is_allowed {
            self.backup_provider_code = Some(job.backup_provider_code.clone());
            self.storage_path_name = Some(job.storage_path_name.clone());
        }

        Ok(())
    }

    /// Record that the request was handed to the interface
    pub fn mark_sent(&mut self, sent_at: DateTime<Utc>) -> CoreResult<()> {
        if self.status_type != RequestStatusType::Allowed {
            return Err(CoreError::status(
                self.backup_request_id.as_str(),
                self.status_type,
                "send to interface",
            ));
        }
        self.transition_to(RequestStatusType::Sent, "send to interface")?;
        self.sent_to_interface_timestamp = Some(sent_at);
        Ok(())
    }

    /// Record the interface's reply
    pub fn mark_replied(
        &mut self,
        outcome: RequestStatusType,
        replied_at: DateTime<Utc>,
        message_text: Option<String>,
    ) -> CoreResult<()> {
        if !matches!(outcome, RequestStatusType::Succeeded | RequestStatusType::Failed) {
            return Err(CoreError::PropsError(format!(
                "reply outcome must be Succeeded or Failed; got {}",
                outcome
            )));
        }
        self.transition_to(outcome, "receive store status reply")?;
        self.reply_timestamp = Some(replied_at);
        if message_text.is_some() {
            self.reply_message_text = message_text;
        }
        Ok(())
    }
}
