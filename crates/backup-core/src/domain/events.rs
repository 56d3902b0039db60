use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::backup_job::BackupJobId;
use super::backup_request::{BackupRequestId, RequestTransportType};
use super::store_status::{StoreResultType, StoreStatusReply};
use crate::{CoreError, CoreResult};

/// Domain event trait for all events published on the bus
pub trait Event: Serialize + DeserializeOwned + Send + Sync {
    /// Type name of the event; handlers subscribe by this name
    const EVENT_TYPE: &'static str;

    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    /// Returns the topic (durable queue name) the event is published on
    fn topic(&self) -> String {
        topic_name_for(Self::EVENT_TYPE)
    }

    /// Returns the deduplication key of the event
    fn key(&self) -> String;

    /// Returns the event body as JSON
    fn payload(&self) -> CoreResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Topic name for an event type: `BackupRequestAccepted` becomes `backup-request-accepted`
pub fn topic_name_for(event_type: &str) -> String {
    let mut topic = String::with_capacity(event_type.len() + 8);
    for (i, c) in event_type.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                topic.push('-');
            }
            topic.push(c.to_ascii_lowercase());
        } else {
            topic.push(c);
        }
    }
    topic
}

/// Delivery envelope around an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Times a consumer of this event hit a connect failure
    pub connect_failure_count: u32,

    /// Times a consumer of this event hit a non-connect failure
    pub retry_count: u32,

    /// Type name of the wrapped event
    pub event_type: String,

    /// Topic the event is published on
    pub topic_name: String,

    /// Deduplication key
    pub event_key: String,

    /// Serialized event
    pub event_data: serde_json::Value,

    /// When the event was first created
    pub event_timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Wrap an event with zeroed counters
    pub fn wrap<E: Event>(event: &E) -> CoreResult<Self> {
        Ok(Self {
            connect_failure_count: 0,
            retry_count: 0,
            event_type: event.event_type().to_string(),
            topic_name: event.topic(),
            event_key: event.key(),
            event_data: event.payload()?,
            event_timestamp: Utc::now(),
        })
    }

    /// Decode the wrapped event, checking its type first
    pub fn decode<E: Event>(&self) -> CoreResult<E> {
        if self.event_type != E::EVENT_TYPE {
            return Err(CoreError::SerializationError(format!(
                "expected {} event, got {}",
                E::EVENT_TYPE,
                self.event_type
            )));
        }
        Ok(serde_json::from_value(self.event_data.clone())?)
    }

    /// Durable job identity; re-enqueueing a pending job with the same id is a no-op
    pub fn job_id(&self) -> String {
        format!("{}|{}", self.event_type, self.event_key)
    }

    /// Whether both envelopes carry the same logical event
    pub fn is_same_event(&self, other: &EventEnvelope) -> bool {
        self.event_type == other.event_type && self.event_key == other.event_key
    }

    /// Copy with the retry counter bumped
    pub fn with_incremented_retry_count(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    /// Copy with the connect failure counter bumped
    pub fn with_incremented_connect_failure_count(&self) -> Self {
        Self {
            connect_failure_count: self.connect_failure_count + 1,
            ..self.clone()
        }
    }
}

/// Event: Backup request accepted by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequestAccepted {
    /// Id assigned at acceptance
    pub backup_request_id: BackupRequestId,
    /// Job the backup is for
    pub backup_job_id: BackupJobId,
    /// Business date of the prepared data
    pub data_date: NaiveDate,
    /// Where the prepared data can be picked up
    pub prepared_data_path_name: String,
    /// How the request arrived
    pub transport_type: RequestTransportType,
    /// Who asked for the backup
    pub requester_id: Option<String>,
    /// When the request was accepted
    pub accepted_timestamp: DateTime<Utc>,
}

impl Event for BackupRequestAccepted {
    const EVENT_TYPE: &'static str = "BackupRequestAccepted";

    fn key(&self) -> String {
        self.backup_request_id.0.clone()
    }
}

macro_rules! request_event {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            /// The request the event is about
            pub backup_request_id: BackupRequestId,
        }

        impl $name {
            /// Create the event for a request
            pub fn new(backup_request_id: BackupRequestId) -> Self {
                Self { backup_request_id }
            }
        }

        impl Event for $name {
            const EVENT_TYPE: &'static str = stringify!($name);

            fn key(&self) -> String {
                self.backup_request_id.0.clone()
            }
        }
    };
}

request_event!(
    /// Event: Backup request persisted in Received status
    BackupRequestReceived
);

request_event!(
    /// Event: Backup request allowed by its job
    BackupRequestAllowed
);

request_event!(
    /// Event: Backup request refused by its job
    BackupRequestNotAllowed
);

request_event!(
    /// Event: Backup request handed to the interface
    BackupRequestSentToInterface
);

/// Event: Reply from the interface arrived on the reply queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatusReplyReceived {
    /// The reply as sent by the interface
    pub reply: StoreStatusReply,
}

impl Event for StoreStatusReplyReceived {
    const EVENT_TYPE: &'static str = "StoreStatusReplyReceived";

    /// A request may see several replies, so the outcome and copy end time
    /// are part of the key.
    fn key(&self) -> String {
        let result = match self.reply.result_type_code {
            StoreResultType::Succeeded => "Succeeded",
            StoreResultType::Failed => "Failed",
        };
        let copy_end = self
            .reply
            .copy_end_timestamp
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        format!("{}|{}|{}", self.reply.backup_request_id.0, result, copy_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(topic_name_for("BackupRequestAccepted"), "backup-request-accepted");
        assert_eq!(topic_name_for("BackupRequestNotAllowed"), "backup-request-not-allowed");
    }

    #[test]
    fn test_envelope_wraps_and_decodes() {
        let event = BackupRequestAllowed::new(BackupRequestId("r1".to_string()));
        let envelope = EventEnvelope::wrap(&event).unwrap();

        assert_eq!(envelope.event_type, "BackupRequestAllowed");
        assert_eq!(envelope.topic_name, "backup-request-allowed");
        assert_eq!(envelope.job_id(), "BackupRequestAllowed|r1");
        assert_eq!(envelope.decode::<BackupRequestAllowed>().unwrap(), event);
        assert!(envelope.decode::<BackupRequestReceived>().is_err());
    }

    #[test]
    fn test_counters_are_bumped_on_copies() {
        let envelope =
            EventEnvelope::wrap(&BackupRequestReceived::new(BackupRequestId("r1".to_string()))).unwrap();
        let retried = envelope.with_incremented_retry_count().with_incremented_connect_failure_count();

        assert_eq!(envelope.retry_count, 0);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.connect_failure_count, 1);
        assert!(retried.is_same_event(&envelope));
    }

    fn reply_event(result: StoreResultType, copy_end: Option<&str>) -> StoreStatusReplyReceived {
        StoreStatusReplyReceived {
            reply: StoreStatusReply {
                backup_request_id: BackupRequestId("r1".to_string()),
                result_type_code: result,
                message_text: None,
                backup_byte_count: None,
                copy_start_timestamp: None,
                copy_end_timestamp: copy_end.map(|t| t.parse().unwrap()),
            },
        }
    }

    #[test]
    fn test_distinct_replies_for_one_request_have_distinct_keys() {
        let failed = reply_event(StoreResultType::Failed, None);
        let succeeded = reply_event(StoreResultType::Succeeded, Some("2026-01-15T10:05:00Z"));
        let later = reply_event(StoreResultType::Succeeded, Some("2026-01-15T11:05:00Z"));

        assert_eq!(failed.key(), "r1|Failed|");
        assert_eq!(succeeded.key(), "r1|Succeeded|2026-01-15T10:05:00+00:00");
        assert_ne!(succeeded.key(), later.key());
        assert_ne!(
            EventEnvelope::wrap(&failed).unwrap().job_id(),
            EventEnvelope::wrap(&succeeded).unwrap().job_id()
        );
        assert_eq!(failed.key(), reply_event(StoreResultType::Failed, None).key());
    }
}
