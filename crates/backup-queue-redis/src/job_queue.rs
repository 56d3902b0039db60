//! Redis job queue
//!
//! Layout, per key prefix:
//!
//! | Key                     | Type | Content                               |
//! |-------------------------|------|---------------------------------------|
//! | `{prefix}:jobs`         | hash | job id -> job JSON, every pending job |
//! | `{prefix}:ready:{topic}`| zset | job id scored by ready time (ms)      |
//! | `{prefix}:dead`         | list | dead letter records                   |
//!
//! A claimed job stays in its ready set with its score pushed out by the
//! lease; if the worker dies, the job becomes ready again when the lease runs
//! out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backup_core::queue::{JobQueue, QueueError, QueueResult, QueuedJob};
use chrono::{DateTime, Utc};
use redis::{RedisError, Script};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pool::{is_connect_error, RedisPool};
use crate::RedisConfig;

const ADD_SCRIPT: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 1 then
    redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
    return 1
end
return 0
"#;

const CLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
    return false
end
local job = redis.call('HGET', KEYS[1], ids[1])
if not job then
    redis.call('ZREM', KEYS[2], ids[1])
    return false
end
redis.call('ZADD', KEYS[2], ARGV[2], ids[1])
return job
"#;

/// A job that will not be delivered again
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// The job as it was when it was given up on
    pub job: QueuedJob,
    /// Why it was given up on
    pub reason: String,
    /// When it was given up on
    pub dead_at: DateTime<Utc>,
}

fn map_error(err: RedisError) -> QueueError {
    if is_connect_error(&err) {
        QueueError::Connect(err.to_string())
    } else {
        QueueError::Backend(err.to_string())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Job queue stored in Redis
pub struct RedisJobQueue {
    pool: Arc<RedisPool>,
    prefix: String,
    lease: Duration,
    add_script: Script,
    claim_script: Script,
}

impl RedisJobQueue {
    /// Create a queue over `pool` using the configured key prefix and lease
    pub fn new(pool: Arc<RedisPool>, config: &RedisConfig) -> Self {
        Self {
            pool,
            prefix: config.key_prefix.clone(),
            lease: Duration::from_millis(config.lease_ms),
            add_script: Script::new(ADD_SCRIPT),
            claim_script: Script::new(CLAIM_SCRIPT),
        }
    }

    fn jobs_key(&self) -> String {
        format!("{}:jobs", self.prefix)
    }

    fn ready_key(&self, topic: &str) -> String {
        format!("{}:ready:{}", self.prefix, topic)
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.prefix)
    }

    /// Dead letter records, oldest first
    pub async fn dead_letters(&self) -> QueueResult<Vec<DeadLetter>> {
        let mut pooled = self.pool.get().await.map_err(map_error)?;
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.dead_key())
            .arg(0)
            .arg(-1)
            .query_async(&mut pooled.conn)
            .await
            .map_err(map_error)?;

        raw.iter()
            .map(|r| serde_json::from_str(r).map_err(QueueError::from))
            .collect()
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn add(&self, job: QueuedJob) -> QueueResult<bool> {
        let json = serde_json::to_string(&job)?;
        let mut pooled = self.pool.get().await.map_err(map_error)?;

        let added: i64 = self
            .add_script
            .key(self.jobs_key())
            .key(self.ready_key(&job.topic))
            .arg(&job.id)
            .arg(json)
            .arg(now_ms())
            .invoke_async(&mut pooled.conn)
            .await
            .map_err(map_error)?;

        if added == 0 {
            debug!(job_id = %job.id, "Job already pending, not enqueued");
        }
        Ok(added == 1)
    }

    async fn next_ready(&self, topic: &str) -> QueueResult<Option<QueuedJob>> {
        let mut pooled = self.pool.get().await.map_err(map_error)?;
        let now = now_ms();

        let claimed: Option<String> = self
            .claim_script
            .key(self.jobs_key())
            .key(self.ready_key(topic))
            .arg(now)
            .arg(now + self.lease.as_millis() as i64)
            .invoke_async(&mut pooled.conn)
            .await
            .map_err(map_error)?;

        claimed
            .map(|json| serde_json::from_str(&json).map_err(QueueError::from))
            .transpose()
    }

    async fn ack(&self, job: &QueuedJob) -> QueueResult<()> {
        let mut pooled = self.pool.get().await.map_err(map_error)?;
        let _: () = redis::pipe()
            .atomic()
            .hdel(self.jobs_key(), &job.id)
            .ignore()
            .zrem(self.ready_key(&job.topic), &job.id)
            .ignore()
            .query_async(&mut pooled.conn)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn retry_later(&self, job: &QueuedJob, delay: Duration) -> QueueResult<()> {
        let json = serde_json::to_string(job)?;
        let ready_at = now_ms() + delay.as_millis() as i64;
        let mut pooled = self.pool.get().await.map_err(map_error)?;

        let _: () = redis::pipe()
            .atomic()
            .hset(self.jobs_key(), &job.id, json)
            .ignore()
            .zadd(self.ready_key(&job.topic), &job.id, ready_at)
            .ignore()
            .query_async(&mut pooled.conn)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn dead_letter(&self, job: &QueuedJob, reason: &str) -> QueueResult<()> {
        let record = serde_json::to_string(&DeadLetter {
            job: job.clone(),
            reason: reason.to_string(),
            dead_at: Utc::now(),
        })?;
        let mut pooled = self.pool.get().await.map_err(map_error)?;

        let _: () = redis::pipe()
            .atomic()
            .hdel(self.jobs_key(), &job.id)
            .ignore()
            .zrem(self.ready_key(&job.topic), &job.id)
            .ignore()
            .rpush(self.dead_key(), record)
            .ignore()
            .query_async(&mut pooled.conn)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn is_alive(&self) -> QueueResult<bool> {
        self.pool.ping().await.map_err(map_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_core::domain::events::{BackupRequestReceived, EventEnvelope};
    use backup_core::BackupRequestId;

    fn queue(url: &str) -> RedisJobQueue {
        let config = RedisConfig {
            url: url.to_string(),
            connection_timeout_ms: 200,
            key_prefix: "test:queue".to_string(),
            ..RedisConfig::default()
        };
        RedisJobQueue::new(Arc::new(RedisPool::new(&config).unwrap()), &config)
    }

    fn job() -> QueuedJob {
        let envelope = EventEnvelope::wrap(&BackupRequestReceived::new(BackupRequestId("r1".to_string()))).unwrap();
        QueuedJob::new(envelope, 5)
    }

    #[test]
    fn test_keys_are_prefixed_per_topic() {
        let queue = queue("redis://127.0.0.1:6379");
        assert_eq!(queue.jobs_key(), "test:queue:jobs");
        assert_eq!(queue.ready_key("backup-request-received"), "test:queue:ready:backup-request-received");
        assert_eq!(queue.dead_key(), "test:queue:dead");
    }

    #[test]
    fn test_dead_letter_record_format() {
        let record = DeadLetter {
            job: job(),
            reason: "Backup job job-1 not found".to_string(),
            dead_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["job"]["id"], "BackupRequestReceived|r1");
        assert_eq!(json["job"]["attemptsMade"], 0);
        assert!(json.get("deadAt").is_some());
    }

    #[tokio::test]
    async fn test_unreachable_backend_reports_connect_errors() {
        let queue = queue("redis://127.0.0.1:1");

        let err = queue.add(job()).await.unwrap_err();
        assert!(matches!(err, QueueError::Connect(_)));
        assert!(matches!(queue.next_ready("backup-request-received").await, Err(QueueError::Connect(_))));
        assert!(matches!(queue.is_alive().await, Err(QueueError::Connect(_))));
    }
}
