//! Redis side of the backup interface
//!
//! Allowed requests are pushed as JSON onto the send list; the interface
//! answers by pushing store status replies onto the reply list.

use std::sync::Arc;

use async_trait::async_trait;
use backup_core::domain::store_status::StoreStatusReply;
use backup_core::{
    BackupInterfaceStore, BackupRequest, CircuitBreaker, CircuitBreakerConfig, CoreError,
    CoreResult, StoreStatusReplySource,
};
use chrono::{DateTime, NaiveDate, Utc};
use redis::RedisError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::pool::{is_connect_error, RedisLiveness, RedisPool};
use crate::RedisConfig;

/// Message the interface receives for each allowed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSendMessage {
    pub backup_request_id: String,
    pub backup_job_id: String,
    pub data_date: NaiveDate,
    pub prepared_data_path_name: String,
    pub storage_path_name: Option<String>,
    pub backup_provider_code: Option<String>,
    pub transport_type: String,
    pub sent_timestamp: DateTime<Utc>,
}

impl InterfaceSendMessage {
    fn from_request(request: &BackupRequest) -> Self {
        Self {
            backup_request_id: request.backup_request_id.0.clone(),
            backup_job_id: request.backup_job_id.0.clone(),
            data_date: request.data_date,
            prepared_data_path_name: request.prepared_data_path_name.clone(),
            storage_path_name: request.storage_path_name.clone(),
            backup_provider_code: request.backup_provider_code.clone(),
            transport_type: request.transport_type.to_string(),
            sent_timestamp: Utc::now(),
        }
    }
}

/// Interface store over two Redis lists, guarded by its own breaker
pub struct RedisInterfaceStore {
    pool: Arc<RedisPool>,
    breaker: Arc<CircuitBreaker>,
    send_list: String,
    reply_list: String,
}

impl RedisInterfaceStore {
    /// Create the store and its breaker
    pub fn new(
        pool: Arc<RedisPool>,
        config: &RedisConfig,
        breaker_config: CircuitBreakerConfig,
        shutdown: &CancellationToken,
    ) -> Self {
        let liveness = Arc::new(RedisLiveness::new(pool.clone()));
        Self {
            breaker: CircuitBreaker::with_cancellation(breaker_config, liveness, shutdown),
            pool,
            send_list: config.send_list.clone(),
            reply_list: config.reply_list.clone(),
        }
    }

    /// The breaker guarding the interface
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn invalid_reply_list(&self) -> String {
        format!("{}:invalid", self.reply_list)
    }

    fn map_error(&self, operation: &str, err: RedisError) -> CoreError {
        if is_connect_error(&err) {
            warn!(service = %self.breaker.service_name(), "Failed to {}: {}", operation, err);
            CoreError::interface_store_connect(
                format!("Failed to {}: {}", operation, err),
                self.breaker.connect_failure_info(),
            )
        } else {
            CoreError::interface_store(format!("Failed to {}: {}", operation, err))
        }
    }

    fn check_connected(&self, operation: &str) -> CoreResult<()> {
        if self.breaker.is_connected() {
            Ok(())
        } else {
            Err(CoreError::interface_store_connect(
                format!("circuit open, {} not attempted", operation),
                self.breaker.connect_failure_info(),
            ))
        }
    }

    async fn rpush(&self, list: &str, value: String) -> Result<(), RedisError> {
        let mut pooled = self.pool.get().await?;
        redis::cmd("RPUSH")
            .arg(list)
            .arg(value)
            .query_async(&mut pooled.conn)
            .await
    }

    async fn lpop(&self, list: &str) -> Result<Option<String>, RedisError> {
        let mut pooled = self.pool.get().await?;
        redis::cmd("LPOP").arg(list).query_async(&mut pooled.conn).await
    }
}

#[async_trait]
impl BackupInterfaceStore for RedisInterfaceStore {
    async fn send_request(&self, request: &BackupRequest) -> CoreResult<()> {
        self.check_connected("send request")?;
        let message = serde_json::to_string(&InterfaceSendMessage::from_request(request))?;

        let result = self
            .rpush(&self.send_list, message)
            .await
            .map_err(|e| self.map_error("send request", e));
        self.breaker.record_outcome(&result);
        result?;

        debug!(backup_request_id = %request.backup_request_id, list = %self.send_list, "Request sent to interface");
        Ok(())
    }
}

#[async_trait]
impl StoreStatusReplySource for RedisInterfaceStore {
    async fn next_reply(&self) -> CoreResult<Option<StoreStatusReply>> {
        self.check_connected("read reply")?;

        let result = self
            .lpop(&self.reply_list)
            .await
            .map_err(|e| self.map_error("read reply", e));
        self.breaker.record_outcome(&result);

        let Some(raw) = result? else {
            return Ok(None);
        };

        match serde_json::from_str::<StoreStatusReply>(&raw) {
            Ok(reply) => Ok(Some(reply)),
            Err(e) => {
                error!(list = %self.reply_list, "Unreadable store status reply set aside: {}", e);
                self.rpush(&self.invalid_reply_list(), raw)
                    .await
                    .map_err(|e| self.map_error("set aside reply", e))?;
                Ok(None)
            }
        }
    }
}
