use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backup_core::resilience::AdapterLivenessCheck;
use backup_core::CoreResult;
use redis::{Client, ErrorKind, RedisError, RedisResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;
use tracing::{debug, info};

use crate::RedisConfig;

/// Check whether a Redis error means the server could not be reached
pub fn is_connect_error(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_refusal()
        || err.is_timeout()
        || err.is_connection_dropped()
        || matches!(err.kind(), ErrorKind::IoError | ErrorKind::BusyLoadingError)
}

fn io_error(kind: io::ErrorKind, message: String) -> RedisError {
    RedisError::from(io::Error::new(kind, message))
}

/// A connection checked out of the pool; the slot is released on drop
pub struct PooledConnection {
    /// The live connection
    pub conn: redis::aio::Connection,
    _permit: OwnedSemaphorePermit,
}

/// Bounded set of Redis connections
pub struct RedisPool {
    client: Client,
    semaphore: Arc<Semaphore>,
    connection_timeout: Duration,
    pool_timeout: Duration,
}

impl RedisPool {
    /// Create a pool; no connection is opened until the first checkout
    pub fn new(config: &RedisConfig) -> RedisResult<Self> {
        info!(max_connections = config.max_connections, "Creating Redis pool");
        Ok(Self {
            client: Client::open(config.url.as_str())?,
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            connection_timeout: Duration::from_millis(config.connection_timeout_ms),
            pool_timeout: Duration::from_millis(config.pool_timeout_ms),
        })
    }

    /// Check out a connection, waiting at most the pool timeout for a slot
    /// and the connection timeout for the server
    pub async fn get(&self) -> RedisResult<PooledConnection> {
        let permit = match time::timeout(self.pool_timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(io_error(io::ErrorKind::BrokenPipe, "Redis pool closed".to_string())),
            Err(_) => {
                return Err(io_error(
                    io::ErrorKind::TimedOut,
                    format!("Timed out waiting for Redis connection after {}ms", self.pool_timeout.as_millis()),
                ))
            }
        };

        match time::timeout(self.connection_timeout, self.client.get_async_connection()).await {
            Ok(Ok(conn)) => Ok(PooledConnection { conn, _permit: permit }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io_error(
                io::ErrorKind::TimedOut,
                format!(
                    "Timed out establishing Redis connection after {}ms",
                    self.connection_timeout.as_millis()
                ),
            )),
        }
    }

    /// Send PING; true when the server answers PONG
    pub async fn ping(&self) -> RedisResult<bool> {
        let mut pooled = self.get().await?;
        let pong: String = redis::cmd("PING").query_async(&mut pooled.conn).await?;
        Ok(pong == "PONG")
    }
}

/// Liveness probe for breakers guarding Redis-backed adapters
pub struct RedisLiveness {
    pool: Arc<RedisPool>,
}

impl RedisLiveness {
    /// Probe through `pool`
    pub fn new(pool: Arc<RedisPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdapterLivenessCheck for RedisLiveness {
    async fn is_alive(&self) -> CoreResult<bool> {
        match self.pool.ping().await {
            Ok(alive) => Ok(alive),
            Err(e) => {
                debug!("Redis liveness check failed: {}", e);
                Ok(false)
            }
        }
    }
}
