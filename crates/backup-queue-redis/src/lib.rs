//! Redis adapters for the backup request service
//!
//! - [`RedisJobQueue`]: storage backend of the durable event bus
//! - [`RedisInterfaceStore`]: outbound send list and inbound reply list of
//!   the backup interface

use serde::{Deserialize, Serialize};

pub mod interface;
pub mod job_queue;
pub mod pool;

pub use interface::{InterfaceSendMessage, RedisInterfaceStore};
pub use job_queue::{DeadLetter, RedisJobQueue};
pub use pool::{is_connect_error, RedisLiveness, RedisPool};

/// Redis connection and key layout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Server URL
    pub url: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Connection timeout in milliseconds
    pub connection_timeout_ms: u64,

    /// Pool timeout in milliseconds (waiting for available connection)
    pub pool_timeout_ms: u64,

    /// Prefix of every job queue key
    pub key_prefix: String,

    /// How long a claimed job stays invisible to other workers (in milliseconds)
    pub lease_ms: u64,

    /// List the interface reads requests from
    pub send_list: String,

    /// List the interface writes replies to
    pub reply_list: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 20,
            connection_timeout_ms: 3_000,
            pool_timeout_ms: 5_000,
            key_prefix: "backup:queue".to_string(),
            lease_ms: 5 * 60 * 1_000,
            send_list: "interface:send".to_string(),
            reply_list: "interface:reply".to_string(),
        }
    }
}
