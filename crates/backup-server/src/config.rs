//! Configuration for the backup server
//!
//! Loaded once at startup from an optional `backup.toml` next to the binary
//! and from `BACKUP__*` environment variables, which win. Nested keys use a
//! double underscore: `BACKUP__DATABASE__CONNECTION_STRING`,
//! `BACKUP__BREAKERS__DATABASE__FAILURE_TO_OPEN_COUNT`.

use backup_core::{CircuitBreakerConfig, EventBusConfig, RestartStalledConfig};
use backup_queue_redis::RedisConfig;
use backup_state_postgres::PostgresConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ServerError, ServerResult};

/// Backup job service client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupJobServiceConfig {
    /// Base URL, without a trailing slash
    pub base_url: String,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for BackupJobServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            timeout_ms: 5_000,
        }
    }
}

/// One breaker per protected dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakersConfig {
    /// PostgreSQL
    pub database: CircuitBreakerConfig,
    /// Durable queue behind the event bus
    pub event_bus: CircuitBreakerConfig,
    /// Backup job service
    pub backup_job_service: CircuitBreakerConfig,
    /// Backup interface lists
    pub interface: CircuitBreakerConfig,
}

impl Default for BreakersConfig {
    fn default() -> Self {
        Self {
            database: CircuitBreakerConfig::for_service("database"),
            event_bus: CircuitBreakerConfig::for_service("event-bus"),
            backup_job_service: CircuitBreakerConfig::for_service("backup-job-service"),
            interface: CircuitBreakerConfig::for_service("interface"),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// Default tracing filter; `RUST_LOG` overrides it
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON log lines instead of human readable ones
    #[serde(default)]
    pub log_json: bool,

    /// PostgreSQL settings
    #[serde(default)]
    pub database: PostgresConfig,

    /// Redis settings, shared by the job queue and the interface store
    #[serde(default)]
    pub redis: RedisConfig,

    /// Backup job service settings
    #[serde(default)]
    pub backup_job_service: BackupJobServiceConfig,

    /// Event bus backend and queue worker settings
    #[serde(default)]
    pub event_bus: EventBusConfig,

    /// Stalled request recovery settings
    #[serde(default)]
    pub restart_stalled: RestartStalledConfig,

    /// Run the stalled request recovery once at startup
    #[serde(default = "default_true")]
    pub restart_stalled_on_start: bool,

    /// Idle delay between reads of the interface reply list (in milliseconds)
    #[serde(default = "default_reply_poll_interval_ms")]
    pub reply_poll_interval_ms: u64,

    /// Circuit breaker settings
    #[serde(default)]
    pub breakers: BreakersConfig,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_filter() -> String {
    "info,backup_core=debug".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reply_poll_interval_ms() -> u64 {
    1_000
}

impl ServerConfig {
    /// Load configuration from the optional file and the environment
    pub fn load() -> ServerResult<Self> {
        let source = Config::builder()
            .add_source(File::with_name("backup").required(false))
            .add_source(
                Environment::with_prefix("BACKUP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config = Self::from_source(source)?;
        info!(port = config.port, backend = ?config.event_bus.backend, "Loaded server configuration");
        Ok(config)
    }

    /// Deserialize, name unnamed breakers and validate
    pub fn from_source(source: Config) -> ServerResult<Self> {
        let mut config: ServerConfig = source.try_deserialize()?;
        config.name_breakers();
        config.validate()?;
        Ok(config)
    }

    fn name_breakers(&mut self) {
        let defaults = BreakersConfig::default();
        for (breaker, default) in [
            (&mut self.breakers.database, defaults.database),
            (&mut self.breakers.event_bus, defaults.event_bus),
            (&mut self.breakers.backup_job_service, defaults.backup_job_service),
            (&mut self.breakers.interface, defaults.interface),
        ] {
            if breaker.service_name == CircuitBreakerConfig::default().service_name {
                breaker.service_name = default.service_name;
            }
        }
    }

    fn validate(&self) -> ServerResult<()> {
        if reqwest::Url::parse(&self.backup_job_service.base_url).is_err() {
            return Err(ServerError::ConfigError(format!(
                "backup_job_service.base_url is not a valid URL: {}",
                self.backup_job_service.base_url
            )));
        }

        if self.database.connection_string.is_empty() {
            return Err(ServerError::ConfigError("database.connection_string is required".to_string()));
        }

        if self.event_bus.max_attempts == 0 {
            return Err(ServerError::ConfigError("event_bus.max_attempts must be at least 1".to_string()));
        }

        for breaker in [
            &self.breakers.database,
            &self.breakers.event_bus,
            &self.breakers.backup_job_service,
            &self.breakers.interface,
        ] {
            if breaker.failure_to_open_count == 0 || breaker.success_to_close_count == 0 {
                return Err(ServerError::ConfigError(format!(
                    "breaker {} needs positive open and close counts",
                    breaker.service_name
                )));
            }
        }

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_host(),
            log_filter: default_log_filter(),
            log_json: false,
            database: PostgresConfig::default(),
            redis: RedisConfig::default(),
            backup_job_service: BackupJobServiceConfig::default(),
            event_bus: EventBusConfig::default(),
            restart_stalled: RestartStalledConfig::default(),
            restart_stalled_on_start: true,
            reply_poll_interval_ms: default_reply_poll_interval_ms(),
            breakers: BreakersConfig::default(),
        }
    }
}
