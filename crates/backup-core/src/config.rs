//! Configuration types for the core components
//!
//! Every struct here is built once at startup (normally by the server's
//! configuration loader) and handed to the component that needs it.

use serde::{Deserialize, Serialize};

/// Circuit breaker configuration, one per protected dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Name of the protected dependency, used in logs and errors
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Successes needed in Open/HalfOpen before the circuit closes
    #[serde(default = "default_success_to_close_count")]
    pub success_to_close_count: u32,

    /// Failures needed before the circuit opens
    #[serde(default = "default_failure_to_open_count")]
    pub failure_to_open_count: u32,

    /// Delay between replayed events while half open (in milliseconds)
    #[serde(default = "default_half_open_retry_delay_ms")]
    pub half_open_retry_delay_ms: u64,

    /// Delay between replayed events while closed (in milliseconds)
    #[serde(default = "default_closed_retry_delay_ms")]
    pub closed_retry_delay_ms: u64,

    /// Delay between liveness checks while open (in milliseconds)
    #[serde(default = "default_open_alive_check_delay_ms")]
    pub open_alive_check_delay_ms: u64,
}

fn default_service_name() -> String {
    "unnamed".to_string()
}

fn default_success_to_close_count() -> u32 {
    3
}

fn default_failure_to_open_count() -> u32 {
    5
}

fn default_half_open_retry_delay_ms() -> u64 {
    5_000
}

fn default_closed_retry_delay_ms() -> u64 {
    500
}

fn default_open_alive_check_delay_ms() -> u64 {
    30_000
}

impl CircuitBreakerConfig {
    /// Default configuration for the named dependency
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            success_to_close_count: default_success_to_close_count(),
            failure_to_open_count: default_failure_to_open_count(),
            half_open_retry_delay_ms: default_half_open_retry_delay_ms(),
            closed_retry_delay_ms: default_closed_retry_delay_ms(),
            open_alive_check_delay_ms: default_open_alive_check_delay_ms(),
        }
    }
}

/// Which event bus backend the process uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventBusBackend {
    /// In-process synchronous dispatch
    #[default]
    Memory,
    /// Durable job queue with workers
    Durable,
}

/// Event bus and queue worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Backend selection, process wide
    #[serde(default)]
    pub backend: EventBusBackend,

    /// Attempts the durable queue makes per job before dead-lettering it
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay of the exponential backoff between attempts (in milliseconds)
    #[serde(default = "default_backoff_delay_ms")]
    pub backoff_delay_ms: u64,

    /// Non-connect failures a consumer tolerates before giving up on a job
    #[serde(default = "default_max_true_failures")]
    pub max_true_failures: u32,

    /// Idle delay between queue polls (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_delay_ms() -> u64 {
    1_000
}

fn default_max_true_failures() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            backend: EventBusBackend::default(),
            max_attempts: default_max_attempts(),
            backoff_delay_ms: default_backoff_delay_ms(),
            max_true_failures: default_max_true_failures(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Configuration for the stalled request recovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartStalledConfig {
    /// Requests whose current status is older than this are considered stalled (in milliseconds)
    #[serde(default = "default_stalled_after_ms")]
    pub stalled_after_ms: u64,
}

fn default_stalled_after_ms() -> u64 {
    5 * 60 * 1_000
}

impl Default for RestartStalledConfig {
    fn default() -> Self {
        Self {
            stalled_after_ms: default_stalled_after_ms(),
        }
    }
}
