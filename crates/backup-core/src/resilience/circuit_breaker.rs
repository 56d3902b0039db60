//!
//! Circuit breaker
//! One breaker per external dependency. Adapters report every call outcome;
//! the breaker decides whether the dependency is trusted, polls it while it
//! is not, and replays parked events once it recovers.
//!

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry_drain::RetryDrain;
use super::AdapterLivenessCheck;
use crate::config::CircuitBreakerConfig;
use crate::domain::events::EventEnvelope;
use crate::event_bus::EventBus;
use crate::{ConnectFailureInfo, CoreResult};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Dependency trusted; calls go through
    Closed,
    /// Probing; calls go through and successes are counted
    HalfOpen,
    /// Dependency down; calls fail fast and liveness is polled
    Open,
    /// Terminal; outcomes are ignored
    Halted,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "Closed",
            CircuitState::HalfOpen => "HalfOpen",
            CircuitState::Open => "Open",
            CircuitState::Halted => "Halted",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a breaker, reported by the health endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    /// Protected dependency
    pub service_name: String,
    /// Current state
    pub state: CircuitState,
    /// Successes counted towards closing
    pub success_count: u32,
    /// Failures counted towards opening
    pub failure_count: u32,
    /// Successes since start
    pub lifetime_success_count: u64,
    /// Failures since start
    pub lifetime_failure_count: u64,
    /// Events parked for replay
    pub retry_event_count: usize,
}

struct Counters {
    state: CircuitState,
    success_count: u32,
    failure_count: u32,
    lifetime_success_count: u64,
    lifetime_failure_count: u64,
}

/// Circuit breaker guarding one dependency
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    liveness: Arc<dyn AdapterLivenessCheck>,
    counters: Mutex<Counters>,
    retry_drain: Arc<RetryDrain>,
    cancel: CancellationToken,
    polling: AtomicBool,
    watching: AtomicBool,
    this: Weak<CircuitBreaker>,
}

impl CircuitBreaker {
    /// Create a breaker in HalfOpen; call [`settle`](Self::settle) to run the first probe
    pub fn new(config: CircuitBreakerConfig, liveness: Arc<dyn AdapterLivenessCheck>) -> Arc<Self> {
        Self::with_cancellation(config, liveness, &CancellationToken::new())
    }

    /// Create a breaker that halts when `parent` is cancelled
    pub fn with_cancellation(
        config: CircuitBreakerConfig,
        liveness: Arc<dyn AdapterLivenessCheck>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let cancel = parent.child_token();
        let retry_drain = Arc::new(RetryDrain::new(
            config.service_name.clone(),
            config.half_open_retry_delay_ms,
            cancel.child_token(),
        ));

        Arc::new_cyclic(|this| Self {
            config,
            liveness,
            counters: Mutex::new(Counters {
                state: CircuitState::HalfOpen,
                success_count: 0,
                failure_count: 0,
                lifetime_success_count: 0,
                lifetime_failure_count: 0,
            }),
            retry_drain,
            cancel,
            polling: AtomicBool::new(false),
            watching: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Attach the bus parked events are republished on
    pub fn set_retry_publisher(&self, bus: &Arc<dyn EventBus>) {
        self.retry_drain.set_publisher(bus);
    }

    /// Run the initial liveness probe.
    ///
    /// Alive closes the circuit. Not alive (or a failing probe) opens it and
    /// starts polling. From here on, cancelling the breaker's token halts it.
    pub async fn settle(&self) {
        self.watch_cancellation();

        let alive = match self.liveness.is_alive().await {
            Ok(alive) => alive,
            Err(e) => {
                warn!(service = %self.config.service_name, "Initial liveness check failed: {}", e);
                false
            }
        };

        let state = {
            let mut counters = self.counters.lock();
            if counters.state == CircuitState::HalfOpen {
                if alive {
                    counters.state = CircuitState::Closed;
                    counters.failure_count = 0;
                } else {
                    counters.state = CircuitState::Open;
                }
                counters.success_count = 0;
            }
            counters.state
        };

        info!(service = %self.config.service_name, state = %state, "Circuit breaker settled");
        match state {
            CircuitState::Open => self.start_liveness_loop(),
            CircuitState::Closed => {
                self.retry_drain.set_delay_ms(self.config.closed_retry_delay_ms);
                self.trigger_drain();
            }
            _ => {}
        }
    }

    /// Report a successful call
    pub fn on_success(&self) {
        let (closed_now, delay_ms) = {
            let mut counters = self.counters.lock();
            let mut closed_now = false;
            match counters.state {
                CircuitState::Halted => return,
                CircuitState::Closed => {
                    counters.failure_count = counters.failure_count.saturating_sub(1);
                }
                CircuitState::Open | CircuitState::HalfOpen => {
                    counters.success_count += 1;
                    if counters.success_count >= self.config.success_to_close_count {
                        counters.state = CircuitState::Closed;
                        counters.failure_count = 0;
                        closed_now = true;
                    } else {
                        counters.state = CircuitState::HalfOpen;
                    }
                }
            }
            counters.lifetime_success_count += 1;
            (closed_now, self.retry_delay_for(counters.state))
        };

        if closed_now {
            info!(service = %self.config.service_name, "Circuit closed");
        }
        self.retry_drain.set_delay_ms(delay_ms);
        self.trigger_drain();
    }

    /// Report a failed call
    pub fn on_failure(&self) {
        let opened = {
            let mut counters = self.counters.lock();
            if counters.state == CircuitState::Halted {
                return;
            }
            counters.lifetime_failure_count += 1;
            if counters.state == CircuitState::Open {
                false
            } else {
                counters.failure_count += 1;
                if counters.failure_count >= self.config.failure_to_open_count {
                    counters.state = CircuitState::Open;
                    counters.success_count = 0;
                    true
                } else {
                    false
                }
            }
        };

        if opened {
            warn!(service = %self.config.service_name, "Circuit opened");
            self.retry_drain.stop();
            self.start_liveness_loop();
        }
    }

    /// Report a call outcome; only connect failures count against the dependency
    pub fn record_outcome<T>(&self, result: &CoreResult<T>) {
        match result {
            Err(e) if e.is_connect_failure() => self.on_failure(),
            _ => self.on_success(),
        }
    }

    /// False only while the circuit is Open
    pub fn is_connected(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Park an event for replay once the dependency is healthy
    pub fn add_retry_event(&self, event: EventEnvelope) {
        if self.retry_drain.add_event(event) {
            debug!(
                service = %self.config.service_name,
                queued = self.retry_drain.len(),
                "Parked event for retry"
            );
        }
        if self.state() == CircuitState::Closed {
            self.trigger_drain();
        }
    }

    /// Stop for good: drops parked events and ends liveness polling
    pub fn halt(&self) {
        {
            let mut counters = self.counters.lock();
            if counters.state == CircuitState::Halted {
                return;
            }
            counters.state = CircuitState::Halted;
        }
        self.retry_drain.halt();
        self.cancel.cancel();
        info!(service = %self.config.service_name, "Circuit breaker halted");
    }

    /// Connect failure details pointing at this breaker
    pub fn connect_failure_info(self: &Arc<Self>) -> ConnectFailureInfo {
        ConnectFailureInfo::new(self.clone())
    }

    /// Name of the protected dependency
    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.counters.lock().state
    }

    /// Number of parked events
    pub fn retry_event_count(&self) -> usize {
        self.retry_drain.len()
    }

    /// Counters and state for reporting
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let counters = self.counters.lock();
        CircuitBreakerSnapshot {
            service_name: self.config.service_name.clone(),
            state: counters.state,
            success_count: counters.success_count,
            failure_count: counters.failure_count,
            lifetime_success_count: counters.lifetime_success_count,
            lifetime_failure_count: counters.lifetime_failure_count,
            retry_event_count: self.retry_drain.len(),
        }
    }

    fn retry_delay_for(&self, state: CircuitState) -> u64 {
        if state == CircuitState::Closed {
            self.config.closed_retry_delay_ms
        } else {
            self.config.half_open_retry_delay_ms
        }
    }

    fn trigger_drain(&self) {
        if self.retry_drain.is_empty() || !self.is_connected() {
            return;
        }

        let drain = self.retry_drain.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { drain.run_events().await });
            }
            Err(_) => {
                debug!(service = %self.config.service_name, "No runtime, retry drain not started");
            }
        }
    }

    fn watch_cancellation(&self) {
        if self.watching.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancel = self.cancel.clone();
        let this = self.this.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                cancel.cancelled().await;
                if let Some(breaker) = this.upgrade() {
                    breaker.halt();
                }
            });
        }
    }

    fn start_liveness_loop(&self) {
        if self.polling.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            self.polling.store(false, Ordering::SeqCst);
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(this.await_is_alive());
            }
            Err(_) => {
                warn!(service = %self.config.service_name, "No runtime, liveness polling not started");
                self.polling.store(false, Ordering::SeqCst);
            }
        }
    }

    async fn await_is_alive(self: Arc<Self>) {
        let delay = Duration::from_millis(self.config.open_alive_check_delay_ms);

        loop {
            while self.state() == CircuitState::Open {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.polling.store(false, Ordering::SeqCst);
                        self.halt();
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                match self.liveness.is_alive().await {
                    Ok(true) => {
                        let mut counters = self.counters.lock();
                        if counters.state == CircuitState::Open {
                            counters.state = CircuitState::HalfOpen;
                            info!(service = %self.config.service_name, "Dependency alive, circuit half open");
                        }
                    }
                    Ok(false) => {
                        debug!(service = %self.config.service_name, "Dependency still down");
                    }
                    Err(e) => {
                        warn!(service = %self.config.service_name, "Liveness check failed: {}", e);
                    }
                }
            }

            self.polling.store(false, Ordering::SeqCst);
            // Reopened between the last check and the flag reset
            if self.state() != CircuitState::Open || self.polling.swap(true, Ordering::SeqCst) {
                break;
            }
        }

        self.retry_drain.set_delay_ms(self.retry_delay_for(self.state()));
        self.trigger_drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::liveness_fn;
    use crate::resilience::retry_drain::tests::{received, RecordingBus};
    use crate::CoreError;

    fn config(failure_to_open: u32, success_to_close: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            service_name: "test".to_string(),
            success_to_close_count: success_to_close,
            failure_to_open_count: failure_to_open,
            half_open_retry_delay_ms: 50,
            closed_retry_delay_ms: 10,
            open_alive_check_delay_ms: 1_000,
        }
    }

    fn switchable_probe() -> (Arc<AtomicBool>, Arc<dyn AdapterLivenessCheck>) {
        let alive = Arc::new(AtomicBool::new(true));
        let flag = alive.clone();
        let probe = liveness_fn(move || {
            let flag = flag.clone();
            async move { Ok(flag.load(Ordering::SeqCst)) }
        });
        (alive, probe)
    }

    #[tokio::test]
    async fn test_settle_closes_when_alive() {
        let (_alive, probe) = switchable_probe();
        let breaker = CircuitBreaker::new(config(5, 3), probe);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.settle().await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.is_connected());
    }

    #[tokio::test]
    async fn test_settle_opens_when_not_alive() {
        tokio::time::pause();
        let (alive, probe) = switchable_probe();
        alive.store(false, Ordering::SeqCst);
        let breaker = CircuitBreaker::new(config(5, 3), probe);

        breaker.settle().await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_connected());
        breaker.halt();
    }

    #[tokio::test]
    async fn test_single_failure_opens_with_threshold_one() {
        tokio::time::pause();
        let (_alive, probe) = switchable_probe();
        let breaker = CircuitBreaker::new(config(1, 3), probe);
        breaker.settle().await;

        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_connected());
        breaker.halt();
    }

    #[tokio::test]
    async fn test_success_while_closed_decays_failures() {
        let (_alive, probe) = switchable_probe();
        let breaker = CircuitBreaker::new(config(2, 3), probe);
        breaker.settle().await;

        breaker.on_failure();
        breaker.on_success();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.lifetime_failure_count, 2);
        assert_eq!(snapshot.lifetime_success_count, 1);
    }

    #[tokio::test]
    async fn test_record_outcome_only_counts_connect_failures() {
        tokio::time::pause();
        let (_alive, probe) = switchable_probe();
        let breaker = CircuitBreaker::new(config(1, 3), probe);
        breaker.settle().await;

        breaker.record_outcome::<()>(&Err(CoreError::NotFound("Backup request r1".to_string())));
        assert_eq!(breaker.state(), CircuitState::Closed);

        let err: CoreResult<()> =
            Err(CoreError::database_connect("refused", breaker.connect_failure_info()));
        breaker.record_outcome(&err);
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.halt();
    }

    #[tokio::test]
    async fn test_liveness_loop_moves_open_to_half_open_then_successes_close() {
        tokio::time::pause();
        let (alive, probe) = switchable_probe();
        let breaker = CircuitBreaker::new(config(1, 2), probe);
        breaker.settle().await;

        alive.store(false, Ordering::SeqCst);
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        alive.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_parked_events_are_replayed_after_recovery() {
        tokio::time::pause();
        let (alive, probe) = switchable_probe();
        let breaker = CircuitBreaker::new(config(1, 1), probe);
        let bus = Arc::new(RecordingBus::default());
        let dyn_bus: Arc<dyn EventBus> = bus.clone();
        breaker.set_retry_publisher(&dyn_bus);
        breaker.settle().await;

        alive.store(false, Ordering::SeqCst);
        breaker.on_failure();
        breaker.add_retry_event(received("r1"));
        breaker.add_retry_event(received("r1"));
        breaker.add_retry_event(received("r2"));
        assert_eq!(breaker.retry_event_count(), 2);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(bus.published.lock().is_empty());

        alive.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let keys: Vec<String> = bus.published.lock().iter().map(|e| e.event_key.clone()).collect();
        assert_eq!(keys, vec!["r1", "r2"]);
        assert_eq!(breaker.retry_event_count(), 0);
    }

    #[tokio::test]
    async fn test_halt_is_terminal() {
        let (_alive, probe) = switchable_probe();
        let breaker = CircuitBreaker::new(config(1, 1), probe);
        breaker.settle().await;
        breaker.on_failure();
        breaker.add_retry_event(received("r1"));

        breaker.halt();
        assert_eq!(breaker.state(), CircuitState::Halted);
        assert_eq!(breaker.retry_event_count(), 0);

        breaker.on_success();
        breaker.on_failure();
        breaker.add_retry_event(received("r2"));
        assert_eq!(breaker.state(), CircuitState::Halted);
        assert_eq!(breaker.retry_event_count(), 0);
        assert!(breaker.is_connected());
    }

    #[tokio::test]
    async fn test_parent_cancellation_halts_polling_breaker() {
        tokio::time::pause();
        let (alive, probe) = switchable_probe();
        alive.store(false, Ordering::SeqCst);
        let shutdown = CancellationToken::new();
        let breaker = CircuitBreaker::with_cancellation(config(1, 1), probe, &shutdown);
        breaker.settle().await;
        assert_eq!(breaker.state(), CircuitState::Open);

        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(breaker.state(), CircuitState::Halted);
    }
}
