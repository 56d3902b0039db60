//! Resilience layer for the backup request service
//!
//! Every external dependency (database, event bus backend, backup job
//! service, interface store) is wrapped by an adapter that owns one
//! [`CircuitBreaker`]. The breaker fast-fails calls while the dependency is
//! down, polls its liveness probe, and replays parked events through its
//! [`RetryDrain`] once the dependency is back.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::CoreResult;

pub mod circuit_breaker;
pub mod retry_drain;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use retry_drain::{DrainState, RetryDrain};

/// Liveness probe injected into a circuit breaker
#[async_trait]
pub trait AdapterLivenessCheck: Send + Sync {
    /// `Ok(true)` when the dependency answers
    async fn is_alive(&self) -> CoreResult<bool>;
}

/// Liveness probe backed by a closure
pub struct FnLivenessCheck<F, Fut> {
    check: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> AdapterLivenessCheck for FnLivenessCheck<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = CoreResult<bool>> + Send,
{
    async fn is_alive(&self) -> CoreResult<bool> {
        (self.check)().await
    }
}

/// Build a liveness probe from a closure returning a future
pub fn liveness_fn<F, Fut>(check: F) -> Arc<dyn AdapterLivenessCheck>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CoreResult<bool>> + Send + 'static,
{
    Arc::new(FnLivenessCheck {
        check,
        _marker: PhantomData,
    })
}
