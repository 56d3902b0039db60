//! Health check endpoint

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use backup_core::resilience::CircuitBreakerSnapshot;
use serde_json::json;

use super::AppState;

/// Report every breaker; 503 with `DEGRADED` while any circuit is open
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let dependencies: Vec<CircuitBreakerSnapshot> =
        state.breakers.iter().map(|breaker| breaker.snapshot()).collect();
    let healthy = state.breakers.iter().all(|breaker| breaker.is_connected());

    let (status, label) = if healthy {
        (StatusCode::OK, "UP")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "DEGRADED")
    };

    (
        status,
        Json(json!({
            "status": label,
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": dependencies,
        })),
    )
}
