//! API module for the backup server
//!
//! Routes:
//! - `POST /api/v1/backup-requests` accepts a new request (202)
//! - `GET /api/v1/backup-requests/:id` reads a request back
//! - `POST /api/v1/store-status-replies` feeds an interface reply into the saga (202)
//! - `GET /health` reports every circuit breaker

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use backup_core::application::BackupRequestSaga;
use backup_core::{BackupRequestRepository, CircuitBreaker, EventBus};
use tower_http::trace::TraceLayer;

pub mod backup_requests;
pub mod errors;
pub mod health;
pub mod replies;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    /// Saga use cases
    pub saga: Arc<BackupRequestSaga>,
    /// Read side for request lookups
    pub request_repo: Arc<dyn BackupRequestRepository>,
    /// Bus replies are published on
    pub event_bus: Arc<dyn EventBus>,
    /// Breakers reported by the health endpoint
    pub breakers: Vec<Arc<CircuitBreaker>>,
}

/// Build the router for API endpoints
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/backup-requests", post(backup_requests::accept_handler))
        .route("/api/v1/backup-requests/:id", get(backup_requests::get_handler))
        .route("/api/v1/store-status-replies", post(replies::store_status_reply_handler))
        .route("/health", get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
