//! Error responses for the API
//!
//! Every error body has the same shape:
//! `{"error": msg, "errorDetails": {"errorCode": code, "errorMessage": msg}}`.
//! Driver-level details are logged, never returned.

use axum::{http::StatusCode, response::IntoResponse, Json};
use backup_core::CoreError;
use serde_json::json;
use tracing::error;

/// API Error type for returning standard error responses
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),
    /// Not found (404)
    NotFound(String),
    /// Request is in the wrong status (409)
    Conflict(String),
    /// A dependency is unreachable (503)
    ServiceUnavailable(String),
    /// Internal server error (500)
    InternalServerError(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        if let Some(info) = err.connect_failure() {
            error!(service = %info.service_name(), "Dependency unavailable: {}", err);
            return ApiError::ServiceUnavailable(format!("{} is unavailable", info.service_name()));
        }

        match err {
            CoreError::PropsError(msg) => ApiError::BadRequest(msg),
            CoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            err @ CoreError::StatusError { .. } => ApiError::Conflict(err.to_string()),
            other => {
                error!("Request failed: {}", other);
                ApiError::InternalServerError("An internal error occurred".to_string())
            }
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service Unavailable: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "ERR_INVALID_PROPERTIES", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "ERR_NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "ERR_INVALID_STATUS", msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "ERR_SERVICE_UNAVAILABLE", msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "ERR_INTERNAL_SERVER_ERROR", msg),
        };

        let body = Json(json!({
            "error": message,
            "errorDetails": {
                "errorCode": error_code,
                "errorMessage": message,
            }
        }));

        (status, body).into_response()
    }
}
