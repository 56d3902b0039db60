//! Store status reply endpoint, the HTTP counterpart of the reply list

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use backup_core::domain::events::StoreStatusReplyReceived;
use backup_core::domain::store_status::StoreStatusReply;
use backup_core::event_bus::publish;
use serde_json::{json, Value};
use tracing::info;

use super::errors::ApiError;
use super::AppState;

/// Publish `StoreStatusReplyReceived` for the posted reply; the saga applies it
pub async fn store_status_reply_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let reply: StoreStatusReply = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid store status reply: {}", e)))?;
    let backup_request_id = reply.backup_request_id.clone();

    publish(state.event_bus.as_ref(), &StoreStatusReplyReceived { reply }).await?;

    info!(backup_request_id = %backup_request_id, "Store status reply received over HTTP");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "backupRequestId": backup_request_id })),
    ))
}
