//! Backup request endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use backup_core::application::AcceptBackupRequestDto;
use backup_core::BackupRequestId;
use serde_json::Value;
use tracing::debug;

use super::errors::ApiError;
use super::AppState;

/// Accept a backup request.
///
/// The body is taken as raw JSON so that a malformed body answers with the
/// same 400 shape as a missing field.
pub async fn accept_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let dto: AcceptBackupRequestDto = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?;

    let accepted = state.saga.accept.execute(dto).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Fetch a backup request by id
pub async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    debug!(backup_request_id = %id, "Backup request lookup");
    let request = state.request_repo.get_by_id(&BackupRequestId(id)).await?;
    Ok(Json(request))
}
