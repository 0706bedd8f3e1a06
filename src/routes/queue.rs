use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;

/// Identifies the remote caller operating on its own claim.
#[derive(Debug, Deserialize, Validate)]
pub struct CallerRequest {
    #[garde(length(min = 1, max = 128))]
    pub caller_id: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimedJobResponse {
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub qid: String,
}

/// POST /api/v1/queue/next — claim the next eligible job for a remote
/// worker identified by `caller_id`. Responds with `null` when the queue
/// is empty.
pub async fn next_in_queue(
    State(state): State<AppState>,
    Json(request): Json<CallerRequest>,
) -> Result<Json<Option<ClaimedJobResponse>>, StatusCode> {
    request.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    let claimed = state
        .queue
        .get_next_in_queue(&request.caller_id)
        .await
        .map_err(|e| {
            tracing::error!(caller_id = %request.caller_id, error = %e, "Claim failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(claimed.map(|job| ClaimedJobResponse {
        job_id: job.id,
        task_id: job.task_id,
        qid: job.qid,
    })))
}

#[derive(Debug, Serialize)]
pub struct ConsistencyResponse {
    pub consistent: bool,
}

/// POST /api/v1/queue/confirm — verify that the caller's claimed job
/// actually completed; inconsistent jobs go back to the queue.
pub async fn confirm_processing(
    State(state): State<AppState>,
    Json(request): Json<CallerRequest>,
) -> Result<Json<ConsistencyResponse>, StatusCode> {
    request.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    let consistent = state
        .queue
        .confirm_processing(&request.caller_id)
        .await
        .map_err(|e| {
            tracing::error!(caller_id = %request.caller_id, error = %e, "Confirm failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(ConsistencyResponse { consistent }))
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub reverted: bool,
}

/// POST /api/v1/queue/reset — explicitly cancel the caller's claim and
/// return the job to the queue.
pub async fn reset_request(
    State(state): State<AppState>,
    Json(request): Json<CallerRequest>,
) -> Result<Json<ResetResponse>, StatusCode> {
    request.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    let reverted = state
        .queue
        .reset_request(&request.caller_id)
        .await
        .map_err(|e| {
            tracing::error!(caller_id = %request.caller_id, error = %e, "Reset failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(ResetResponse { reverted }))
}
