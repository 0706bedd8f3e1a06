use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::job::JobStatus;
use crate::models::verdict::Verdict;

/// Request to verify the references of one entity's claims.
#[derive(Debug, Deserialize, Validate)]
pub struct CheckRequest {
    #[garde(custom(is_qid))]
    pub qid: String,

    #[garde(length(min = 1, max = 64))]
    #[serde(default = "default_request_type")]
    pub request_type: String,
}

fn default_request_type() -> String {
    "user_requested".to_string()
}

fn is_qid(value: &str, _ctx: &()) -> garde::Result {
    let mut chars = value.chars();
    if chars.next() == Some('Q') && value.len() > 1 && chars.all(|c| c.is_ascii_digit()) {
        return Ok(());
    }
    Err(garde::Error::new("expected a Wikidata item id like Q64"))
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub task_id: Uuid,
    pub qid: String,
    pub status: JobStatus,
    pub message: String,
}

/// POST /api/v1/check — enqueue a claim-check task for an entity.
/// A qid that is already waiting in the queue is not enqueued twice.
pub async fn submit_check(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Result<(StatusCode, Json<CheckResponse>), StatusCode> {
    request.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    let queue_name = state.queue.queue_name();

    let existing = queries::find_in_queue_by_qid(&state.db, queue_name, &request.qid)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Enqueue dedup lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if let Some(job) = existing {
        return Ok((
            StatusCode::OK,
            Json(CheckResponse {
                task_id: job.task_id,
                qid: job.qid,
                status: job.status,
                message: "Entity is already in queue".to_string(),
            }),
        ));
    }

    let job = queries::enqueue(
        &state.db,
        queue_name,
        &request.qid,
        &request.request_type,
        &state.algo_version,
    )
    .await
    .map_err(|e| {
        tracing::error!(qid = %request.qid, error = %e, "Failed to enqueue task");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    metrics::counter!("verification_tasks_submitted").increment(1);

    tracing::info!(task_id = %job.task_id, qid = %job.qid, "Task enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(CheckResponse {
            task_id: job.task_id,
            qid: job.qid,
            status: job.status,
            message: "Task created".to_string(),
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub qid: String,
    pub status: JobStatus,
    pub algo_version: String,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
    pub verdicts: Vec<Verdict>,
}

/// GET /api/v1/check/{task_id} — canonical task status plus any verdicts.
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskStatusResponse>, StatusCode> {
    let record = queries::get_task_status(&state.db, task_id)
        .await
        .map_err(|e| {
            tracing::error!(task_id = %task_id, error = %e, "Status lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let verdicts = queries::list_verdicts(&state.db, task_id)
        .await
        .map_err(|e| {
            tracing::error!(task_id = %task_id, error = %e, "Verdict lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(TaskStatusResponse {
        task_id: record.task_id,
        qid: record.qid,
        status: record.status,
        algo_version: record.algo_version,
        requested_at: record.requested_at,
        completed_at: record.completed_at,
        error_message: record.error_message,
        verdicts,
    }))
}
