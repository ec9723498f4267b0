//! Handlers for the `/api/pcb` resource: submit, poll and cancel.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use kbtools_core::status::StatusReport;
use kbtools_core::types::TaskId;
use serde::Serialize;

use crate::engine::{admission, lifecycle};
use crate::error::AppResult;
use crate::state::AppState;

/// Body of an accepted submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: TaskId,
    pub task_status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: TaskId,
    pub status: &'static str,
    pub message: &'static str,
}

/// POST /api/pcb
///
/// Queue a generation request. Returns 202 with the new task ID, 400 for a
/// body that is not a JSON object, 503 when the queue is full.
pub async fn submit_task(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let task = admission::submit(&state, &body).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id: task.id,
            task_status: "pending",
        }),
    ))
}

/// GET /api/pcb/{task_id}
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<StatusReport>> {
    let report = lifecycle::status(&state, &task_id).await?;
    Ok(Json(report))
}

/// DELETE /api/pcb/{task_id}
///
/// 200 when the task was removed before it started, 409 while it runs,
/// 410 once it has finished, 404 for an unknown ID.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<CancelResponse>> {
    lifecycle::cancel(&state, &task_id).await?;

    Ok(Json(CancelResponse {
        task_id,
        status: "cancelled",
        message: "Task successfully cancelled",
    }))
}
