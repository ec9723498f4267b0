//! Admission of new generation requests.
//!
//! The gateway only checks that a submission is a JSON object. The layout
//! and settings are validated by the worker, where a bad request ends as a
//! FAILURE status the client can read back.

use kbtools_core::task::{EnqueueOptions, TaskInfo, TASK_TYPE_GENERATE_KICAD};
use kbtools_queue::QueueError;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const MSG_INVALID_JSON: &str = "Invalid JSON in request body";
pub const MSG_OVERLOADED: &str = "Server overloaded, try again later";

/// Admit `body` as a new task and start tracking it.
///
/// Refused with [`AppError::Backpressure`] while the queue already holds
/// more than `admission_max_depth` pending and active tasks. Identical
/// bodies are not deduplicated.
pub async fn submit(state: &AppState, body: &[u8]) -> AppResult<TaskInfo> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(_)) => {}
        _ => return Err(AppError::BadRequest(MSG_INVALID_JSON.to_string())),
    }

    let depth = queue_depth(state).await?;
    if depth > state.config.admission_max_depth {
        tracing::warn!(
            depth,
            max_depth = state.config.admission_max_depth,
            "Submission refused, queue full"
        );
        return Err(AppError::Backpressure(MSG_OVERLOADED.to_string()));
    }

    let opts = EnqueueOptions {
        queue: state.queue_name.to_string(),
        ..EnqueueOptions::default()
    };
    let task = state
        .queue
        .enqueue(TASK_TYPE_GENERATE_KICAD, body.to_vec(), &opts)
        .await?;

    state.tracker.touch(&task.id);
    tracing::info!(task_id = %task.id, depth, "Task enqueued");

    Ok(task)
}

/// Pending plus active tasks. A queue the backend has never seen is empty.
async fn queue_depth(state: &AppState) -> Result<i64, QueueError> {
    match state.queue.queue_info(&state.queue_name).await {
        Ok(info) => Ok(info.depth()),
        Err(QueueError::QueueNotFound(queue)) => {
            tracing::debug!(%queue, "Queue not created yet, treating as empty");
            Ok(0)
        }
        Err(e) => Err(e),
    }
}
