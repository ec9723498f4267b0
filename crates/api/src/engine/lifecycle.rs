//! Status polling and cancellation of admitted tasks.

use kbtools_core::error::CoreError;
use kbtools_core::status::{map_status, StatusReport};
use kbtools_core::task::TaskInfo;
use kbtools_queue::{QueueError, TaskQueue};

use crate::error::AppResult;
use crate::state::AppState;

/// Look a task up in the live view, then among archived tasks.
///
/// Returns `None` when neither view knows the ID.
pub async fn find_task(
    queue: &dyn TaskQueue,
    queue_name: &str,
    task_id: &str,
) -> Result<Option<TaskInfo>, QueueError> {
    match queue.inspect(queue_name, task_id).await {
        Ok(info) => return Ok(Some(info)),
        Err(QueueError::TaskNotFound(_)) => {}
        Err(e) => return Err(e),
    }
    match queue.inspect_archived(queue_name, task_id).await {
        Ok(info) => Ok(Some(info)),
        Err(QueueError::TaskNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Current client-facing status of `task_id`.
///
/// Every poll counts as client interest. A task seen finished or missing
/// is no longer tracked.
pub async fn status(state: &AppState, task_id: &str) -> AppResult<StatusReport> {
    state.tracker.touch(task_id);

    match find_task(&*state.queue, &state.queue_name, task_id).await? {
        Some(info) => {
            if info.state.is_terminal() {
                state.tracker.remove(task_id);
            }
            Ok(map_status(&info))
        }
        None => {
            state.tracker.remove(task_id);
            Err(not_found(task_id).into())
        }
    }
}

/// Remove a task that has not started yet.
///
/// Running tasks are refused with a conflict and finished ones as gone;
/// the state check and the removal happen in one backend step.
pub async fn cancel(state: &AppState, task_id: &str) -> AppResult<()> {
    match state.queue.cancel(&state.queue_name, task_id).await {
        Ok(()) => {
            state.tracker.remove(task_id);
            tracing::info!(task_id, "Task cancelled");
            Ok(())
        }
        Err(QueueError::TaskNotFound(_)) => {
            state.tracker.remove(task_id);
            Err(not_found(task_id).into())
        }
        Err(QueueError::NotCancellable { id, state: task_state }) => {
            if task_state.is_terminal() {
                state.tracker.remove(task_id);
            } else {
                state.tracker.touch(task_id);
            }
            tracing::info!(task_id, state = %task_state, "Task not cancellable");
            Err(QueueError::NotCancellable { id, state: task_state }.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn not_found(task_id: &str) -> CoreError {
    CoreError::NotFound {
        entity: "Task",
        id: task_id.to_string(),
    }
}
