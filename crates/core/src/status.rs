//! Client-facing task status mapping.
//!
//! Translates a backend [`TaskInfo`] plus its latest [`ProgressReport`]
//! into the normalized `{task_id, task_status, task_result}` document
//! returned by `GET /api/pcb/{task_id}`. The mapping is a single `match`
//! over the backend state, so supporting a new state is one arm.

use serde::Serialize;

use crate::error::CoreError;
use crate::progress::ProgressReport;
use crate::task::{TaskInfo, TaskState};
use crate::types::TaskId;

/// Percentage reported for an active task that has not written progress yet.
pub const DEFAULT_ACTIVE_PERCENTAGE: i32 = 50;

/// Normalized status reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClientStatus {
    Pending,
    Progress,
    Success,
    Failure,
    Retry,
    Unknown,
}

/// Result payload attached to a status. Absent fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retry: Option<i32>,
}

impl TaskResult {
    fn percentage(percentage: i32) -> Self {
        Self {
            percentage: Some(percentage),
            ..Self::default()
        }
    }
}

/// Response body for a status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub task_id: TaskId,
    pub task_status: ClientStatus,
    pub task_result: TaskResult,
}

/// Map a task snapshot to its client-facing status.
pub fn map_status(info: &TaskInfo) -> StatusReport {
    let progress = info.result.as_deref().and_then(ProgressReport::parse);

    let (task_status, task_result) = match (info.state, info.failure()) {
        (TaskState::Pending, _) => (ClientStatus::Pending, TaskResult::percentage(0)),
        (TaskState::Active, _) => match progress {
            Some(report) => (
                ClientStatus::Progress,
                TaskResult {
                    percentage: Some(report.percentage),
                    message: Some(report.message).filter(|m| !m.is_empty()),
                    ..TaskResult::default()
                },
            ),
            None => (
                ClientStatus::Progress,
                TaskResult::percentage(DEFAULT_ACTIVE_PERCENTAGE),
            ),
        },
        (TaskState::Completed, _) => (
            ClientStatus::Success,
            TaskResult::percentage(progress.map_or(100, |p| p.percentage)),
        ),
        (TaskState::Archived, Some(error)) => (
            ClientStatus::Failure,
            TaskResult {
                percentage: Some(0),
                error: Some(error.to_string()),
                ..TaskResult::default()
            },
        ),
        (TaskState::Archived, None) => (ClientStatus::Success, TaskResult::percentage(100)),
        (TaskState::Retry, _) => (
            ClientStatus::Retry,
            TaskResult {
                percentage: Some(0),
                retries: Some(info.retried),
                max_retry: Some(info.max_retry),
                ..TaskResult::default()
            },
        ),
        (TaskState::Unknown, _) => (ClientStatus::Unknown, TaskResult::default()),
    };

    StatusReport {
        task_id: info.id.clone(),
        task_status,
        task_result,
    }
}

/// Decide whether a task in `state` may be cancelled.
///
/// Only tasks that have not started (pending, or waiting for a retry) can
/// be removed from the queue. Running tasks are bounded by their hard
/// timeout instead.
pub fn check_cancellable(task_id: &str, state: TaskState) -> Result<(), CoreError> {
    match state {
        TaskState::Pending | TaskState::Retry => Ok(()),
        TaskState::Active => Err(CoreError::Conflict(format!(
            "Cannot cancel task {task_id} that is currently running"
        ))),
        TaskState::Completed | TaskState::Archived => Err(CoreError::Gone(format!(
            "Task {task_id} has already completed or failed"
        ))),
        TaskState::Unknown => Err(CoreError::Internal(format!(
            "Task {task_id} is in an unknown state"
        ))),
    }
}
