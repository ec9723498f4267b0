use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kbtools_core::error::CoreError;
use kbtools_core::status::check_cancellable;
use kbtools_queue::QueueError;
use kbtools_storage::StorageError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain errors of the crates the gateway talks to and adds
/// HTTP-specific variants. Implements [`IntoResponse`] to produce
/// consistent `{"error", "code"}` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Admission refused the submission because the queue is full.
    #[error("Service overloaded: {0}")]
    Backpressure(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Queue(err) => classify_queue_error(err),
            AppError::Storage(err) => classify_storage_error(err),

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::Backpressure(msg) => (StatusCode::SERVICE_UNAVAILABLE, "OVERLOADED", msg),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_core_error(err: CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
        CoreError::Gone(msg) => (StatusCode::GONE, "GONE", msg),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

/// Map queue errors onto the task lifecycle vocabulary.
///
/// - Unknown task or queue maps to 404.
/// - A task in the wrong state for cancellation maps through the same
///   rules as an explicit state check (409 running, 410 finished).
/// - Backend failures map to 500 with a sanitized message.
fn classify_queue_error(err: QueueError) -> (StatusCode, &'static str, String) {
    match err {
        QueueError::TaskNotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Task {id} not found"),
        ),
        QueueError::QueueNotFound(queue) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Queue {queue} not found"),
        ),
        QueueError::NotCancellable { id, state } => match check_cancellable(&id, state) {
            Err(core) => classify_core_error(core),
            // The backend refused a state the gateway would cancel.
            Ok(()) => {
                tracing::error!(task_id = %id, %state, "Backend refused to cancel a cancellable task");
                internal()
            }
        },
        other => {
            tracing::error!(error = %other, "Queue backend error");
            internal()
        }
    }
}

/// Storage errors: a missing object is passed through as 404, an upstream
/// failure status as 502 naming that status.
fn classify_storage_error(err: StorageError) -> (StatusCode, &'static str, String) {
    match err {
        StorageError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "File not found".to_string(),
        ),
        StorageError::BadGateway(status) => (
            StatusCode::BAD_GATEWAY,
            "BAD_GATEWAY",
            format!("Storage error: {status}"),
        ),
        err @ (StorageError::Request(_) | StorageError::S3(_)) => {
            tracing::warn!(error = %err, "Storage backend unreachable");
            (
                StatusCode::BAD_GATEWAY,
                "BAD_GATEWAY",
                "Failed to fetch file".to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Storage error");
            internal()
        }
    }
}
