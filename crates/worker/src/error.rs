use kbtools_pipeline::GenerateError;
use kbtools_storage::StorageError;

/// How a task execution failed, as far as the queue is concerned.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Permanent failure: archive the task without consuming a retry.
    #[error("{0}")]
    Skip(String),

    /// Transient failure: let the backend schedule another attempt.
    #[error("{0}")]
    Retry(String),
}

impl TaskError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, TaskError::Retry(_))
    }
}

impl From<GenerateError> for TaskError {
    fn from(err: GenerateError) -> Self {
        if err.is_retriable() {
            TaskError::Retry(format!("failed to generate project: {err}"))
        } else {
            TaskError::Skip(err.to_string())
        }
    }
}

impl From<StorageError> for TaskError {
    fn from(err: StorageError) -> Self {
        TaskError::Retry(format!("failed to upload files: {err}"))
    }
}
