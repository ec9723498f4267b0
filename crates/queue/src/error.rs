use kbtools_core::task::TaskState;

/// Errors raised by a queue backend.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The named queue has never held a task.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The task exists but its state no longer allows removal.
    #[error("task {id} cannot be cancelled in state {state}")]
    NotCancellable { id: String, state: TaskState },

    #[error("invalid queue configuration: {0}")]
    Config(String),

    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
