use std::time::Duration;

use async_trait::async_trait;
use kbtools_core::task::{EnqueueOptions, QueueInfo, TaskInfo, TaskState, WorkerInfo};

use crate::error::QueueError;

/// How long a server may go without a heartbeat before it is no longer
/// listed as a live worker.
pub const SERVER_LIVENESS_WINDOW: Duration = Duration::from_secs(30);

/// Extra time on top of a task's timeout before its lease is considered
/// abandoned by a crashed worker.
pub const DEFAULT_LEASE_GRACE: Duration = Duration::from_secs(30);

/// Where a failed task ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled for another attempt after a backoff delay.
    Retry,
    /// Retries exhausted or skipped; the task is archived with its error.
    Archived,
}

impl FailOutcome {
    pub fn state(self) -> TaskState {
        match self {
            FailOutcome::Retry => TaskState::Retry,
            FailOutcome::Archived => TaskState::Archived,
        }
    }
}

/// Client-side queue operations used by the gateway.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Persist a new pending task and return its snapshot.
    async fn enqueue(
        &self,
        task_type: &str,
        payload: Vec<u8>,
        opts: &EnqueueOptions,
    ) -> Result<TaskInfo, QueueError>;

    /// Per-state counts for `queue`. Fails with
    /// [`QueueError::QueueNotFound`] when the queue has never been used.
    async fn queue_info(&self, queue: &str) -> Result<QueueInfo, QueueError>;

    /// Snapshot of a live (not archived) task.
    async fn inspect(&self, queue: &str, task_id: &str) -> Result<TaskInfo, QueueError>;

    /// Snapshot of an archived task.
    async fn inspect_archived(&self, queue: &str, task_id: &str) -> Result<TaskInfo, QueueError>;

    /// Remove a task that has not started yet.
    ///
    /// The state check and the removal are a single step, so a task that a
    /// worker claims concurrently is reported as
    /// [`QueueError::NotCancellable`] instead of being deleted.
    async fn cancel(&self, queue: &str, task_id: &str) -> Result<(), QueueError>;

    /// Worker processes that sent a heartbeat recently.
    async fn list_workers(&self) -> Result<Vec<WorkerInfo>, QueueError>;

    /// Cheap connectivity check for health probes.
    async fn ping(&self) -> Result<(), QueueError>;
}

/// Worker-side queue operations.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Register or refresh this server's roster entry.
    async fn heartbeat(&self, server: &WorkerInfo) -> Result<(), QueueError>;

    /// Remove this server's roster entry on shutdown.
    async fn deregister(&self, server_id: &str) -> Result<(), QueueError>;

    /// Claim the next runnable task from `queues`, tried in the given order.
    async fn dequeue(
        &self,
        server_id: &str,
        queues: &[String],
    ) -> Result<Option<TaskInfo>, QueueError>;

    /// Overwrite the task's result slot.
    async fn write_result(&self, task_id: &str, data: &[u8]) -> Result<(), QueueError>;

    /// Mark an active task as completed.
    async fn complete(&self, task_id: &str) -> Result<(), QueueError>;

    /// Record a failure. Non-retriable failures and failures past the retry
    /// budget archive the task; everything else schedules a retry.
    async fn fail(
        &self,
        task_id: &str,
        error: &str,
        retriable: bool,
    ) -> Result<FailOutcome, QueueError>;

    /// Hand an active task back to the pending state without counting an
    /// attempt. Used when a worker shuts down mid-task.
    async fn requeue(&self, task_id: &str) -> Result<(), QueueError>;

    /// Fail every active task whose lease has expired. Returns how many
    /// tasks were recovered.
    async fn recover_expired_leases(&self) -> Result<u64, QueueError>;

    /// Delete finished tasks past their retention window and stale server
    /// entries. Returns how many tasks were deleted.
    async fn purge_expired(&self) -> Result<u64, QueueError>;
}
