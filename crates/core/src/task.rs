//! Task, queue and worker-server snapshots as seen through the queue backend.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::types::{TaskId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The only task type this system enqueues.
pub const TASK_TYPE_GENERATE_KICAD: &str = "generate_kicad_project";

/// Default queue for project generation.
pub const DEFAULT_QUEUE: &str = "kicad";

/// Higher-priority lane served by every worker alongside the default queue.
pub const CRITICAL_QUEUE: &str = "critical";

/// Dequeue weight of the default queue.
pub const DEFAULT_QUEUE_WEIGHT: i32 = 10;

/// Dequeue weight of the critical queue.
pub const CRITICAL_QUEUE_WEIGHT: i32 = 20;

/// Retries allowed before a failing task is archived.
pub const DEFAULT_MAX_RETRY: i32 = 3;

/// Hard per-task execution timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// How long completed/archived task metadata is kept by the backend.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Exponent cap for [`retry_delay`] so the shift can never overflow.
const MAX_BACKOFF_EXPONENT: i32 = 16;

// ---------------------------------------------------------------------------
// Task state
// ---------------------------------------------------------------------------

/// Lifecycle state of a task as stored by the queue backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Claimed and executing on a worker.
    Active,
    /// Failed with a retriable error; waiting for its backoff to elapse.
    Retry,
    /// Finished successfully, kept for the retention window.
    Completed,
    /// Moved out of active tracking after exhausting retries or a
    /// non-retriable failure.
    Archived,
    /// A state name this build does not recognise.
    Unknown,
}

impl TaskState {
    /// Name stored in the backend's `state` column.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::Retry => "retry",
            TaskState::Completed => "completed",
            TaskState::Archived => "archived",
            TaskState::Unknown => "unknown",
        }
    }

    /// Parse a stored state name. Unrecognised names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => TaskState::Pending,
            "active" => TaskState::Active,
            "retry" => TaskState::Retry,
            "completed" => TaskState::Completed,
            "archived" => TaskState::Archived,
            _ => TaskState::Unknown,
        }
    }

    /// Whether the task has finished and will never run again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Archived)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task snapshot
// ---------------------------------------------------------------------------

/// Read-only snapshot of one task returned by `inspect`.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: TaskId,
    pub queue: String,
    pub task_type: String,
    pub payload: Vec<u8>,
    pub state: TaskState,
    pub max_retry: i32,
    pub retried: i32,
    pub last_error: Option<String>,
    pub last_failed_at: Option<Timestamp>,
    pub timeout: Duration,
    pub retention: Duration,
    /// Latest bytes written to the result slot (a serialized progress report).
    pub result: Option<Vec<u8>>,
    pub next_process_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl TaskInfo {
    /// Last recorded error, ignoring blank strings.
    pub fn failure(&self) -> Option<&str> {
        self.last_error.as_deref().filter(|e| !e.trim().is_empty())
    }
}

/// Enqueue policy: target queue, retry budget, timeout and retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub queue: String,
    pub max_retry: i32,
    pub timeout: Duration,
    pub retention: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            max_retry: DEFAULT_MAX_RETRY,
            timeout: DEFAULT_TASK_TIMEOUT,
            retention: DEFAULT_RETENTION,
        }
    }
}

/// Per-state task counts for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    pub queue: String,
    pub pending: i64,
    pub active: i64,
    pub retry: i64,
    pub completed: i64,
    pub archived: i64,
}

impl QueueInfo {
    /// Work the queue is currently committed to: pending plus active.
    pub fn depth(&self) -> i64 {
        self.pending + self.active
    }
}

/// Read-only snapshot of one worker process registered with the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: String,
    pub host: String,
    pub pid: i32,
    pub concurrency: i32,
    /// Queue name to dequeue priority weight.
    pub queues: BTreeMap<String, i32>,
    pub started: Timestamp,
    pub status: String,
    pub active_tasks: i32,
}

impl WorkerInfo {
    /// Unused task slots on this worker, never negative.
    pub fn idle_capacity(&self) -> i32 {
        (self.concurrency - self.active_tasks).max(0)
    }
}

/// Delay before retry attempt `retried + 1`: 1, 2, 4, 8 ... minutes.
pub fn retry_delay(retried: i32) -> Duration {
    let exponent = retried.clamp(0, MAX_BACKOFF_EXPONENT) as u32;
    Duration::from_secs(60 * (1u64 << exponent))
}

/// Default queue lanes a worker serves, with their priority weights.
pub fn default_queue_weights(primary: &str) -> BTreeMap<String, i32> {
    let mut queues = BTreeMap::new();
    queues.insert(primary.to_string(), DEFAULT_QUEUE_WEIGHT);
    queues.insert(CRITICAL_QUEUE.to_string(), CRITICAL_QUEUE_WEIGHT);
    queues
}
