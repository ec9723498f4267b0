//! In-process queue backend.
//!
//! Same semantics as [`crate::PgQueue`], held in a mutex. Used by tests
//! and for running the gateway and a worker in one process during local
//! development.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use kbtools_core::task::{
    retry_delay, EnqueueOptions, QueueInfo, TaskInfo, TaskState, WorkerInfo,
};
use kbtools_core::types::Timestamp;

use crate::backend::{
    FailOutcome, TaskBroker, TaskQueue, DEFAULT_LEASE_GRACE, SERVER_LIVENESS_WINDOW,
};
use crate::error::QueueError;

struct Lease {
    owner: String,
    expires_at: Timestamp,
}

struct Entry {
    info: TaskInfo,
    lease: Option<Lease>,
}

struct Server {
    info: WorkerInfo,
    last_heartbeat: Timestamp,
}

#[derive(Default)]
struct State {
    tasks: HashMap<String, Entry>,
    servers: HashMap<String, Server>,
    known_queues: HashSet<String>,
}

/// Queue backend held entirely in memory.
pub struct MemoryQueue {
    state: Mutex<State>,
    lease_grace: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            lease_grace: DEFAULT_LEASE_GRACE,
        }
    }

    pub fn with_lease_grace(mut self, grace: Duration) -> Self {
        self.lease_grace = grace;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Force a task into `state`, bypassing the normal transitions.
    /// Returns `false` when the task does not exist.
    pub fn set_state(&self, task_id: &str, state: TaskState) -> bool {
        let mut guard = self.lock();
        match guard.tasks.get_mut(task_id) {
            Some(entry) => {
                entry.info.state = state;
                if state != TaskState::Active {
                    entry.lease = None;
                }
                if state.is_terminal() && entry.info.completed_at.is_none() {
                    entry.info.completed_at = Some(Utc::now());
                }
                if state == TaskState::Retry || state == TaskState::Pending {
                    entry.info.next_process_at = Utc::now();
                }
                true
            }
            None => false,
        }
    }

    /// Overwrite a task's last error. Returns `false` when the task does
    /// not exist.
    pub fn set_last_error(&self, task_id: &str, error: Option<&str>) -> bool {
        let mut guard = self.lock();
        match guard.tasks.get_mut(task_id) {
            Some(entry) => {
                entry.info.last_error = error.map(str::to_string);
                true
            }
            None => false,
        }
    }

    /// Snapshot of any task regardless of state.
    pub fn get(&self, task_id: &str) -> Option<TaskInfo> {
        self.lock().tasks.get(task_id).map(|e| e.info.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl State {
    fn find(&self, queue: &str, task_id: &str) -> Option<&Entry> {
        self.tasks.get(task_id).filter(|e| e.info.queue == queue)
    }

    fn active_mut(&mut self, task_id: &str) -> Result<&mut Entry, QueueError> {
        self.tasks
            .get_mut(task_id)
            .filter(|e| e.info.state == TaskState::Active)
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))
    }
}

/// Apply a failure to an entry and report where it went.
fn settle_failure(entry: &mut Entry, error: &str, retriable: bool, now: Timestamp) -> FailOutcome {
    let info = &mut entry.info;
    entry.lease = None;
    info.last_error = Some(error.to_string());
    info.last_failed_at = Some(now);

    if retriable && info.retried < info.max_retry {
        info.next_process_at = now + chrono_duration(retry_delay(info.retried));
        info.retried += 1;
        info.state = TaskState::Retry;
        FailOutcome::Retry
    } else {
        info.state = TaskState::Archived;
        info.completed_at = Some(now);
        FailOutcome::Archived
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: Vec<u8>,
        opts: &EnqueueOptions,
    ) -> Result<TaskInfo, QueueError> {
        let now = Utc::now();
        let info = TaskInfo {
            id: uuid::Uuid::new_v4().to_string(),
            queue: opts.queue.clone(),
            task_type: task_type.to_string(),
            payload,
            state: TaskState::Pending,
            max_retry: opts.max_retry,
            retried: 0,
            last_error: None,
            last_failed_at: None,
            timeout: opts.timeout,
            retention: opts.retention,
            result: None,
            next_process_at: now,
            completed_at: None,
            created_at: now,
        };

        let mut guard = self.lock();
        guard.known_queues.insert(opts.queue.clone());
        guard.tasks.insert(
            info.id.clone(),
            Entry {
                info: info.clone(),
                lease: None,
            },
        );
        Ok(info)
    }

    async fn queue_info(&self, queue: &str) -> Result<QueueInfo, QueueError> {
        let guard = self.lock();
        if !guard.known_queues.contains(queue) {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        }

        let mut info = QueueInfo {
            queue: queue.to_string(),
            ..QueueInfo::default()
        };
        for entry in guard.tasks.values().filter(|e| e.info.queue == queue) {
            match entry.info.state {
                TaskState::Pending => info.pending += 1,
                TaskState::Active => info.active += 1,
                TaskState::Retry => info.retry += 1,
                TaskState::Completed => info.completed += 1,
                TaskState::Archived => info.archived += 1,
                TaskState::Unknown => {}
            }
        }
        Ok(info)
    }

    async fn inspect(&self, queue: &str, task_id: &str) -> Result<TaskInfo, QueueError> {
        self.lock()
            .find(queue, task_id)
            .filter(|e| e.info.state != TaskState::Archived)
            .map(|e| e.info.clone())
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))
    }

    async fn inspect_archived(&self, queue: &str, task_id: &str) -> Result<TaskInfo, QueueError> {
        self.lock()
            .find(queue, task_id)
            .filter(|e| e.info.state == TaskState::Archived)
            .map(|e| e.info.clone())
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))
    }

    async fn cancel(&self, queue: &str, task_id: &str) -> Result<(), QueueError> {
        let mut guard = self.lock();
        let state = guard
            .find(queue, task_id)
            .map(|e| e.info.state)
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;

        match state {
            TaskState::Pending | TaskState::Retry => {
                guard.tasks.remove(task_id);
                Ok(())
            }
            state => Err(QueueError::NotCancellable {
                id: task_id.to_string(),
                state,
            }),
        }
    }

    async fn list_workers(&self) -> Result<Vec<WorkerInfo>, QueueError> {
        let guard = self.lock();
        let cutoff = Utc::now() - chrono_duration(SERVER_LIVENESS_WINDOW);

        let mut active_by_owner: HashMap<&str, i32> = HashMap::new();
        for lease in guard.tasks.values().filter_map(|e| e.lease.as_ref()) {
            *active_by_owner.entry(lease.owner.as_str()).or_default() += 1;
        }

        let mut workers: Vec<WorkerInfo> = guard
            .servers
            .values()
            .filter(|s| s.last_heartbeat > cutoff)
            .map(|s| WorkerInfo {
                active_tasks: active_by_owner
                    .get(s.info.id.as_str())
                    .copied()
                    .unwrap_or(0),
                ..s.info.clone()
            })
            .collect();
        workers.sort_by(|a, b| a.started.cmp(&b.started).then_with(|| a.id.cmp(&b.id)));
        Ok(workers)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[async_trait]
impl TaskBroker for MemoryQueue {
    async fn heartbeat(&self, server: &WorkerInfo) -> Result<(), QueueError> {
        let mut guard = self.lock();
        for queue in server.queues.keys() {
            guard.known_queues.insert(queue.clone());
        }
        guard.servers.insert(
            server.id.clone(),
            Server {
                info: server.clone(),
                last_heartbeat: Utc::now(),
            },
        );
        Ok(())
    }

    async fn deregister(&self, server_id: &str) -> Result<(), QueueError> {
        self.lock().servers.remove(server_id);
        Ok(())
    }

    async fn dequeue(
        &self,
        server_id: &str,
        queues: &[String],
    ) -> Result<Option<TaskInfo>, QueueError> {
        let now = Utc::now();
        let mut guard = self.lock();

        for queue in queues {
            let next = guard
                .tasks
                .values()
                .filter(|e| &e.info.queue == queue)
                .filter(|e| match e.info.state {
                    TaskState::Pending => true,
                    TaskState::Retry => e.info.next_process_at <= now,
                    _ => false,
                })
                .min_by(|a, b| {
                    a.info
                        .next_process_at
                        .cmp(&b.info.next_process_at)
                        .then_with(|| a.info.created_at.cmp(&b.info.created_at))
                })
                .map(|e| e.info.id.clone());

            if let Some(id) = next {
                if let Some(entry) = guard.tasks.get_mut(&id) {
                    entry.info.state = TaskState::Active;
                    entry.lease = Some(Lease {
                        owner: server_id.to_string(),
                        expires_at: now + chrono_duration(entry.info.timeout + self.lease_grace),
                    });
                    return Ok(Some(entry.info.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn write_result(&self, task_id: &str, data: &[u8]) -> Result<(), QueueError> {
        let mut guard = self.lock();
        let entry = guard
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))?;
        entry.info.result = Some(data.to_vec());
        Ok(())
    }

    async fn complete(&self, task_id: &str) -> Result<(), QueueError> {
        let mut guard = self.lock();
        let entry = guard.active_mut(task_id)?;
        entry.lease = None;
        entry.info.state = TaskState::Completed;
        entry.info.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(
        &self,
        task_id: &str,
        error: &str,
        retriable: bool,
    ) -> Result<FailOutcome, QueueError> {
        let mut guard = self.lock();
        let entry = guard.active_mut(task_id)?;
        Ok(settle_failure(entry, error, retriable, Utc::now()))
    }

    async fn requeue(&self, task_id: &str) -> Result<(), QueueError> {
        let mut guard = self.lock();
        if let Ok(entry) = guard.active_mut(task_id) {
            entry.lease = None;
            entry.info.state = TaskState::Pending;
            entry.info.next_process_at = Utc::now();
        }
        Ok(())
    }

    async fn recover_expired_leases(&self) -> Result<u64, QueueError> {
        let now = Utc::now();
        let mut guard = self.lock();
        let mut recovered = 0;
        for entry in guard.tasks.values_mut() {
            let expired = entry.info.state == TaskState::Active
                && entry.lease.as_ref().is_some_and(|l| l.expires_at <= now);
            if expired {
                settle_failure(entry, "task lease expired: worker stopped responding", true, now);
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn purge_expired(&self) -> Result<u64, QueueError> {
        let now = Utc::now();
        let mut guard = self.lock();
        let before = guard.tasks.len();
        guard.tasks.retain(|_, e| match e.info.completed_at {
            Some(done) if e.info.state.is_terminal() => {
                done + chrono_duration(e.info.retention) >= now
            }
            _ => true,
        });
        Ok((before - guard.tasks.len()) as u64)
    }
}
