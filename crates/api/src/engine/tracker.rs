//! In-memory record of when each in-flight task was last referenced by a
//! client.
//!
//! A task is tracked from the moment it is admitted until the gateway sees
//! it finish, get cancelled, or disappear. Entries are a liveness heuristic
//! only; the sweep in [`crate::background::abandonment`] always re-reads the
//! real task state before acting on one.
//!
//! All entries live behind one reader/writer lock. Task volume is a handful
//! of concurrent generations, so a sharded map is not worth it; revisit if
//! admission limits are raised by orders of magnitude.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use kbtools_core::types::TaskId;
use tokio::time::Instant;

pub struct AbandonmentTracker {
    timeout: Duration,
    last_access: RwLock<HashMap<TaskId, Instant>>,
}

impl AbandonmentTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_access: RwLock::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a client reference to `task_id`, starting tracking if needed.
    pub fn touch(&self, task_id: &str) {
        self.write().insert(task_id.to_string(), Instant::now());
    }

    /// Stop tracking `task_id`. Returns whether it was tracked.
    pub fn remove(&self, task_id: &str) -> bool {
        self.write().remove(task_id).is_some()
    }

    /// IDs not referenced for longer than the timeout.
    pub fn list_abandoned(&self) -> Vec<TaskId> {
        let now = Instant::now();
        self.read()
            .iter()
            .filter(|(_, last)| now.duration_since(**last) > self.timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.read().contains_key(task_id)
    }

    // The map holds plain timestamps, so a writer that panicked cannot leave
    // it half-updated.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, Instant>> {
        self.last_access.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, Instant>> {
        self.last_access.write().unwrap_or_else(PoisonError::into_inner)
    }
}
