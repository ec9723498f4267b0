use std::time::Duration;

use kbtools_core::env::{parse_or, var_or};
use kbtools_core::task::DEFAULT_QUEUE;

/// Worker process settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Primary queue; the `critical` lane is always served alongside it.
    pub queue_name: String,
    /// Maximum concurrent task executions.
    pub concurrency: usize,
    /// Sleep between dequeue attempts when every lane is empty.
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// How often expired leases are recovered.
    pub recover_interval: Duration,
    /// How often finished tasks past retention are purged.
    pub janitor_interval: Duration,
    /// Grace period for in-flight tasks on shutdown before they are
    /// handed back to the queue.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE.to_string(),
            concurrency: 10,
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(5),
            recover_interval: Duration::from_secs(60),
            janitor_interval: Duration::from_secs(8),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    /// Load from environment variables.
    ///
    /// | Env var                 | Default |
    /// |-------------------------|---------|
    /// | `QUEUE_NAME`            | `kicad` |
    /// | `WORKER_CONCURRENCY`    | `10`    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `10`    |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let concurrency: usize = parse_or("WORKER_CONCURRENCY", defaults.concurrency);
        Self {
            queue_name: var_or("QUEUE_NAME", DEFAULT_QUEUE),
            concurrency: concurrency.max(1),
            shutdown_timeout: Duration::from_secs(parse_or("SHUTDOWN_TIMEOUT_SECS", 10)),
            ..defaults
        }
    }
}
