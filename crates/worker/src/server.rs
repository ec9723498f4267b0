//! Worker server: the dequeue loop plus its maintenance loops.
//!
//! At most `concurrency` tasks execute at once. Alongside the dequeue loop
//! the server keeps its roster entry alive, recovers tasks whose lease
//! expired on a crashed worker and purges finished tasks past retention.
//!
//! On shutdown the server stops claiming, gives in-flight tasks the grace
//! period to finish, then hands anything still running back to the queue
//! and removes itself from the roster.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kbtools_core::task::{default_queue_weights, TaskInfo, WorkerInfo};
use kbtools_queue::{QueueError, TaskBroker};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::WorkerConfig;
use crate::lanes;
use crate::processor::TaskProcessor;

/// Roster status while the server accepts work.
pub const STATUS_ACTIVE: &str = "active";

pub struct WorkerServer {
    config: WorkerConfig,
    broker: Arc<dyn TaskBroker>,
    processor: Arc<TaskProcessor>,
    identity: WorkerInfo,
}

impl WorkerServer {
    pub fn new(config: WorkerConfig, broker: Arc<dyn TaskBroker>, processor: TaskProcessor) -> Self {
        let identity = WorkerInfo {
            id: uuid::Uuid::new_v4().to_string(),
            host: hostname(),
            pid: i32::try_from(std::process::id()).unwrap_or(i32::MAX),
            concurrency: i32::try_from(config.concurrency).unwrap_or(i32::MAX),
            queues: default_queue_weights(&config.queue_name),
            started: Utc::now(),
            status: STATUS_ACTIVE.to_string(),
            active_tasks: 0,
        };
        Self {
            config,
            broker,
            processor: Arc::new(processor),
            identity,
        }
    }

    /// Roster entry this server reports in its heartbeats.
    pub fn identity(&self) -> &WorkerInfo {
        &self.identity
    }

    /// Serve tasks until `shutdown` is cancelled.
    ///
    /// Fails only if the initial registration with the backend fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), QueueError> {
        self.broker.heartbeat(&self.identity).await?;
        tracing::info!(
            server_id = %self.identity.id,
            host = %self.identity.host,
            concurrency = self.config.concurrency,
            queues = ?self.identity.queues,
            "Worker server started"
        );

        let maintenance = CancellationToken::new();
        let background = TaskTracker::new();
        self.spawn_maintenance(&background, &maintenance);

        let abort = CancellationToken::new();
        let executions = TaskTracker::new();
        let slots = Arc::new(Semaphore::new(self.config.concurrency));

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let lanes = lanes::ordered(&self.identity.queues, &mut rand::rng());
            match self.broker.dequeue(&self.identity.id, &lanes).await {
                Ok(Some(task)) => {
                    executions.spawn(execute(
                        self.broker.clone(),
                        self.processor.clone(),
                        task,
                        permit,
                        abort.clone(),
                    ));
                    continue;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Dequeue failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!(in_flight = executions.len(), "Worker server stopping");
        executions.close();
        if tokio::time::timeout(self.config.shutdown_timeout, executions.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                in_flight = executions.len(),
                "Shutdown grace period expired, returning running tasks to the queue"
            );
            abort.cancel();
            executions.wait().await;
        }

        maintenance.cancel();
        background.close();
        background.wait().await;

        if let Err(e) = self.broker.deregister(&self.identity.id).await {
            tracing::warn!(error = %e, "Failed to deregister worker server");
        }
        tracing::info!("Worker server stopped");
        Ok(())
    }

    fn spawn_maintenance(&self, tracker: &TaskTracker, cancel: &CancellationToken) {
        let broker = self.broker.clone();
        let identity = self.identity.clone();
        tracker.spawn(every(
            "heartbeat",
            self.config.heartbeat_interval,
            cancel.clone(),
            move || {
                let broker = broker.clone();
                let identity = identity.clone();
                async move {
                    if let Err(e) = broker.heartbeat(&identity).await {
                        tracing::warn!(error = %e, "Heartbeat failed");
                    }
                }
            },
        ));

        let broker = self.broker.clone();
        tracker.spawn(every(
            "lease recoverer",
            self.config.recover_interval,
            cancel.clone(),
            move || {
                let broker = broker.clone();
                async move {
                    match broker.recover_expired_leases().await {
                        Ok(0) => {}
                        Ok(recovered) => {
                            tracing::warn!(recovered, "Recovered tasks with expired leases")
                        }
                        Err(e) => tracing::error!(error = %e, "Lease recovery failed"),
                    }
                }
            },
        ));

        let broker = self.broker.clone();
        tracker.spawn(every(
            "janitor",
            self.config.janitor_interval,
            cancel.clone(),
            move || {
                let broker = broker.clone();
                async move {
                    match broker.purge_expired().await {
                        Ok(0) => tracing::trace!("Janitor: nothing to purge"),
                        Ok(purged) => tracing::debug!(purged, "Janitor: purged finished tasks"),
                        Err(e) => tracing::error!(error = %e, "Janitor: purge failed"),
                    }
                }
            },
        ));
    }
}

/// Run `job` every `period` until `cancel` fires.
async fn every<F, Fut>(name: &'static str, period: Duration, cancel: CancellationToken, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(loop_name = name, period_ms = period.as_millis() as u64, "Maintenance loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => job().await,
        }
    }
    tracing::debug!(loop_name = name, "Maintenance loop stopped");
}

/// Execute one claimed task and settle it with the backend.
async fn execute(
    broker: Arc<dyn TaskBroker>,
    processor: Arc<TaskProcessor>,
    task: TaskInfo,
    _permit: OwnedSemaphorePermit,
    abort: CancellationToken,
) {
    let task_id = task.id.as_str();
    tracing::info!(task_id, queue = %task.queue, attempt = task.retried + 1, "Task started");

    let outcome = tokio::select! {
        _ = abort.cancelled() => None,
        result = tokio::time::timeout(task.timeout, processor.handle(&task)) => Some(result),
    };

    let settled = match outcome {
        None => {
            tracing::warn!(task_id, "Task interrupted by shutdown, returning it to the queue");
            broker.requeue(task_id).await
        }
        Some(Ok(Ok(()))) => broker.complete(task_id).await,
        Some(Ok(Err(e))) => broker
            .fail(task_id, &e.to_string(), e.is_retriable())
            .await
            .map(|outcome| {
                tracing::info!(task_id, error = %e, next_state = %outcome.state(), "Task failed");
            }),
        Some(Err(_)) => {
            let message = format!("task timed out after {}s", task.timeout.as_secs());
            tracing::warn!(task_id, "Task exceeded its timeout");
            broker.fail(task_id, &message, true).await.map(|_| ())
        }
    };

    if let Err(e) = settled {
        tracing::error!(task_id, error = %e, "Failed to record task outcome");
    }
}

/// Host name of this machine, or `"unknown"`.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: `buf` is valid for writes of `buf.len()` bytes and
    // gethostname writes at most that many.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "unknown".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use kbtools_core::task::{EnqueueOptions, TaskState, TASK_TYPE_GENERATE_KICAD};
    use kbtools_queue::{MemoryQueue, TaskQueue};
    use serde_json::json;

    use super::*;
    use crate::testing::{FakeGenerator, FakeStore, Outcome};

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(20),
            recover_interval: Duration::from_millis(50),
            janitor_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_millis(100),
            ..WorkerConfig::default()
        }
    }

    fn server(queue: &Arc<MemoryQueue>, outcome: Outcome) -> WorkerServer {
        let processor = TaskProcessor::new(
            queue.clone(),
            Arc::new(FakeGenerator::new(outcome)),
            Arc::new(FakeStore::default()),
        );
        WorkerServer::new(fast_config(), queue.clone(), processor)
    }

    fn payload() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "layout": {"meta": {"name": "kb"}},
            "settings": {"switchFootprint": "MX:SW", "diodeFootprint": "D:D", "routing": "Full"}
        }))
        .unwrap()
    }

    async fn enqueue(queue: &MemoryQueue, payload: Vec<u8>, opts: EnqueueOptions) -> String {
        queue
            .enqueue(TASK_TYPE_GENERATE_KICAD, payload, &opts)
            .await
            .unwrap()
            .id
    }

    async fn wait_for_state(queue: &MemoryQueue, task_id: &str, state: TaskState) -> TaskInfo {
        for _ in 0..500 {
            if let Some(info) = queue.get(task_id) {
                if info.state == state {
                    return info;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reached {state}: {:?}", queue.get(task_id));
    }

    #[tokio::test]
    async fn completes_claimed_tasks() {
        let queue = Arc::new(MemoryQueue::new());
        let task_id = enqueue(&queue, payload(), EnqueueOptions::default()).await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server(&queue, Outcome::Succeed).run(shutdown.clone()));

        wait_for_state(&queue, &task_id, TaskState::Completed).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn registers_and_deregisters_in_roster() {
        let queue = Arc::new(MemoryQueue::new());
        let worker = server(&queue, Outcome::Succeed);
        let id = worker.identity().id.clone();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let roster = queue.list_workers().await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, id);
        assert_eq!(roster[0].concurrency, 2);
        assert_eq!(roster[0].queues.len(), 2);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert!(queue.list_workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_request_is_archived_without_retry() {
        let queue = Arc::new(MemoryQueue::new());
        let bad = serde_json::to_vec(&json!({"layout": {"meta": {}}})).unwrap();
        let task_id = enqueue(&queue, bad, EnqueueOptions::default()).await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server(&queue, Outcome::Succeed).run(shutdown.clone()));

        let info = wait_for_state(&queue, &task_id, TaskState::Archived).await;
        assert_eq!(info.retried, 0);
        assert!(info.failure().unwrap().contains("settings"));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn timed_out_task_is_retried() {
        let queue = Arc::new(MemoryQueue::new());
        let opts = EnqueueOptions {
            timeout: Duration::from_millis(50),
            ..EnqueueOptions::default()
        };
        let task_id = enqueue(&queue, payload(), opts).await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server(&queue, Outcome::Hang).run(shutdown.clone()));

        let info = wait_for_state(&queue, &task_id, TaskState::Retry).await;
        assert_eq!(info.retried, 1);
        assert!(info.failure().unwrap().contains("timed out"));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_requeues_tasks_past_grace_period() {
        let queue = Arc::new(MemoryQueue::new());
        let task_id = enqueue(&queue, payload(), EnqueueOptions::default()).await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server(&queue, Outcome::Hang).run(shutdown.clone()));

        wait_for_state(&queue, &task_id, TaskState::Active).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let info = queue.get(&task_id).unwrap();
        assert_eq!(info.state, TaskState::Pending);
        assert_eq!(info.retried, 0);
    }

    #[test]
    fn hostname_is_not_empty() {
        assert!(!hostname().is_empty());
    }
}
