//! Periodic cancellation of tasks nobody is polling any more.
//!
//! Every `interval` the sweep asks the [`AbandonmentTracker`] for tasks idle
//! past its timeout and re-reads each one from the queue before acting:
//!
//! | observed state | action |
//! |---|---|
//! | missing from both views | stop tracking |
//! | pending or retry | cancel in the queue, stop tracking |
//! | active | leave alone, the hard timeout bounds it |
//! | completed or archived | stop tracking |
//! | anything else | log, stop tracking |

use std::sync::Arc;
use std::time::Duration;

use kbtools_core::task::TaskState;
use kbtools_queue::{QueueError, TaskQueue};
use tokio_util::sync::CancellationToken;

use crate::engine::lifecycle::find_task;
use crate::engine::tracker::AbandonmentTracker;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub cancelled: usize,
    pub released: usize,
    pub still_running: usize,
    pub failed: usize,
}

/// Run the abandonment sweep until `cancel` is triggered.
pub async fn run(
    queue: Arc<dyn TaskQueue>,
    queue_name: Arc<str>,
    tracker: Arc<AbandonmentTracker>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        timeout_secs = tracker.timeout().as_secs(),
        interval_secs = interval.as_secs(),
        "Abandonment sweep started"
    );

    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; nothing can be abandoned yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Abandonment sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                sweep_once(&*queue, &queue_name, &tracker).await;
            }
        }
    }
}

/// Check every abandoned task once.
pub async fn sweep_once(
    queue: &dyn TaskQueue,
    queue_name: &str,
    tracker: &AbandonmentTracker,
) -> SweepSummary {
    let abandoned = tracker.list_abandoned();
    let mut summary = SweepSummary::default();

    if abandoned.is_empty() {
        tracing::debug!(tracked = tracker.count(), "Abandonment sweep: nothing abandoned");
        return summary;
    }
    tracing::info!(count = abandoned.len(), "Abandonment sweep: found idle tasks");

    for task_id in abandoned {
        let info = match find_task(queue, queue_name, &task_id).await {
            Ok(info) => info,
            Err(e) => {
                // Keep the entry; the next sweep retries the lookup.
                tracing::error!(task_id = %task_id, error = %e, "Abandonment sweep: lookup failed");
                summary.failed += 1;
                continue;
            }
        };

        let Some(info) = info else {
            tracing::info!(task_id = %task_id, "Abandoned task no longer exists");
            tracker.remove(&task_id);
            summary.released += 1;
            continue;
        };

        match info.state {
            TaskState::Pending | TaskState::Retry => {
                match queue.cancel(queue_name, &task_id).await {
                    Ok(()) => {
                        tracing::info!(task_id = %task_id, state = %info.state, "Cancelled abandoned task");
                        summary.cancelled += 1;
                    }
                    // Claimed by a worker or removed between lookup and cancel.
                    Err(e @ (QueueError::NotCancellable { .. } | QueueError::TaskNotFound(_))) => {
                        tracing::info!(task_id = %task_id, reason = %e, "Abandoned task moved on before cancel");
                        summary.released += 1;
                    }
                    Err(e) => {
                        tracing::error!(task_id = %task_id, error = %e, "Failed to cancel abandoned task");
                        summary.failed += 1;
                    }
                }
                tracker.remove(&task_id);
            }
            TaskState::Active => {
                tracing::info!(task_id = %task_id, "Abandoned task is running, leaving it to its timeout");
                summary.still_running += 1;
            }
            TaskState::Completed | TaskState::Archived => {
                tracing::debug!(task_id = %task_id, state = %info.state, "Abandoned task already finished");
                tracker.remove(&task_id);
                summary.released += 1;
            }
            TaskState::Unknown => {
                tracing::warn!(task_id = %task_id, "Abandoned task in unexpected state, dropping it");
                tracker.remove(&task_id);
                summary.released += 1;
            }
        }
    }

    summary
}
