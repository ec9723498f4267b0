use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use chrono::SecondsFormat;
use kbtools_core::task::WorkerInfo;
use serde::Serialize;

use crate::error::AppResult;
use crate::state::AppState;

/// Capacity summary over every live worker process.
#[derive(Debug, Serialize)]
pub struct WorkersResponse {
    pub worker_processes: usize,
    /// Sum of all workers' concurrency.
    pub total_capacity: i32,
    pub active_tasks: i32,
    pub idle_capacity: i32,
    pub workers: Vec<WorkerDetail>,
}

#[derive(Debug, Serialize)]
pub struct WorkerDetail {
    pub id: String,
    pub host: String,
    pub pid: i32,
    pub concurrency: i32,
    /// RFC 3339 start time.
    pub started: String,
    pub status: String,
    pub active_tasks: i32,
    pub idle_capacity: i32,
    pub queues: BTreeMap<String, i32>,
}

impl From<WorkerInfo> for WorkerDetail {
    fn from(worker: WorkerInfo) -> Self {
        Self {
            idle_capacity: worker.idle_capacity(),
            started: worker.started.to_rfc3339_opts(SecondsFormat::Secs, true),
            id: worker.id,
            host: worker.host,
            pid: worker.pid,
            concurrency: worker.concurrency,
            status: worker.status,
            active_tasks: worker.active_tasks,
            queues: worker.queues,
        }
    }
}

impl WorkersResponse {
    pub fn from_workers(workers: Vec<WorkerInfo>) -> Self {
        let total_capacity = workers.iter().map(|w| w.concurrency).sum();
        let active_tasks = workers.iter().map(|w| w.active_tasks).sum();
        let idle_capacity = workers.iter().map(WorkerInfo::idle_capacity).sum();

        Self {
            worker_processes: workers.len(),
            total_capacity,
            active_tasks,
            idle_capacity,
            workers: workers.into_iter().map(WorkerDetail::from).collect(),
        }
    }
}

/// GET /api/workers
pub async fn list_workers(State(state): State<AppState>) -> AppResult<Json<WorkersResponse>> {
    let workers = state.queue.list_workers().await?;
    Ok(Json(WorkersResponse::from_workers(workers)))
}
