//! PostgreSQL queue backend.
//!
//! Tasks live in `queue_tasks`, worker servers in `queue_servers`. Claims
//! use `FOR UPDATE SKIP LOCKED` so any number of workers can poll the same
//! queue without double-dispatch.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use kbtools_core::task::{
    retry_delay, EnqueueOptions, QueueInfo, TaskInfo, TaskState, WorkerInfo,
};
use kbtools_core::types::Timestamp;

use crate::backend::{
    FailOutcome, TaskBroker, TaskQueue, DEFAULT_LEASE_GRACE, SERVER_LIVENESS_WINDOW,
};
use crate::error::QueueError;

/// Column list for `queue_tasks` queries.
const COLUMNS: &str = "\
    id, queue, task_type, payload, state, max_retry, retried, \
    last_error, last_failed_at, timeout_secs, retention_secs, result, \
    process_at, completed_at, created_at";

/// Server rows older than this are deleted by the janitor.
const STALE_SERVER_SECS: i64 = 60 * 60;

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: String,
    queue: String,
    task_type: String,
    payload: Vec<u8>,
    state: String,
    max_retry: i32,
    retried: i32,
    last_error: Option<String>,
    last_failed_at: Option<Timestamp>,
    timeout_secs: i64,
    retention_secs: i64,
    result: Option<Vec<u8>>,
    process_at: Timestamp,
    completed_at: Option<Timestamp>,
    created_at: Timestamp,
}

impl From<TaskRow> for TaskInfo {
    fn from(row: TaskRow) -> Self {
        TaskInfo {
            id: row.id,
            queue: row.queue,
            task_type: row.task_type,
            payload: row.payload,
            state: TaskState::from_name(&row.state),
            max_retry: row.max_retry,
            retried: row.retried,
            last_error: row.last_error,
            last_failed_at: row.last_failed_at,
            timeout: Duration::from_secs(row.timeout_secs.max(0) as u64),
            retention: Duration::from_secs(row.retention_secs.max(0) as u64),
            result: row.result,
            next_process_at: row.process_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ServerRow {
    id: String,
    host: String,
    pid: i32,
    concurrency: i32,
    queues: Json<BTreeMap<String, i32>>,
    status: String,
    started_at: Timestamp,
    active_tasks: i64,
}

impl From<ServerRow> for WorkerInfo {
    fn from(row: ServerRow) -> Self {
        WorkerInfo {
            id: row.id,
            host: row.host,
            pid: row.pid,
            concurrency: row.concurrency,
            queues: row.queues.0,
            started: row.started_at,
            status: row.status,
            active_tasks: i32::try_from(row.active_tasks).unwrap_or(i32::MAX),
        }
    }
}

/// Queue backend over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    lease_grace: Duration,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_grace: DEFAULT_LEASE_GRACE,
        }
    }

    pub fn with_lease_grace(mut self, grace: Duration) -> Self {
        self.lease_grace = grace;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn run_migrations(&self) -> Result<(), QueueError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn find(&self, queue: &str, task_id: &str, archived: bool) -> Result<TaskInfo, QueueError> {
        let filter = if archived { "=" } else { "<>" };
        let query = format!(
            "SELECT {COLUMNS} FROM queue_tasks \
             WHERE id = $1 AND queue = $2 AND state {filter} 'archived'"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(task_id)
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?
            .map(TaskInfo::from)
            .ok_or_else(|| QueueError::TaskNotFound(task_id.to_string()))
    }
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

#[async_trait]
impl TaskQueue for PgQueue {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: Vec<u8>,
        opts: &EnqueueOptions,
    ) -> Result<TaskInfo, QueueError> {
        let query = format!(
            "INSERT INTO queue_tasks \
                 (id, queue, task_type, payload, state, max_retry, timeout_secs, retention_secs) \
             VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&opts.queue)
            .bind(task_type)
            .bind(payload)
            .bind(opts.max_retry)
            .bind(secs(opts.timeout))
            .bind(secs(opts.retention))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn queue_info(&self, queue: &str) -> Result<QueueInfo, QueueError> {
        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT state, COUNT(*) FROM queue_tasks WHERE queue = $1 GROUP BY state",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        if counts.is_empty() {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        }

        let mut info = QueueInfo {
            queue: queue.to_string(),
            ..QueueInfo::default()
        };
        for (state, count) in counts {
            match TaskState::from_name(&state) {
                TaskState::Pending => info.pending = count,
                TaskState::Active => info.active = count,
                TaskState::Retry => info.retry = count,
                TaskState::Completed => info.completed = count,
                TaskState::Archived => info.archived = count,
                TaskState::Unknown => {}
            }
        }
        Ok(info)
    }

    async fn inspect(&self, queue: &str, task_id: &str) -> Result<TaskInfo, QueueError> {
        self.find(queue, task_id, false).await
    }

    async fn inspect_archived(&self, queue: &str, task_id: &str) -> Result<TaskInfo, QueueError> {
        self.find(queue, task_id, true).await
    }

    async fn cancel(&self, queue: &str, task_id: &str) -> Result<(), QueueError> {
        let deleted = sqlx::query(
            "DELETE FROM queue_tasks \
             WHERE id = $1 AND queue = $2 AND state IN ('pending', 'retry')",
        )
        .bind(task_id)
        .bind(queue)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if deleted > 0 {
            return Ok(());
        }

        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM queue_tasks WHERE id = $1 AND queue = $2")
                .bind(task_id)
                .bind(queue)
                .fetch_optional(&self.pool)
                .await?;
        match state {
            Some(state) => Err(QueueError::NotCancellable {
                id: task_id.to_string(),
                state: TaskState::from_name(&state),
            }),
            None => Err(QueueError::TaskNotFound(task_id.to_string())),
        }
    }

    async fn list_workers(&self) -> Result<Vec<WorkerInfo>, QueueError> {
        let rows = sqlx::query_as::<_, ServerRow>(
            "SELECT s.id, s.host, s.pid, s.concurrency, s.queues, s.status, s.started_at, \
                    (SELECT COUNT(*) FROM queue_tasks t \
                     WHERE t.state = 'active' AND t.lease_owner = s.id) AS active_tasks \
             FROM queue_servers s \
             WHERE s.last_heartbeat_at > NOW() - $1 * INTERVAL '1 second' \
             ORDER BY s.started_at ASC",
        )
        .bind(secs(SERVER_LIVENESS_WINDOW))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(WorkerInfo::from).collect())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskBroker for PgQueue {
    async fn heartbeat(&self, server: &WorkerInfo) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO queue_servers \
                 (id, host, pid, concurrency, queues, status, started_at, last_heartbeat_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
             ON CONFLICT (id) DO UPDATE \
             SET status = EXCLUDED.status, queues = EXCLUDED.queues, last_heartbeat_at = NOW()",
        )
        .bind(&server.id)
        .bind(&server.host)
        .bind(server.pid)
        .bind(server.concurrency)
        .bind(Json(&server.queues))
        .bind(&server.status)
        .bind(server.started)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deregister(&self, server_id: &str) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM queue_servers WHERE id = $1")
            .bind(server_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn dequeue(
        &self,
        server_id: &str,
        queues: &[String],
    ) -> Result<Option<TaskInfo>, QueueError> {
        let query = format!(
            "UPDATE queue_tasks \
             SET state = 'active', lease_owner = $2, \
                 lease_expires_at = NOW() + (timeout_secs + $3) * INTERVAL '1 second' \
             WHERE id = ( \
                 SELECT id FROM queue_tasks \
                 WHERE queue = ANY($1) \
                   AND (state = 'pending' OR (state = 'retry' AND process_at <= NOW())) \
                 ORDER BY array_position($1, queue), process_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(queues)
            .bind(server_id)
            .bind(secs(self.lease_grace))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(TaskInfo::from))
    }

    async fn write_result(&self, task_id: &str, data: &[u8]) -> Result<(), QueueError> {
        let updated = sqlx::query("UPDATE queue_tasks SET result = $2 WHERE id = $1")
            .bind(task_id)
            .bind(data)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(QueueError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn complete(&self, task_id: &str) -> Result<(), QueueError> {
        let updated = sqlx::query(
            "UPDATE queue_tasks \
             SET state = 'completed', completed_at = NOW(), \
                 lease_owner = NULL, lease_expires_at = NULL \
             WHERE id = $1 AND state = 'active'",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(QueueError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn fail(
        &self,
        task_id: &str,
        error: &str,
        retriable: bool,
    ) -> Result<FailOutcome, QueueError> {
        let mut tx = self.pool.begin().await?;

        let counters: Option<(i32, i32)> = sqlx::query_as(
            "SELECT retried, max_retry FROM queue_tasks \
             WHERE id = $1 AND state = 'active' FOR UPDATE",
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((retried, max_retry)) = counters else {
            return Err(QueueError::TaskNotFound(task_id.to_string()));
        };

        let outcome = if retriable && retried < max_retry {
            sqlx::query(
                "UPDATE queue_tasks \
                 SET state = 'retry', retried = retried + 1, \
                     last_error = $2, last_failed_at = NOW(), \
                     process_at = NOW() + $3 * INTERVAL '1 second', \
                     lease_owner = NULL, lease_expires_at = NULL \
                 WHERE id = $1",
            )
            .bind(task_id)
            .bind(error)
            .bind(secs(retry_delay(retried)))
            .execute(&mut *tx)
            .await?;
            FailOutcome::Retry
        } else {
            sqlx::query(
                "UPDATE queue_tasks \
                 SET state = 'archived', last_error = $2, last_failed_at = NOW(), \
                     completed_at = NOW(), lease_owner = NULL, lease_expires_at = NULL \
                 WHERE id = $1",
            )
            .bind(task_id)
            .bind(error)
            .execute(&mut *tx)
            .await?;
            FailOutcome::Archived
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn requeue(&self, task_id: &str) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE queue_tasks \
             SET state = 'pending', process_at = NOW(), \
                 lease_owner = NULL, lease_expires_at = NULL \
             WHERE id = $1 AND state = 'active'",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recover_expired_leases(&self) -> Result<u64, QueueError> {
        let recovered = sqlx::query(
            "UPDATE queue_tasks \
             SET state = CASE WHEN retried < max_retry THEN 'retry' ELSE 'archived' END, \
                 retried = CASE WHEN retried < max_retry THEN retried + 1 ELSE retried END, \
                 last_error = $1, last_failed_at = NOW(), \
                 process_at = NOW() + 60 * POWER(2, LEAST(retried, 16)) * INTERVAL '1 second', \
                 completed_at = CASE WHEN retried < max_retry THEN NULL ELSE NOW() END, \
                 lease_owner = NULL, lease_expires_at = NULL \
             WHERE state = 'active' AND lease_expires_at <= NOW()",
        )
        .bind("task lease expired: worker stopped responding")
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(recovered)
    }

    async fn purge_expired(&self) -> Result<u64, QueueError> {
        let purged = sqlx::query(
            "DELETE FROM queue_tasks \
             WHERE state IN ('completed', 'archived') \
               AND completed_at + retention_secs * INTERVAL '1 second' < NOW()",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        sqlx::query(
            "DELETE FROM queue_servers \
             WHERE last_heartbeat_at < NOW() - $1 * INTERVAL '1 second'",
        )
        .bind(STALE_SERVER_SECS)
        .execute(&self.pool)
        .await?;

        Ok(purged)
    }
}
