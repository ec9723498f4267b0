//! Execution of a single `generate_kicad_project` task.
//!
//! Progress is written to the task's result slot at fixed checkpoints:
//!
//! | % | stage |
//! |---|-------|
//! | 0 | initializing |
//! | 10 | generating the KiCad project |
//! | 50 | uploading artifacts |
//! | 100 | done |
//!
//! A failure before upload that can never succeed (malformed payload,
//! invalid layout or settings) resets progress to 0% with the reason and is
//! archived without consuming a retry. Everything else is retried.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use kbtools_core::progress::ProgressReport;
use kbtools_core::request::TaskRequest;
use kbtools_core::task::TaskInfo;
use kbtools_pipeline::ProjectGenerator;
use kbtools_queue::TaskBroker;
use kbtools_storage::archive::zip_directory_blocking;
use kbtools_storage::{upload_project, ArtifactStore};

use crate::error::TaskError;

pub const MSG_INITIALIZING: &str = "Initializing task";
pub const MSG_GENERATING: &str = "Generating KiCad PCB files";
pub const MSG_UPLOADING: &str = "Uploading files to storage";
pub const MSG_COMPLETED: &str = "Task completed successfully";

/// Runs one task from payload to uploaded artifacts.
pub struct TaskProcessor {
    broker: Arc<dyn TaskBroker>,
    generator: Arc<dyn ProjectGenerator>,
    store: Arc<dyn ArtifactStore>,
}

impl TaskProcessor {
    pub fn new(
        broker: Arc<dyn TaskBroker>,
        generator: Arc<dyn ProjectGenerator>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            broker,
            generator,
            store,
        }
    }

    /// Execute `task`, converting a panic anywhere inside into a retriable
    /// failure.
    pub async fn handle(&self, task: &TaskInfo) -> Result<(), TaskError> {
        match AssertUnwindSafe(self.process(task)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(task_id = %task.id, %reason, "Task panicked");
                let message = format!("Task failed unexpectedly: {reason}");
                self.report(&task.id, 0, &message).await;
                Err(TaskError::Retry(message))
            }
        }
    }

    async fn process(&self, task: &TaskInfo) -> Result<(), TaskError> {
        let task_id = task.id.as_str();
        self.report(task_id, 0, MSG_INITIALIZING).await;

        let payload: serde_json::Value = match serde_json::from_slice(&task.payload) {
            Ok(value) => value,
            Err(e) => {
                return Err(self
                    .reject(task_id, format!("Invalid task payload: {e}"))
                    .await)
            }
        };

        self.report(task_id, 10, MSG_GENERATING).await;

        let request = match TaskRequest::from_value(&payload) {
            Ok(request) => request,
            Err(e) => return Err(self.reject(task_id, format!("Invalid input: {e}")).await),
        };

        let artifacts = match self.generator.generate(task_id, &request).await {
            Ok(artifacts) => artifacts,
            Err(e) if !e.is_retriable() => return Err(self.reject(task_id, e.to_string()).await),
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Project generation failed");
                return Err(e.into());
            }
        };

        self.report(task_id, 50, MSG_UPLOADING).await;

        let archive = zip_directory_blocking(artifacts.root()).await?;
        upload_project(&*self.store, task_id, archive, &artifacts.renders).await?;

        self.report(task_id, 100, MSG_COMPLETED).await;
        tracing::info!(task_id, project = %request.project_name, "Task completed");
        Ok(())
    }

    /// Report a permanent failure at 0% and build the matching error.
    async fn reject(&self, task_id: &str, message: String) -> TaskError {
        tracing::warn!(task_id, reason = %message, "Task rejected without retry");
        self.report(task_id, 0, &message).await;
        TaskError::Skip(message)
    }

    /// Write a progress checkpoint. A failed write is logged and otherwise
    /// ignored: progress is advisory and must not fail the task.
    async fn report(&self, task_id: &str, percentage: i32, message: &str) {
        let report = ProgressReport::new(percentage, message);
        if let Err(e) = self.broker.write_result(task_id, &report.to_bytes()).await {
            tracing::warn!(task_id, percentage, error = %e, "Failed to write task progress");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
