//! Task queue backend for the PCB generation pipeline.
//!
//! Two seams are exposed. [`TaskQueue`] is what the HTTP gateway needs:
//! enqueue, depth, inspection, cancellation and the worker roster.
//! [`TaskBroker`] is what a worker process needs: claim, progress, settle,
//! heartbeat and housekeeping. [`PgQueue`] implements both over PostgreSQL
//! and [`MemoryQueue`] implements both in-process.

pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;

pub use backend::{FailOutcome, TaskBroker, TaskQueue};
pub use config::QueueConfig;
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use postgres::PgQueue;
