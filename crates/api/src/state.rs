use std::sync::Arc;

use kbtools_queue::TaskQueue;
use kbtools_storage::ArtifactStore;

use crate::config::ServerConfig;
use crate::engine::tracker::AbandonmentTracker;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Client side of the task queue.
    pub queue: Arc<dyn TaskQueue>,
    /// Where workers put generated artifacts.
    pub store: Arc<dyn ArtifactStore>,
    /// Last-access record shared with the abandonment sweep.
    pub tracker: Arc<AbandonmentTracker>,
    pub config: Arc<ServerConfig>,
    /// Queue that submissions go to and lookups read from.
    pub queue_name: Arc<str>,
}

impl AppState {
    /// Build state with a fresh tracker sized from `config`.
    pub fn new(
        config: ServerConfig,
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn ArtifactStore>,
        queue_name: &str,
    ) -> Self {
        Self {
            queue,
            store,
            tracker: Arc::new(AbandonmentTracker::new(config.abandonment_timeout)),
            config: Arc::new(config),
            queue_name: Arc::from(queue_name),
        }
    }
}
