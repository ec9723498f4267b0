//! Route definitions for the `/pcb` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{artifacts, pcb};
use crate::state::AppState;

/// Routes mounted at `/pcb`.
///
/// ```text
/// POST   /                          -> submit_task
/// GET    /{task_id}                 -> get_task_status
/// DELETE /{task_id}                 -> cancel_task
/// GET    /{task_id}/render/{name}   -> get_render
/// GET    /{task_id}/result          -> get_result
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(pcb::submit_task))
        .route(
            "/{task_id}",
            get(pcb::get_task_status).delete(pcb::cancel_task),
        )
        .route("/{task_id}/render/{name}", get(artifacts::get_render))
        .route("/{task_id}/result", get(artifacts::get_result))
}
