pub mod health;
pub mod pcb;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api` route tree.
///
/// ```text
/// POST   /pcb                          submit a generation request
/// GET    /pcb/{task_id}                poll status
/// DELETE /pcb/{task_id}                cancel before start
/// GET    /pcb/{task_id}/render/{name}  SVG preview (front, back, schematic)
/// GET    /pcb/{task_id}/result         project archive
/// GET    /workers                      worker capacity
/// GET    /version                      build version
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/pcb", pcb::router())
        .route("/workers", get(handlers::workers::list_workers))
        .route("/version", get(handlers::health::version))
}
