//! Service-level endpoints: health, version and the editor redirect.

use axum::extract::State;
use axum::http::header::LOCATION;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the queue backend is unreachable.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub queue_healthy: bool,
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_healthy = match state.queue.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Queue backend health check failed");
            false
        }
    };

    Json(HealthResponse {
        status: if queue_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        queue_healthy,
    })
}

/// GET /api/version
pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Everything outside the API belongs to the layout editor.
pub async fn redirect_to_editor(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(LOCATION, state.config.editor_url.clone())],
    )
}
