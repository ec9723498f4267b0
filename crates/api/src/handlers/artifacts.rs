//! Delivery of generated artifacts.
//!
//! Depending on the storage backend the body is either streamed through the
//! gateway chunk by chunk, with the upstream status and headers, or the
//! client is redirected to a short-lived pre-signed URL.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Redirect, Response};
use kbtools_core::error::CoreError;
use kbtools_storage::{keys, ArtifactStream, Fetched};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /api/pcb/{task_id}/render/{name}
///
/// One of the `front`, `back` or `schematic` SVG previews, served inline.
pub async fn get_render(
    State(state): State<AppState>,
    Path((task_id, name)): Path<(String, String)>,
) -> AppResult<Response> {
    if !keys::is_valid_task_id(&task_id) || !keys::is_render_name(&name) {
        return Err(artifact_not_found(format!("{task_id}/{name}")));
    }

    let fetched = state
        .store
        .fetch(&keys::render_key(&task_id, &name), None)
        .await?;
    Ok(relay(fetched))
}

/// GET /api/pcb/{task_id}/result
///
/// The packaged project, forced to download as `{task_id}.zip`.
pub async fn get_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Response> {
    if !keys::is_valid_task_id(&task_id) {
        return Err(artifact_not_found(task_id));
    }

    let disposition = keys::attachment(&keys::archive_name(&task_id));
    let fetched = state
        .store
        .fetch(&keys::archive_key(&task_id), Some(&disposition))
        .await?;
    Ok(relay(fetched))
}

fn relay(fetched: Fetched) -> Response {
    match fetched {
        Fetched::Stream(ArtifactStream {
            status,
            headers,
            body,
        }) => {
            let mut response = Response::new(Body::from_stream(body.bytes_stream()));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        Fetched::Redirect(url) => Redirect::temporary(&url).into_response(),
    }
}

fn artifact_not_found(id: String) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Artifact",
        id,
    })
}
