//! Artifact storage for generated projects.
//!
//! Workers upload a packaged archive plus three SVG previews per task; the
//! gateway serves them back either by streaming through itself (Filer) or
//! by redirecting to a pre-signed URL (S3).

pub mod archive;
pub mod config;
pub mod error;
pub mod filer;
pub mod keys;
pub mod s3;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

pub use config::{S3Config, StorageBackend, StorageConfig};
pub use error::StorageError;
pub use filer::FilerStore;
pub use s3::S3Store;

/// Content type of the packaged project archive.
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Content type of rendered previews.
pub const SVG_CONTENT_TYPE: &str = "image/svg+xml";

/// An artifact body streamed from the storage backend.
#[derive(Debug)]
pub struct ArtifactStream {
    pub status: StatusCode,
    /// Upstream headers, with the disposition override already applied.
    pub headers: HeaderMap,
    /// The open upstream response; read it with `bytes_stream()`.
    pub body: reqwest::Response,
}

/// How the gateway should answer an artifact request.
#[derive(Debug)]
pub enum Fetched {
    Stream(ArtifactStream),
    /// Time-limited URL the client should be redirected to.
    Redirect(String),
}

/// Put/get surface of a storage backend.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `body` under `key`. Objects are immutable once written.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    /// Look up `key` for delivery to a client.
    ///
    /// `disposition` replaces the `Content-Disposition` the client sees.
    async fn fetch(&self, key: &str, disposition: Option<&str>) -> Result<Fetched, StorageError>;
}

/// Build the store selected by `config.backend`.
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn ArtifactStore>, StorageError> {
    let store: Arc<dyn ArtifactStore> = match config.backend {
        StorageBackend::Filer => Arc::new(FilerStore::new(&config.filer_url, config.upload_timeout)?),
        StorageBackend::S3 => Arc::new(S3Store::connect(&config.s3).await),
    };
    Ok(store)
}

/// Upload a finished project: the archive first, then every preview.
///
/// `renders` pairs a preview name (`front`, `back`, `schematic`) with the
/// SVG file produced for it.
pub async fn upload_project(
    store: &dyn ArtifactStore,
    task_id: &str,
    archive: Vec<u8>,
    renders: &[(&str, PathBuf)],
) -> Result<(), StorageError> {
    store
        .put(&keys::archive_key(task_id), archive, ZIP_CONTENT_TYPE)
        .await?;

    for (name, path) in renders {
        let svg = tokio::fs::read(path).await?;
        store
            .put(&keys::render_key(task_id, name), svg, SVG_CONTENT_TYPE)
            .await?;
    }

    tracing::debug!(task_id, renders = renders.len(), "Project artifacts uploaded");
    Ok(())
}
