//! SeaweedFS Filer backend.
//!
//! Uploads are multipart `POST {filer}/{key}?ttl=1h`; downloads are plain
//! `GET {filer}/{key}` streamed back to the client through the gateway.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONNECTION, CONTENT_DISPOSITION, TRANSFER_ENCODING};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;

use crate::error::StorageError;
use crate::{ArtifactStore, ArtifactStream, Fetched};

/// Lifetime the Filer is asked to keep uploaded objects for.
pub const UPLOAD_TTL: &str = "1h";

/// HTTP client for a single Filer.
pub struct FilerStore {
    client: reqwest::Client,
    base_url: String,
}

impl FilerStore {
    /// Create a store for the Filer at `base_url`, e.g. `http://filer:8888`.
    pub fn new(base_url: &str, upload_timeout: Duration) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder().timeout(upload_timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a store reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url)
    }
}

#[async_trait]
impl ArtifactStore for FilerStore {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        let file_name = key.rsplit('/').next().unwrap_or(key).to_string();
        let part = Part::bytes(body)
            .file_name(file_name)
            .mime_str(content_type)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.object_url(key))
            .query(&[("ttl", UPLOAD_TTL)])
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StorageError::Upload {
                key: key.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn fetch(&self, key: &str, disposition: Option<&str>) -> Result<Fetched, StorageError> {
        let response = self.client.get(self.object_url(key)).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            return Err(StorageError::BadGateway(status.as_u16()));
        }

        let mut headers = response.headers().clone();
        // Framing belongs to the upstream connection, not the relayed one.
        headers.remove(TRANSFER_ENCODING);
        headers.remove(CONNECTION);
        if let Some(value) = disposition.and_then(|d| HeaderValue::from_str(d).ok()) {
            headers.insert(CONTENT_DISPOSITION, value);
        }

        Ok(Fetched::Stream(ArtifactStream {
            status,
            headers,
            body: response,
        }))
    }
}
