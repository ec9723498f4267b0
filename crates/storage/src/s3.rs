//! S3-compatible backend.
//!
//! Artifacts are delivered by redirecting the client to a pre-signed GET
//! URL, so bytes never pass through the gateway. Object expiry is left to
//! the bucket's lifecycle rules.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::config::S3Config;
use crate::error::StorageError;
use crate::{ArtifactStore, Fetched};

pub struct S3Store {
    client: Client,
    config: S3Config,
}

impl S3Store {
    /// Build a client from `config`, falling back to the default AWS
    /// credential chain when no static keys are configured.
    pub async fn connect(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "kbtools-env",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            config: config.clone(),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::S3(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn fetch(&self, key: &str, disposition: Option<&str>) -> Result<Fetched, StorageError> {
        // Pre-signing never contacts the store, so existence is checked first
        // to keep the not-found contract of the streaming backend.
        if let Err(e) = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                return Err(StorageError::NotFound(key.to_string()));
            }
            return Err(match e.raw_response() {
                Some(raw) => StorageError::BadGateway(raw.status().as_u16()),
                None => StorageError::S3(DisplayErrorContext(&e).to_string()),
            });
        }

        let presigning = PresigningConfig::expires_in(self.config.presign_expiry)
            .map_err(|e| StorageError::S3(e.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .set_response_content_disposition(disposition.map(str::to_string))
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::S3(DisplayErrorContext(&e).to_string()))?;

        Ok(Fetched::Redirect(presigned.uri().to_string()))
    }
}
