//! Test doubles shared by the unit tests of this crate.

use async_trait::async_trait;
use kbtools_storage::{ArtifactStore, Fetched, StorageError};

/// A store that holds nothing.
pub struct NoStore;

#[async_trait]
impl ArtifactStore for NoStore {
    async fn put(&self, _key: &str, _body: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn fetch(&self, key: &str, _disposition: Option<&str>) -> Result<Fetched, StorageError> {
        Err(StorageError::NotFound(key.to_string()))
    }
}
