//! Persistence backends for dataset versions.
//!
//! A backend stores a payload and its manifest for each version. Writing the
//! manifest is the commit point: a version without a manifest does not exist.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;

use super::version::{DatasetVersion, VersionId};

/// Durable storage for version payloads and manifests.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Persists a new version. Must fail rather than overwrite an existing id.
    async fn persist(&self, version: &DatasetVersion, payload: &[u8]) -> Result<(), StorageError>;

    /// Returns every committed version manifest, in any order.
    async fn load_manifests(&self) -> Result<Vec<DatasetVersion>, StorageError>;

    /// Removes everything written for `version_id`, committed or not.
    ///
    /// Used when a commit is abandoned. Unknown ids are a no-op.
    async fn discard(&self, version_id: VersionId) -> Result<(), StorageError>;

    /// Reads the payload of a committed version.
    async fn load_payload(&self, version_id: VersionId) -> Result<Vec<u8>, StorageError>;
}

/// Process-local backend; contents are lost on exit.
#[derive(Default)]
pub struct MemoryBackend {
    versions: RwLock<HashMap<VersionId, (DatasetVersion, Arc<[u8]>)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn persist(&self, version: &DatasetVersion, payload: &[u8]) -> Result<(), StorageError> {
        let mut versions = self.versions.write().await;
        if versions.contains_key(&version.version_id) {
            return Err(StorageError::Backend(format!(
                "version {} already exists",
                version.version_id
            )));
        }
        versions.insert(version.version_id, (version.clone(), Arc::from(payload)));
        Ok(())
    }

    async fn load_manifests(&self) -> Result<Vec<DatasetVersion>, StorageError> {
        let versions = self.versions.read().await;
        Ok(versions.values().map(|(v, _)| v.clone()).collect())
    }

    async fn discard(&self, version_id: VersionId) -> Result<(), StorageError> {
        self.versions.write().await.remove(&version_id);
        Ok(())
    }

    async fn load_payload(&self, version_id: VersionId) -> Result<Vec<u8>, StorageError> {
        let versions = self.versions.read().await;
        versions
            .get(&version_id)
            .map(|(_, payload)| payload.to_vec())
            .ok_or_else(|| StorageError::NotFound(version_id.to_string()))
    }
}
