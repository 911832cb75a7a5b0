//! File-system backend for dataset versions.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/data/<version_id>.json      serialized record batch
//! <root>/versions/<version_id>.json  version manifest
//! ```
//!
//! Both files are written to a temporary name, synced and renamed into place.
//! The manifest is renamed last, so an interrupted write leaves at most an
//! orphaned payload that is never listed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::StorageError;

use super::backend::StorageBackend;
use super::version::{DatasetVersion, VersionId};

const DATA_DIR: &str = "data";
const MANIFEST_DIR: &str = "versions";

/// Stores each version as a pair of JSON files.
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn payload_path(&self, version_id: VersionId) -> PathBuf {
        self.root
            .join(DATA_DIR)
            .join(format!("{}.json", version_id))
    }

    pub fn manifest_path(&self, version_id: VersionId) -> PathBuf {
        self.root
            .join(MANIFEST_DIR)
            .join(format!("{}.json", version_id))
    }

    async fn ensure_directories(&self) -> Result<(), StorageError> {
        for dir in [DATA_DIR, MANIFEST_DIR] {
            let path = self.root.join(dir);
            fs::create_dir_all(&path).await.map_err(|e| {
                StorageError::Backend(format!("failed to create directory {:?}: {}", path, e))
            })?;
        }
        Ok(())
    }
}

/// Writes `contents` to `path` through a synced temporary file.
///
/// The parent directory is synced after the rename so the new entry is durable.
async fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    if let Some(parent) = path.parent() {
        sync_dir(parent).await?;
    }
    Ok(())
}

/// Removes `path`; a missing file is not an error.
async fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<(), StorageError> {
    fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

// Directory handles cannot be synced here; renames rely on the filesystem.
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<(), StorageError> {
    Ok(())
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn persist(&self, version: &DatasetVersion, payload: &[u8]) -> Result<(), StorageError> {
        self.ensure_directories().await?;

        let manifest_path = self.manifest_path(version.version_id);
        if fs::try_exists(&manifest_path).await? {
            return Err(StorageError::Backend(format!(
                "version {} already exists",
                version.version_id
            )));
        }

        write_atomically(&self.payload_path(version.version_id), payload).await?;

        let manifest = serde_json::to_vec_pretty(version)?;
        write_atomically(&manifest_path, &manifest).await?;

        debug!(
            version_id = %version.version_id,
            path = %manifest_path.display(),
            "Committed version manifest"
        );
        Ok(())
    }

    async fn load_manifests(&self) -> Result<Vec<DatasetVersion>, StorageError> {
        let dir = self.root.join(MANIFEST_DIR);
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            // Only committed manifests; skip leftover temporaries
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let contents = fs::read(&path).await?;
            match serde_json::from_slice::<DatasetVersion>(&contents) {
                Ok(version) => versions.push(version),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable manifest");
                }
            }
        }

        Ok(versions)
    }

    async fn discard(&self, version_id: VersionId) -> Result<(), StorageError> {
        // Manifest first: once it is gone the version is no longer committed.
        let manifest_path = self.manifest_path(version_id);
        let had_manifest = remove_if_exists(&manifest_path).await?;
        remove_if_exists(&manifest_path.with_extension("json.tmp")).await?;
        if had_manifest {
            if let Some(parent) = manifest_path.parent() {
                sync_dir(parent).await?;
            }
        }

        let payload_path = self.payload_path(version_id);
        remove_if_exists(&payload_path).await?;
        remove_if_exists(&payload_path.with_extension("json.tmp")).await?;

        debug!(version_id = %version_id, had_manifest, "Discarded version files");
        Ok(())
    }

    async fn load_payload(&self, version_id: VersionId) -> Result<Vec<u8>, StorageError> {
        let path = self.payload_path(version_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(version_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{RecordKind, TimeWindow};
    use crate::storage::version::{DataSource, ValidationStatus};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn version(seq: u64) -> DatasetVersion {
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap(),
        )
        .unwrap();
        DatasetVersion {
            version_id: VersionId::from_sequence(seq),
            data_type: RecordKind::EmailMessage,
            record_count: 0,
            size_bytes: 2,
            created_at: Utc::now(),
            parent_version_id: None,
            source: DataSource {
                owner: "user-1".to_string(),
                window,
            },
            validation_status: ValidationStatus::Unvalidated,
            checksum: "00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend = FileBackend::new(temp_dir.path());

        backend.persist(&version(1), b"[]").await.expect("persist");
        backend.persist(&version(2), b"{}").await.expect("persist");

        let mut manifests = backend.load_manifests().await.expect("load");
        manifests.sort_by_key(|v| v.version_id);
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].version_id, VersionId::from_sequence(1));
        assert_eq!(manifests[1].source.owner, "user-1");

        let payload = backend
            .load_payload(VersionId::from_sequence(2))
            .await
            .expect("payload");
        assert_eq!(payload, b"{}");
    }

    #[tokio::test]
    async fn test_refuses_overwrite() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend = FileBackend::new(temp_dir.path());

        backend.persist(&version(1), b"[]").await.expect("persist");
        let err = backend.persist(&version(1), b"[1]").await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));

        let payload = backend
            .load_payload(VersionId::from_sequence(1))
            .await
            .expect("payload");
        assert_eq!(payload, b"[]");
    }

    #[tokio::test]
    async fn test_ignores_uncommitted_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend = FileBackend::new(temp_dir.path());
        backend.persist(&version(1), b"[]").await.expect("persist");

        // Simulates a crash between payload write and manifest rename
        std::fs::write(
            temp_dir.path().join(MANIFEST_DIR).join("v0000000002.json.tmp"),
            b"{",
        )
        .unwrap();

        let manifests = backend.load_manifests().await.expect("load");
        assert_eq!(manifests.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_payload_is_not_found() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend = FileBackend::new(temp_dir.path());
        let err = backend
            .load_payload(VersionId::from_sequence(99))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_persist_leaves_no_temporaries() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend = FileBackend::new(temp_dir.path());
        backend.persist(&version(1), b"[]").await.expect("persist");

        for dir in [DATA_DIR, MANIFEST_DIR] {
            let names: Vec<String> = std::fs::read_dir(temp_dir.path().join(dir))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(names, vec!["v0000000001.json".to_string()]);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sync_dir() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        sync_dir(temp_dir.path()).await.expect("sync existing dir");
        assert!(sync_dir(&temp_dir.path().join("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_discard_uncommits_version() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend = FileBackend::new(temp_dir.path());
        backend.persist(&version(1), b"[]").await.expect("persist");
        backend.persist(&version(2), b"[]").await.expect("persist");

        backend
            .discard(VersionId::from_sequence(2))
            .await
            .expect("discard");
        // Discarding an unknown id is a no-op
        backend
            .discard(VersionId::from_sequence(3))
            .await
            .expect("discard missing");

        let manifests = backend.load_manifests().await.expect("load");
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].version_id, VersionId::from_sequence(1));
        assert!(backend
            .load_payload(VersionId::from_sequence(2))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_empty_root_has_no_manifests() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend = FileBackend::new(temp_dir.path().join("missing"));
        assert!(backend.load_manifests().await.expect("load").is_empty());
    }
}
