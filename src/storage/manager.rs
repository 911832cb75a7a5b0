//! Append-only versioned store with lineage tracking.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::{OnceCell, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::records::{RecordBatch, TimeWindow};

use super::backend::StorageBackend;
use super::version::{
    DataSource, DatasetVersion, Lineage, LineageKey, StorageStatistics, ValidationStatus,
    VersionFilter, VersionId,
};

/// In-memory index of committed versions.
///
/// Versions and statistics live under one lock so a reader never observes a
/// version without its contribution to the totals, or the reverse.
#[derive(Default)]
struct Catalog {
    versions: BTreeMap<VersionId, DatasetVersion>,
    heads: HashMap<LineageKey, VersionId>,
    statistics: StorageStatistics,
}

impl Catalog {
    fn insert(&mut self, version: DatasetVersion) {
        let key = version.lineage_key();
        let is_newer = self
            .heads
            .get(&key)
            .map_or(true, |head| *head < version.version_id);
        if is_newer {
            self.heads.insert(key, version.version_id);
        }
        self.statistics.record(&version);
        self.versions.insert(version.version_id, version);
    }
}

/// Point by which a commit must be durable.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

/// Awaits `fut`, failing with `StorageError::Timeout` once `deadline` passes.
async fn within<F: Future>(deadline: Option<Deadline>, fut: F) -> Result<F::Output, StorageError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline.at, fut)
            .await
            .map_err(|_| StorageError::Timeout(deadline.budget)),
        None => Ok(fut.await),
    }
}

struct Inner {
    backend: Arc<dyn StorageBackend>,
    next_sequence: AtomicU64,
    chains: Mutex<HashMap<LineageKey, Arc<tokio::sync::Mutex<()>>>>,
    catalog: RwLock<Catalog>,
    loaded: OnceCell<()>,
}

impl Inner {
    fn chain_lock(&self, key: &LineageKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut chains = self.chains.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(chains.entry(key.clone()).or_default())
    }

    /// Persists one version. Callers hold the chain lock for `key`.
    ///
    /// The version enters the catalog only after the backend write succeeded
    /// within `deadline`. A write cut off by the deadline is discarded.
    async fn commit(
        &self,
        key: LineageKey,
        window: TimeWindow,
        record_count: usize,
        validation_status: ValidationStatus,
        payload: Vec<u8>,
        deadline: Option<Deadline>,
    ) -> Result<DatasetVersion, StorageError> {
        let parent_version_id = self.catalog.read().await.heads.get(&key).copied();
        let version_id = VersionId::from_sequence(self.next_sequence.fetch_add(1, Ordering::SeqCst));

        let version = DatasetVersion {
            version_id,
            data_type: key.data_type,
            record_count,
            size_bytes: payload.len() as u64,
            created_at: Utc::now(),
            parent_version_id,
            source: DataSource {
                owner: key.owner.clone(),
                window,
            },
            validation_status,
            checksum: checksum(&payload),
        };

        match within(deadline, self.backend.persist(&version, &payload)).await {
            Ok(persisted) => persisted?,
            Err(timeout) => {
                self.abandon(version_id, &timeout).await;
                return Err(timeout);
            }
        }
        self.catalog.write().await.insert(version.clone());

        info!(
            version_id = %version.version_id,
            lineage = %key,
            parent = ?version.parent_version_id.map(|p| p.to_string()),
            records = version.record_count,
            size_bytes = version.size_bytes,
            validation_status = %version.validation_status,
            "Stored dataset version"
        );

        Ok(version)
    }

    async fn abandon(&self, version_id: VersionId, cause: &StorageError) {
        warn!(version_id = %version_id, error = %cause, "Version commit abandoned");
        if let Err(e) = self.backend.discard(version_id).await {
            warn!(version_id = %version_id, error = %e, "Failed to discard abandoned version");
        }
    }
}

fn checksum(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Versioned dataset store.
///
/// Cloning is cheap and clones share the same catalog. Writes to one lineage
/// chain are serialized; writes to different chains proceed concurrently and
/// draw ids from a single atomic sequence.
#[derive(Clone)]
pub struct StorageManager {
    inner: Arc<Inner>,
}

impl StorageManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                next_sequence: AtomicU64::new(1),
                chains: Mutex::new(HashMap::new()),
                catalog: RwLock::new(Catalog::default()),
                loaded: OnceCell::new(),
            }),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    /// Loads the catalog of previously committed versions. Idempotent.
    pub async fn initialize(&self) -> Result<(), StorageError> {
        self.inner
            .loaded
            .get_or_try_init(|| async {
                let mut manifests = self.inner.backend.load_manifests().await?;
                manifests.sort_by_key(|v| v.version_id);

                let mut catalog = self.inner.catalog.write().await;
                let mut max_sequence = 0;
                for version in manifests {
                    max_sequence = max_sequence.max(version.version_id.sequence());
                    catalog.insert(version);
                }
                self.inner
                    .next_sequence
                    .fetch_max(max_sequence + 1, Ordering::SeqCst);

                info!(
                    backend = self.inner.backend.name(),
                    versions = catalog.versions.len(),
                    chains = catalog.heads.len(),
                    "Storage catalog loaded"
                );
                Ok::<(), StorageError>(())
            })
            .await?;
        Ok(())
    }

    /// Stores a batch as a new version on the `(user_id, kind)` chain.
    pub async fn store(
        &self,
        batch: &RecordBatch,
        validation_status: ValidationStatus,
    ) -> Result<DatasetVersion, StorageError> {
        self.store_as(batch, &batch.user_id, validation_status).await
    }

    /// Stores a batch on the chain of `owner`, which may be a batch tag.
    ///
    /// The commit runs in its own task: once started it completes even if the
    /// caller is dropped, so the catalog never lags behind the backend.
    pub async fn store_as(
        &self,
        batch: &RecordBatch,
        owner: &str,
        validation_status: ValidationStatus,
    ) -> Result<DatasetVersion, StorageError> {
        self.commit_batch(batch, owner, validation_status, None)
            .await
    }

    /// Like [`store_as`](Self::store_as), but gives up when the version is not
    /// durable within `timeout`.
    ///
    /// A commit that misses the deadline is discarded from the backend and
    /// never becomes visible, so `StorageError::Timeout` means nothing was
    /// stored.
    pub async fn store_as_within(
        &self,
        batch: &RecordBatch,
        owner: &str,
        validation_status: ValidationStatus,
        timeout: Duration,
    ) -> Result<DatasetVersion, StorageError> {
        let deadline = Deadline {
            at: Instant::now() + timeout,
            budget: timeout,
        };
        self.commit_batch(batch, owner, validation_status, Some(deadline))
            .await
    }

    async fn commit_batch(
        &self,
        batch: &RecordBatch,
        owner: &str,
        validation_status: ValidationStatus,
        deadline: Option<Deadline>,
    ) -> Result<DatasetVersion, StorageError> {
        within(deadline, self.initialize()).await??;

        let payload = serde_json::to_vec(batch)?;
        let key = LineageKey::new(owner, batch.kind());
        let chain = self.inner.chain_lock(&key);
        let inner = Arc::clone(&self.inner);
        let window = batch.window;
        let record_count = batch.len();

        debug!(lineage = %key, records = record_count, "Queueing version commit");

        tokio::spawn(async move {
            let _guard = within(deadline, chain.lock_owned()).await?;
            inner
                .commit(key, window, record_count, validation_status, payload, deadline)
                .await
        })
        .await
        .map_err(|e| StorageError::Backend(format!("commit task failed: {}", e)))?
    }

    /// Returns the metadata of a version.
    pub async fn get_version(&self, version_id: VersionId) -> Result<DatasetVersion, StorageError> {
        self.initialize().await?;
        self.inner
            .catalog
            .read()
            .await
            .versions
            .get(&version_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(version_id.to_string()))
    }

    /// Traces a version back to the root of its chain.
    pub async fn get_data_lineage(&self, version_id: VersionId) -> Result<Lineage, StorageError> {
        self.initialize().await?;
        let catalog = self.inner.catalog.read().await;
        let version = catalog
            .versions
            .get(&version_id)
            .ok_or_else(|| StorageError::NotFound(version_id.to_string()))?;

        let mut ancestors = Vec::new();
        let mut cursor = version.parent_version_id;
        while let Some(parent_id) = cursor {
            if ancestors.len() >= catalog.versions.len() {
                return Err(StorageError::Corrupted(format!(
                    "lineage of {} does not terminate",
                    version_id
                )));
            }
            ancestors.push(parent_id);
            cursor = catalog
                .versions
                .get(&parent_id)
                .ok_or_else(|| {
                    StorageError::Corrupted(format!(
                        "ancestor {} of {} is missing",
                        parent_id, version_id
                    ))
                })?
                .parent_version_id;
        }

        Ok(Lineage {
            version_id,
            data_type: version.data_type,
            record_count: version.record_count,
            parent_version_id: version.parent_version_id,
            ancestors,
        })
    }

    /// Aggregate statistics over every stored version.
    pub async fn get_statistics(&self) -> Result<StorageStatistics, StorageError> {
        self.initialize().await?;
        Ok(self.inner.catalog.read().await.statistics.clone())
    }

    /// The newest version of every chain, most recent first.
    pub async fn latest_versions(&self) -> Result<Vec<DatasetVersion>, StorageError> {
        self.initialize().await?;
        let catalog = self.inner.catalog.read().await;
        let mut latest: Vec<DatasetVersion> = catalog
            .heads
            .values()
            .filter_map(|id| catalog.versions.get(id).cloned())
            .collect();
        latest.sort_by(|a, b| b.version_id.cmp(&a.version_id));
        Ok(latest)
    }

    /// Lists versions matching `filter`, most recent first.
    pub async fn list_versions(
        &self,
        filter: &VersionFilter,
    ) -> Result<Vec<DatasetVersion>, StorageError> {
        self.initialize().await?;
        let catalog = self.inner.catalog.read().await;
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(catalog
            .versions
            .values()
            .rev()
            .filter(|v| filter.matches(v))
            .take(limit)
            .cloned()
            .collect())
    }

    /// Reads back the records of a version, verifying the checksum.
    pub async fn load_batch(&self, version_id: VersionId) -> Result<RecordBatch, StorageError> {
        let version = self.get_version(version_id).await?;
        let payload = self.inner.backend.load_payload(version_id).await?;

        let actual = checksum(&payload);
        if actual != version.checksum {
            return Err(StorageError::Corrupted(format!(
                "checksum mismatch for {}: expected {}, got {}",
                version_id, version.checksum, actual
            )));
        }

        Ok(serde_json::from_slice(&payload)?)
    }
}
