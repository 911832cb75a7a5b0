//! Append-only, versioned dataset storage.
//!
//! # Overview
//!
//! - **StorageManager**: assigns version ids, tracks lineage chains keyed by
//!   `(owner, data_type)`, and keeps aggregate statistics
//! - **StorageBackend**: durable home for payloads and manifests
//!   ([`MemoryBackend`], [`FileBackend`])
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use burnout_pipeline::storage::{FileBackend, StorageManager, ValidationStatus};
//!
//! let storage = StorageManager::new(Arc::new(FileBackend::new("./datasets")));
//! storage.initialize().await?;
//!
//! let version = storage.store(&batch, ValidationStatus::Valid).await?;
//! let lineage = storage.get_data_lineage(version.version_id).await?;
//! ```

pub mod backend;
pub mod file_backend;
pub mod manager;
pub mod version;

pub use crate::error::StorageError;
pub use backend::{MemoryBackend, StorageBackend};
pub use file_backend::FileBackend;
pub use manager::StorageManager;
pub use version::{
    DataSource, DatasetVersion, Lineage, LineageKey, StorageStatistics, ValidationStatus,
    VersionFilter, VersionId,
};
