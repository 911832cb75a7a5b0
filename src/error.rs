//! Error types shared across the pipeline subsystems.
//!
//! Collection and configuration errors live next to their modules
//! (`collectors::CollectorError`, `pipeline::ConfigError`); the rule engine and
//! the versioned store report through the enums below.

use std::time::Duration;

use thiserror::Error;

/// Failures of the rule engine itself.
///
/// A record failing a check is not an error: it is reported as a failing
/// [`ValidationCheck`](crate::validation::ValidationCheck).
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Validator malfunction: {0}")]
    Internal(String),
}

/// Errors that can occur while persisting or reading dataset versions.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Dataset version not found: {0}")]
    NotFound(String),

    #[error("Malformed version id: {0}")]
    InvalidId(String),

    #[error("Storage backend unavailable: {0}")]
    Backend(String),

    #[error("Stored data is corrupted: {0}")]
    Corrupted(String),

    #[error("Storage timed out after {0:?}")]
    Timeout(Duration),
}

impl StorageError {
    /// Returns true if the error reports an unknown version id.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}
