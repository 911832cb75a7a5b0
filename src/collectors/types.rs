//! Collection adapter boundary.
//!
//! Connectors that talk to calendar and mail providers live outside this
//! crate. The orchestrator only sees the [`CollectionAdapter`] trait and the
//! [`CollectorError`] taxonomy defined here.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::records::{RecordKind, Records, TimeWindow};

/// Errors that can occur while fetching records from a source system.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Source system unreachable or temporarily failing.
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// API rate limit exceeded.
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited {
        /// Optional retry-after duration in seconds.
        retry_after: Option<u64>,
    },

    /// The source refused the request (bad credentials, unknown user).
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Payload could not be decoded into records at all.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid or unexpected response from the adapter.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The fetch did not finish within the step timeout.
    #[error("Collection timed out after {0:?}")]
    Timeout(Duration),

    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CollectorError {
    /// True for errors a retrying adapter could reasonably retry.
    ///
    /// The orchestrator does not retry; both kinds fail the run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollectorError::Unavailable(_)
                | CollectorError::RateLimited { .. }
                | CollectorError::Timeout(_)
                | CollectorError::Io(_)
        )
    }
}

/// Result type alias for collector operations.
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Source of raw behavioral records for a user and time window.
#[async_trait]
pub trait CollectionAdapter: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    /// Establishes connections. Called once by orchestrator initialization.
    async fn connect(&self) -> CollectorResult<()> {
        Ok(())
    }

    /// Fetches all records of `kind` for `user_id` inside `window`.
    ///
    /// Malformed records are returned as-is; characterizing them is the
    /// validator's job.
    async fn fetch(
        &self,
        user_id: &str,
        window: &TimeWindow,
        kind: RecordKind,
    ) -> CollectorResult<Records>;
}
