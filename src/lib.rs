//! burnout_pipeline: ingestion, validation and versioned storage of
//! behavioral records (calendar events, email messages) per user.
//!
//! Records are fetched through a [`collectors::CollectionAdapter`], checked by
//! the [`validation::DataValidator`], and persisted as immutable, lineage-tracked
//! versions by the [`storage::StorageManager`]. The
//! [`pipeline::PipelineOrchestrator`] drives single-user and batch runs.

// Core modules
pub mod cli;
pub mod collectors;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod records;
pub mod storage;
pub mod validation;

// Re-export commonly used error types
pub use collectors::CollectorError;
pub use error::{StorageError, ValidationError};
pub use pipeline::{ConfigError, PipelineError};

// Re-export the main entry points
pub use collectors::CollectionAdapter;
pub use pipeline::{PipelineConfig, PipelineOrchestrator};
pub use records::{RecordBatch, RecordKind, Records, TimeWindow};
pub use storage::StorageManager;
pub use validation::DataValidator;
