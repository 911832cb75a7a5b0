//! Pipeline orchestration for behavioral data ingestion.
//!
//! # Architecture
//!
//! - **Orchestrator**: drives single-user runs and bounded-concurrency batch runs
//! - **Config**: limits, timeouts, record kinds and storage selection
//! - **Result**: per-run and per-batch outcome types, status snapshots
//!
//! # Pipeline Flow
//!
//! 1. **Collection**: every configured record kind is fetched from the adapter
//! 2. **Validation**: optional; runs the rule engine and tags each batch
//! 3. **Storage**: each batch becomes a new immutable version on its lineage chain
//!
//! A batch failing validation is still stored, tagged `invalid`, and the run is
//! reported as unsuccessful. With `gate_on_validation` such batches are not
//! stored at all.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use burnout_pipeline::collectors::JsonDirCollector;
//! use burnout_pipeline::pipeline::{PipelineConfig, PipelineOrchestrator};
//! use burnout_pipeline::records::TimeWindow;
//!
//! let config = PipelineConfig::new().with_max_concurrent_users(8);
//! let adapter = Arc::new(JsonDirCollector::new("./fixtures"));
//! let orchestrator = PipelineOrchestrator::new(config, adapter)?;
//! orchestrator.initialize().await?;
//!
//! let window = TimeWindow::trailing_days(chrono::Utc::now(), 7)?;
//! let result = orchestrator.run_user_pipeline("user-1", window, true).await;
//! println!("success={} error={:?}", result.success, result.error);
//!
//! let batch = orchestrator
//!     .run_batch_pipeline(["user-1", "user-2"], window, 2, true)
//!     .await?;
//! println!("{} ok, {} failed", batch.summary.successful, batch.summary.failed);
//! ```

pub mod cancel;
pub mod config;
pub mod orchestrator;
pub mod result;

pub use cancel::CancellationHandle;
pub use config::{ConfigError, PipelineConfig, StorageBackendKind};
pub use orchestrator::{PipelineError, PipelineOrchestrator};
pub use result::{
    BatchRunResult, BatchSummary, CollectionStep, PipelineRunResult, PipelineState,
    PipelineStatus, RunState, RunSteps, StorageStep, ValidationStep,
};
