//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks user runs, step timings, collected records, validation failures and
//! stored versions.
//!
//! # Example
//!
//! ```ignore
//! use burnout_pipeline::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_run("completed", 0.4);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, STEP_COLLECTION, STEP_STORAGE, STEP_VALIDATION};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_RUNS, RECORDS_COLLECTED, REGISTRY, RUNS_TOTAL, RUN_DURATION, STEP_DURATION,
    VALIDATION_FAILURES, VERSIONS_STORED,
};
