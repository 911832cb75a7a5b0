//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op when `init_metrics()` has not been called, so
//! library users and tests can run the pipeline without a registry.

use super::prometheus::{
    ACTIVE_RUNS, RECORDS_COLLECTED, RUNS_TOTAL, RUN_DURATION, STEP_DURATION, VALIDATION_FAILURES,
    VERSIONS_STORED,
};
use crate::records::RecordKind;
use crate::storage::ValidationStatus;
use crate::validation::ValidationReport;

/// Pipeline step names used as the `step` label.
pub const STEP_COLLECTION: &str = "collection";
pub const STEP_VALIDATION: &str = "validation";
pub const STEP_STORAGE: &str = "storage";

/// Metrics collector for recording pipeline operational metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record a finished user run.
    ///
    /// # Arguments
    ///
    /// * `status` - Terminal run state (`completed` or `failed`)
    /// * `duration_secs` - Run duration in seconds
    pub fn record_run(&self, status: &str, duration_secs: f64) {
        if let Some(runs_total) = RUNS_TOTAL.get() {
            runs_total.with_label_values(&[status]).inc();
        }

        if let Some(run_duration) = RUN_DURATION.get() {
            run_duration.observe(duration_secs);
        }

        tracing::trace!(
            status = status,
            duration_secs = duration_secs,
            "Recorded run metric"
        );
    }

    /// Record the duration of one pipeline step.
    pub fn record_step(&self, step: &str, duration_secs: f64) {
        if let Some(step_duration) = STEP_DURATION.get() {
            step_duration
                .with_label_values(&[step])
                .observe(duration_secs);
        }
    }

    /// Record records fetched for one kind.
    pub fn record_collected(&self, kind: RecordKind, count: usize) {
        if let Some(records) = RECORDS_COLLECTED.get() {
            records
                .with_label_values(&[kind.as_str()])
                .inc_by(count as f64);
        }

        tracing::trace!(kind = %kind, count = count, "Recorded collection metric");
    }

    /// Record every failing check of a validation report.
    pub fn record_validation(&self, report: &ValidationReport) {
        if let Some(failures) = VALIDATION_FAILURES.get() {
            for check in report.failures() {
                let severity = check.severity.to_string();
                failures
                    .with_label_values(&[check.check_name.as_str(), severity.as_str()])
                    .inc();
            }
        }

        tracing::trace!(
            status = %report.overall_status,
            failed_errors = report.failed_errors,
            failed_warnings = report.failed_warnings,
            "Recorded validation metric"
        );
    }

    /// Record a stored version.
    pub fn record_version_stored(&self, status: ValidationStatus) {
        if let Some(versions) = VERSIONS_STORED.get() {
            let status = status.to_string();
            versions.with_label_values(&[status.as_str()]).inc();
        }
    }

    /// Increment the count of runs in flight by 1.
    pub fn inc_active_runs(&self) {
        if let Some(active_runs) = ACTIVE_RUNS.get() {
            active_runs.inc();
        }
    }

    /// Decrement the count of runs in flight by 1.
    pub fn dec_active_runs(&self) {
        if let Some(active_runs) = ACTIVE_RUNS.get() {
            active_runs.dec();
        }
    }
}
