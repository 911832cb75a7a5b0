//! Run results returned by the orchestrator.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::records::{RecordKind, TimeWindow};
use crate::storage::{DatasetVersion, StorageStatistics, VersionId};
use crate::validation::ValidationReport;

/// State of a single user run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Collecting,
    Validating,
    Storing,
    /// Every collected batch was persisted.
    Completed,
    /// Terminal; reached from collecting, validating or storing.
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Collecting => write!(f, "collecting"),
            RunState::Validating => write!(f, "validating"),
            RunState::Storing => write!(f, "storing"),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of the collection step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionStep {
    /// Records fetched per kind. Kinds not reached before a failure are absent.
    pub records_collected: BTreeMap<RecordKind, usize>,
    pub duration_seconds: f64,
}

impl CollectionStep {
    pub fn total_records(&self) -> usize {
        self.records_collected.values().sum()
    }
}

/// Outcome of the validation step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ValidationStep {
    /// Validation was not requested or not reached.
    Skipped,
    Completed {
        duration_seconds: f64,
        report: ValidationReport,
    },
    /// The rule engine itself failed; batches are stored unvalidated.
    Failed { duration_seconds: f64, error: String },
}

impl ValidationStep {
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            ValidationStep::Completed { report, .. } => Some(report),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ValidationStep::Skipped)
    }
}

/// Outcome of the storage step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageStep {
    /// Version stored for each collected kind.
    pub version_ids: BTreeMap<RecordKind, VersionId>,
    /// Last version stored by this run.
    pub version_id: Option<VersionId>,
    pub duration_seconds: f64,
    /// Set when storage was deliberately not attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

/// Per-step detail of a user run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSteps {
    pub data_collection: Option<CollectionStep>,
    pub validation: ValidationStep,
    pub storage: Option<StorageStep>,
}

impl Default for RunSteps {
    fn default() -> Self {
        Self {
            data_collection: None,
            validation: ValidationStep::Skipped,
            storage: None,
        }
    }
}

/// Result of running the pipeline for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRunResult {
    pub run_id: Uuid,
    pub user_id: String,
    pub window: TimeWindow,
    pub state: RunState,
    pub success: bool,
    pub total_duration_seconds: f64,
    pub steps: RunSteps,
    pub error: Option<String>,
}

impl PipelineRunResult {
    /// Creates a pending result for a user run.
    pub(crate) fn pending(user_id: &str, window: TimeWindow) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            window,
            state: RunState::Pending,
            success: false,
            total_duration_seconds: 0.0,
            steps: RunSteps::default(),
            error: None,
        }
    }

    /// Marks the run as completed. `success` is false when validation failed.
    pub(crate) fn completed(mut self, duration: Duration) -> Self {
        let validation_failed = self
            .steps
            .validation
            .report()
            .is_some_and(ValidationReport::is_fail);
        self.state = RunState::Completed;
        self.success = !validation_failed && self.error.is_none();
        if validation_failed && self.error.is_none() {
            self.error = Some("validation failed; batch stored as invalid".to_string());
        }
        self.total_duration_seconds = duration.as_secs_f64();
        self
    }

    /// Marks the run as failed.
    pub(crate) fn failed(mut self, error: impl Into<String>, duration: Duration) -> Self {
        self.state = RunState::Failed;
        self.success = false;
        self.error = Some(error.into());
        self.total_duration_seconds = duration.as_secs_f64();
        self
    }

    /// Total records collected across kinds.
    pub fn records_collected(&self) -> usize {
        self.steps
            .data_collection
            .as_ref()
            .map(CollectionStep::total_records)
            .unwrap_or(0)
    }

    /// Validation report, if validation ran.
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        self.steps.validation.report()
    }

    /// Last version stored by this run.
    pub fn version_id(&self) -> Option<VersionId> {
        self.steps.storage.as_ref().and_then(|s| s.version_id)
    }
}

/// Aggregate outcome of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_users: usize,
    pub successful: usize,
    pub failed: usize,
    /// Users never started because the batch was cancelled.
    pub cancelled: usize,
    /// Wall clock for the whole batch.
    pub total_duration_seconds: f64,
    /// Highest number of user runs observed in flight at once.
    pub peak_concurrency: usize,
}

/// Result of running the pipeline for many users.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchRunResult {
    pub summary: BatchSummary,
    pub per_user: BTreeMap<String, PipelineRunResult>,
    pub cancelled_users: Vec<String>,
}

impl BatchRunResult {
    /// Users whose run did not succeed, in id order.
    pub fn failed_users(&self) -> Vec<&str> {
        self.per_user
            .iter()
            .filter(|(_, r)| !r.success)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Whether any run is currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Running,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Running => write!(f, "running"),
        }
    }
}

/// Snapshot returned by `get_pipeline_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub pipeline_status: PipelineState,
    pub active_runs: usize,
    pub storage_statistics: StorageStatistics,
    /// Head of every lineage chain, most recent first.
    pub latest_versions: Vec<DatasetVersion>,
}
