//! Pipeline orchestrator for collecting, validating and storing user data.
//!
//! This module provides the `PipelineOrchestrator` that coordinates:
//! - Record collection through a [`CollectionAdapter`]
//! - Validation on the blocking pool
//! - Versioned storage with lineage
//! - Bounded-concurrency batch runs over many users

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info, warn};

use crate::collectors::{CollectionAdapter, CollectorError};
use crate::error::{StorageError, ValidationError};
use crate::metrics::{MetricsCollector, STEP_COLLECTION, STEP_STORAGE, STEP_VALIDATION};
use crate::records::{RecordBatch, TimeWindow};
use crate::storage::{FileBackend, MemoryBackend, StorageBackend, StorageManager, ValidationStatus};
use crate::validation::{DataValidator, ValidationReport};

use super::cancel::CancellationHandle;
use super::config::{ConfigError, PipelineConfig, StorageBackendKind};
use super::result::{
    BatchRunResult, CollectionStep, PipelineRunResult, PipelineState, PipelineStatus, RunState,
    StorageStep, ValidationStep,
};

/// Errors that can occur during pipeline operations.
///
/// Step failures inside a user run never surface here; they are reported in
/// the run result instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Collection adapter error.
    #[error("Collection error: {0}")]
    Collection(#[from] CollectorError),

    /// Validation engine error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Tracks one in-flight user run.
struct ActiveRun<'a> {
    counter: &'a AtomicUsize,
    metrics: &'a MetricsCollector,
}

impl<'a> ActiveRun<'a> {
    fn enter(counter: &'a AtomicUsize, metrics: &'a MetricsCollector) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        metrics.inc_active_runs();
        Self { counter, metrics }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.metrics.dec_active_runs();
    }
}

/// Outcome of one admitted or skipped user in a batch.
enum BatchEntry {
    Ran(String, PipelineRunResult),
    Cancelled(String),
}

/// Main pipeline orchestrator that coordinates all components.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    adapter: Arc<dyn CollectionAdapter>,
    storage: StorageManager,
    validator: DataValidator,
    active_runs: AtomicUsize,
    initialized: OnceCell<()>,
    metrics: MetricsCollector,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator whose storage backend is chosen by the config.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the configuration is invalid.
    pub fn new(
        config: PipelineConfig,
        adapter: Arc<dyn CollectionAdapter>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let backend: Arc<dyn StorageBackend> = match config.storage_backend {
            StorageBackendKind::Memory => Arc::new(MemoryBackend::new()),
            StorageBackendKind::File => Arc::new(FileBackend::new(&config.storage_path)),
        };

        Self::with_storage(config, adapter, StorageManager::new(backend))
    }

    /// Creates an orchestrator over an existing storage manager.
    pub fn with_storage(
        config: PipelineConfig,
        adapter: Arc<dyn CollectionAdapter>,
        storage: StorageManager,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        Ok(Self {
            validator: DataValidator::new(config.short_body_words),
            config,
            adapter,
            storage,
            active_runs: AtomicUsize::new(0),
            initialized: OnceCell::new(),
            metrics: MetricsCollector::new(),
        })
    }

    /// Connects the adapter and loads the storage catalog. Idempotent.
    ///
    /// A failed attempt is retried by the next call.
    pub async fn initialize(&self) -> Result<(), PipelineError> {
        self.initialized
            .get_or_try_init(|| async {
                self.adapter.connect().await?;
                self.storage.initialize().await?;
                info!(
                    adapter = self.adapter.name(),
                    backend = self.storage.backend_name(),
                    kinds = ?self.config.data_kinds,
                    "Pipeline initialized"
                );
                Ok::<(), PipelineError>(())
            })
            .await?;
        Ok(())
    }

    /// Runs collection, optional validation and storage for one user.
    ///
    /// Never fails: every step error is captured in the returned result.
    pub async fn run_user_pipeline(
        &self,
        user_id: &str,
        window: TimeWindow,
        validate_data: bool,
    ) -> PipelineRunResult {
        self.run_user(user_id, window, validate_data, user_id).await
    }

    /// Runs the pipeline for every user with at most `max_concurrent` in flight.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` before any work starts if
    /// `max_concurrent` is zero.
    pub async fn run_batch_pipeline<I, S>(
        &self,
        user_ids: I,
        window: TimeWindow,
        max_concurrent: usize,
        validate_data: bool,
    ) -> Result<BatchRunResult, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cancel = CancellationHandle::new();
        self.run_batch_pipeline_with_cancel(user_ids, window, max_concurrent, validate_data, &cancel)
            .await
    }

    /// Like [`run_batch_pipeline`](Self::run_batch_pipeline), but stops
    /// admitting users once `cancel` fires.
    pub async fn run_batch_pipeline_with_cancel<I, S>(
        &self,
        user_ids: I,
        window: TimeWindow,
        max_concurrent: usize,
        validate_data: bool,
        cancel: &CancellationHandle,
    ) -> Result<BatchRunResult, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        let users: Vec<String> = user_ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &String| {
                let fresh = seen.insert(id.clone());
                if !fresh {
                    warn!(user_id = %id, "Duplicate user id in batch ignored");
                }
                fresh
            })
            .collect();

        let total_users = users.len();
        info!(
            users = total_users,
            max_concurrent = max_concurrent,
            validate = validate_data,
            "Starting batch pipeline"
        );

        let started = Instant::now();
        let semaphore = Semaphore::new(max_concurrent);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let futures: Vec<_> = users
            .into_iter()
            .map(|user_id| {
                let semaphore = &semaphore;
                let in_flight = &in_flight;
                let peak = &peak;
                async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return BatchEntry::Cancelled(user_id);
                    };
                    if cancel.is_cancelled() {
                        debug!(user_id = %user_id, "Skipping user after cancellation");
                        return BatchEntry::Cancelled(user_id);
                    }

                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);

                    let owner = self.lineage_owner(&user_id);
                    let result = self.run_user(&user_id, window, validate_data, &owner).await;

                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    BatchEntry::Ran(user_id, result)
                }
            })
            .collect();

        let entries = futures::future::join_all(futures).await;

        let mut result = BatchRunResult::default();
        for entry in entries {
            match entry {
                BatchEntry::Ran(user_id, run) => {
                    if run.success {
                        result.summary.successful += 1;
                    } else {
                        result.summary.failed += 1;
                    }
                    result.per_user.insert(user_id, run);
                }
                BatchEntry::Cancelled(user_id) => result.cancelled_users.push(user_id),
            }
        }

        result.summary.total_users = total_users;
        result.summary.cancelled = result.cancelled_users.len();
        result.summary.peak_concurrency = peak.load(Ordering::SeqCst);
        result.summary.total_duration_seconds = started.elapsed().as_secs_f64();

        info!(
            successful = result.summary.successful,
            failed = result.summary.failed,
            cancelled = result.summary.cancelled,
            peak_concurrency = result.summary.peak_concurrency,
            duration_secs = result.summary.total_duration_seconds,
            "Batch pipeline finished"
        );

        Ok(result)
    }

    /// Returns whether runs are in flight plus storage aggregates.
    pub async fn get_pipeline_status(&self) -> Result<PipelineStatus, PipelineError> {
        let active_runs = self.active_runs.load(Ordering::SeqCst);
        let storage_statistics = self.storage.get_statistics().await?;
        let latest_versions = self.storage.latest_versions().await?;

        Ok(PipelineStatus {
            pipeline_status: if active_runs == 0 {
                PipelineState::Idle
            } else {
                PipelineState::Running
            },
            active_runs,
            storage_statistics,
            latest_versions,
        })
    }

    /// Gets the current configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Gets the storage manager shared with this orchestrator.
    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Number of user runs currently in flight.
    pub fn active_runs(&self) -> usize {
        self.active_runs.load(Ordering::SeqCst)
    }

    /// Lineage owner for versions written by batch runs.
    fn lineage_owner(&self, user_id: &str) -> String {
        match &self.config.batch_tag {
            Some(tag) => format!("{}:{}", tag, user_id),
            None => user_id.to_string(),
        }
    }

    async fn run_user(
        &self,
        user_id: &str,
        window: TimeWindow,
        validate_data: bool,
        owner: &str,
    ) -> PipelineRunResult {
        let _active = ActiveRun::enter(&self.active_runs, &self.metrics);
        let started = Instant::now();
        let mut result = PipelineRunResult::pending(user_id, window);

        info!(
            run_id = %result.run_id,
            user_id = %user_id,
            window = %window,
            validate = validate_data,
            "Starting user pipeline"
        );

        let outcome = self
            .execute(&mut result, window, validate_data, owner, started)
            .await;
        let result = match outcome {
            Ok(()) => result.completed(started.elapsed()),
            Err(error) => result.failed(error, started.elapsed()),
        };

        self.metrics
            .record_run(&result.state.to_string(), result.total_duration_seconds);

        if result.success {
            info!(
                run_id = %result.run_id,
                user_id = %user_id,
                records = result.records_collected(),
                duration_secs = result.total_duration_seconds,
                "User pipeline completed"
            );
        } else {
            warn!(
                run_id = %result.run_id,
                user_id = %user_id,
                state = %result.state,
                error = result.error.as_deref().unwrap_or("unknown"),
                "User pipeline unsuccessful"
            );
        }

        result
    }

    /// Drives the steps, filling `result` as they finish.
    ///
    /// `Err` carries the message of the step that failed the run.
    async fn execute(
        &self,
        result: &mut PipelineRunResult,
        window: TimeWindow,
        validate_data: bool,
        owner: &str,
        started: Instant,
    ) -> Result<(), String> {
        if result.user_id.trim().is_empty() {
            return Err("user_id cannot be empty".to_string());
        }

        self.initialize()
            .await
            .map_err(|e| format!("initialization failed: {}", e))?;

        // Collection
        result.state = RunState::Collecting;
        let step_start = Instant::now();
        let mut collection = CollectionStep::default();
        let collected = tokio::time::timeout(
            self.config.collection_timeout,
            self.collect(&result.user_id, window, &mut collection),
        )
        .await
        .unwrap_or(Err(CollectorError::Timeout(self.config.collection_timeout)));
        collection.duration_seconds = step_start.elapsed().as_secs_f64();
        self.metrics
            .record_step(STEP_COLLECTION, collection.duration_seconds);
        result.steps.data_collection = Some(collection);

        let batches = collected.map_err(|e| format!("collection failed: {}", e))?;
        debug!(
            run_id = %result.run_id,
            batches = batches.len(),
            records = result.records_collected(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Collection finished"
        );

        // Validation
        let batches = Arc::new(batches);
        let mut statuses = vec![ValidationStatus::Unvalidated; batches.len()];
        let mut validation_error = None;

        if validate_data {
            result.state = RunState::Validating;
            let step_start = Instant::now();
            match self.validator.validate_batches(Arc::clone(&batches)).await {
                Ok(reports) => {
                    statuses = reports
                        .iter()
                        .map(|r| ValidationStatus::from_report(Some(r)))
                        .collect();
                    let report = ValidationReport::merge(reports);
                    self.metrics.record_validation(&report);
                    result.steps.validation = ValidationStep::Completed {
                        duration_seconds: step_start.elapsed().as_secs_f64(),
                        report,
                    };
                }
                Err(e) => {
                    warn!(run_id = %result.run_id, error = %e, "Validation engine failed");
                    validation_error = Some(format!("validation failed: {}", e));
                    result.steps.validation = ValidationStep::Failed {
                        duration_seconds: step_start.elapsed().as_secs_f64(),
                        error: e.to_string(),
                    };
                }
            }
            self.metrics
                .record_step(STEP_VALIDATION, step_start.elapsed().as_secs_f64());
        }

        let invalid = result
            .steps
            .validation
            .report()
            .is_some_and(ValidationReport::is_fail);
        if invalid && self.config.gate_on_validation {
            result.steps.storage = Some(StorageStep {
                skipped_reason: Some("validation failed and storage is gated".to_string()),
                ..StorageStep::default()
            });
            return Err("validation failed; batch not stored".to_string());
        }

        // Storage
        result.state = RunState::Storing;
        let step_start = Instant::now();
        let mut storage = StorageStep::default();
        let stored = self
            .store(&batches, &statuses, owner, &mut storage)
            .await;
        storage.duration_seconds = step_start.elapsed().as_secs_f64();
        self.metrics.record_step(STEP_STORAGE, storage.duration_seconds);
        result.steps.storage = Some(storage);

        stored.map_err(|e| format!("storage failed: {}", e))?;

        // Surfaces an engine failure after the data is safely stored.
        if let Some(error) = validation_error {
            result.error = Some(error);
        }
        Ok(())
    }

    async fn collect(
        &self,
        user_id: &str,
        window: TimeWindow,
        step: &mut CollectionStep,
    ) -> Result<Vec<RecordBatch>, CollectorError> {
        let mut batches = Vec::with_capacity(self.config.data_kinds.len());

        for &kind in &self.config.data_kinds {
            let records = self.adapter.fetch(user_id, &window, kind).await?;
            if records.kind() != kind {
                return Err(CollectorError::InvalidResponse(format!(
                    "asked for {} records, adapter returned {}",
                    kind,
                    records.kind()
                )));
            }

            debug!(user_id = %user_id, kind = %kind, records = records.len(), "Fetched records");
            step.records_collected.insert(kind, records.len());
            self.metrics.record_collected(kind, records.len());
            batches.push(RecordBatch::new(user_id, window, records));
        }

        Ok(batches)
    }

    /// Stores every batch within the step's `storage_timeout` budget.
    ///
    /// A batch whose commit misses the deadline is discarded, so on timeout
    /// `step` lists exactly the versions that were committed.
    async fn store(
        &self,
        batches: &[RecordBatch],
        statuses: &[ValidationStatus],
        owner: &str,
        step: &mut StorageStep,
    ) -> Result<(), StorageError> {
        let budget = self.config.storage_timeout;
        let started = Instant::now();

        for (batch, &status) in batches.iter().zip(statuses) {
            let remaining = budget.saturating_sub(started.elapsed());
            let version = self
                .storage
                .store_as_within(batch, owner, status, remaining)
                .await
                .map_err(|e| match e {
                    StorageError::Timeout(_) => StorageError::Timeout(budget),
                    other => other,
                })?;
            self.metrics.record_version_stored(status);
            step.version_ids.insert(version.data_type, version.version_id);
            step.version_id = Some(version.version_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::InMemoryCollector;
    use crate::records::{CalendarEvent, EmailMessage, RecordKind, Records};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn good_event(id: &str) -> CalendarEvent {
        let start = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        CalendarEvent::new(id, "Planning", start, start + ChronoDuration::minutes(30))
    }

    fn good_email(id: &str) -> EmailMessage {
        EmailMessage::new(
            id,
            "a@example.com",
            vec!["b@example.com".to_string()],
            "status",
            "weekly status is attached here",
            Utc.with_ymd_and_hms(2024, 3, 6, 14, 0, 0).unwrap(),
        )
    }

    fn orchestrator(adapter: InMemoryCollector, config: PipelineConfig) -> PipelineOrchestrator {
        PipelineOrchestrator::new(config, Arc::new(adapter)).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = PipelineOrchestrator::new(
            PipelineConfig::default().with_max_concurrent_users(0),
            Arc::new(InMemoryCollector::new()),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_lineage_owner_uses_batch_tag() {
        let plain = orchestrator(InMemoryCollector::new(), PipelineConfig::default());
        assert_eq!(plain.lineage_owner("u1"), "u1");

        let tagged = orchestrator(
            InMemoryCollector::new(),
            PipelineConfig::default().with_batch_tag("nightly"),
        );
        assert_eq!(tagged.lineage_owner("u1"), "nightly:u1");
    }

    #[test]
    fn test_active_run_guard_restores_count() {
        let counter = AtomicUsize::new(0);
        let metrics = MetricsCollector::new();
        {
            let _a = ActiveRun::enter(&counter, &metrics);
            let _b = ActiveRun::enter(&counter, &metrics);
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let orch = orchestrator(InMemoryCollector::new(), PipelineConfig::default());
        orch.initialize().await.unwrap();
        orch.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stores_one_version_per_kind() {
        let adapter = InMemoryCollector::new()
            .with_records("u1", Records::CalendarEvent(vec![good_event("e1")]))
            .with_records("u1", Records::EmailMessage(vec![good_email("m1")]));
        let orch = orchestrator(adapter, PipelineConfig::default());

        let result = orch.run_user_pipeline("u1", window(), true).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.state, RunState::Completed);
        assert_eq!(result.records_collected(), 2);
        let storage = result.steps.storage.as_ref().unwrap();
        assert_eq!(storage.version_ids.len(), 2);
        assert_eq!(
            storage.version_id,
            storage.version_ids.get(&RecordKind::EmailMessage).copied()
        );
        assert_eq!(
            result.validation_report().unwrap().overall_status,
            crate::validation::OverallStatus::Pass
        );
    }

    #[tokio::test]
    async fn test_run_without_validation_stores_unvalidated() {
        let adapter = InMemoryCollector::new()
            .with_records("u1", Records::EmailMessage(vec![good_email("m1")]));
        let orch = orchestrator(
            adapter,
            PipelineConfig::default().with_data_kinds(vec![RecordKind::EmailMessage]),
        );

        let result = orch.run_user_pipeline("u1", window(), false).await;
        assert!(result.success);
        assert!(result.steps.validation.is_skipped());

        let version = orch
            .storage()
            .get_version(result.version_id().unwrap())
            .await
            .unwrap();
        assert_eq!(version.validation_status, ValidationStatus::Unvalidated);
    }

    #[tokio::test]
    async fn test_empty_user_id_fails_without_collecting() {
        let adapter = Arc::new(InMemoryCollector::new());
        let orch =
            PipelineOrchestrator::new(PipelineConfig::default(), adapter.clone()).unwrap();

        let result = orch.run_user_pipeline("  ", window(), true).await;
        assert!(!result.success);
        assert_eq!(result.state, RunState::Failed);
        assert_eq!(adapter.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_rejects_zero_concurrency() {
        let orch = orchestrator(InMemoryCollector::new(), PipelineConfig::default());
        let err = orch
            .run_batch_pipeline(["u1"], window(), 0, true)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert_eq!(orch.active_runs(), 0);
    }

    #[tokio::test]
    async fn test_batch_deduplicates_user_ids() {
        let orch = orchestrator(InMemoryCollector::new(), PipelineConfig::default());
        let result = orch
            .run_batch_pipeline(["u1", "u2", "u1"], window(), 2, true)
            .await
            .unwrap();
        assert_eq!(result.summary.total_users, 2);
        assert_eq!(result.per_user.len(), 2);
        assert_eq!(result.summary.successful, 2);
    }

    #[tokio::test]
    async fn test_status_idle_after_runs() {
        let orch = orchestrator(InMemoryCollector::new(), PipelineConfig::default());
        orch.run_user_pipeline("u1", window(), true).await;

        let status = orch.get_pipeline_status().await.unwrap();
        assert_eq!(status.pipeline_status, PipelineState::Idle);
        assert_eq!(status.active_runs, 0);
        assert_eq!(status.storage_statistics.total_versions, 2);
        assert_eq!(status.latest_versions.len(), 2);
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::Config(ConfigError::ValidationFailed("bad".to_string()));
        assert!(err.to_string().contains("Configuration error"));

        let err = PipelineError::Collection(CollectorError::Unavailable("down".to_string()));
        assert!(err.to_string().contains("down"));

        let err = PipelineError::Storage(StorageError::NotFound("v1".to_string()));
        assert!(err.to_string().contains("Storage error"));
    }
}
