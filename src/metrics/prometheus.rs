//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by the pipeline and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all pipeline metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of user runs, labeled by terminal state.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// End-to-end duration of a user run in seconds.
pub static RUN_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Duration of each pipeline step in seconds, labeled by step.
pub static STEP_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Total records collected, labeled by record kind.
pub static RECORDS_COLLECTED: OnceLock<CounterVec> = OnceLock::new();

/// Total failing validation checks, labeled by check name and severity.
pub static VALIDATION_FAILURES: OnceLock<CounterVec> = OnceLock::new();

/// Total versions stored, labeled by validation status.
pub static VERSIONS_STORED: OnceLock<CounterVec> = OnceLock::new();

/// Number of user runs currently in flight.
pub static ACTIVE_RUNS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Run metrics
    let runs_total = CounterVec::new(
        Opts::new("burnout_pipeline_runs_total", "Total number of user runs"),
        &["status"],
    )?;

    let run_duration = Histogram::with_opts(
        HistogramOpts::new(
            "burnout_pipeline_run_duration_seconds",
            "User run duration in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
    )?;

    let step_duration = HistogramVec::new(
        HistogramOpts::new(
            "burnout_pipeline_step_duration_seconds",
            "Pipeline step duration in seconds",
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["step"],
    )?;

    // Data metrics
    let records_collected = CounterVec::new(
        Opts::new(
            "burnout_pipeline_records_collected_total",
            "Total records collected",
        ),
        &["kind"],
    )?;

    let validation_failures = CounterVec::new(
        Opts::new(
            "burnout_pipeline_validation_failures_total",
            "Total failing validation checks",
        ),
        &["check", "severity"],
    )?;

    let versions_stored = CounterVec::new(
        Opts::new(
            "burnout_pipeline_versions_stored_total",
            "Total dataset versions stored",
        ),
        &["validation_status"],
    )?;

    let active_runs = Gauge::new(
        "burnout_pipeline_active_runs",
        "Number of user runs currently in flight",
    )?;

    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(run_duration.clone()))?;
    registry.register(Box::new(step_duration.clone()))?;
    registry.register(Box::new(records_collected.clone()))?;
    registry.register(Box::new(validation_failures.clone()))?;
    registry.register(Box::new(versions_stored.clone()))?;
    registry.register(Box::new(active_runs.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = RUN_DURATION.set(run_duration);
    let _ = STEP_DURATION.set(step_duration);
    let _ = RECORDS_COLLECTED.set(records_collected);
    let _ = VALIDATION_FAILURES.set(validation_failures);
    let _ = VERSIONS_STORED.set(versions_stored);
    let _ = ACTIVE_RUNS.set(active_runs);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
