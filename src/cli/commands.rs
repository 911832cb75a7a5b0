//! CLI command definitions for the behavioral data pipeline.
//!
//! Records are read from a fixture directory (`<dir>/<user_id>/<kind>.json`)
//! and versions are written under a store directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

use crate::collectors::JsonDirCollector;
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::config::parse_kinds;
use crate::pipeline::{
    BatchRunResult, CancellationHandle, PipelineConfig, PipelineOrchestrator, PipelineRunResult,
    PipelineStatus, ValidationStep,
};
use crate::records::{RecordKind, TimeWindow};
use crate::storage::{
    DatasetVersion, FileBackend, Lineage, StorageManager, ValidationStatus, VersionFilter,
    VersionId,
};

/// Default directory holding per-user record exports.
const DEFAULT_FIXTURES_DIR: &str = "./fixtures";

/// Default directory for stored versions.
const DEFAULT_STORE_DIR: &str = "./pipeline-store";

/// Failing checks shown per run in text output.
const MAX_LISTED_FAILURES: usize = 5;

/// Behavioral data pipeline: collect, validate and version user records.
#[derive(Parser)]
#[command(name = "burnout-pipeline")]
#[command(about = "Collect, validate and version behavioral records for burnout-risk analysis")]
#[command(version)]
#[command(
    long_about = "burnout-pipeline ingests calendar and email records per user, validates them and stores each batch as an immutable, lineage-tracked version.\n\nExample usage:\n  burnout-pipeline batch --all --fixtures ./fixtures --store ./pipeline-store --days 7"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file; defaults come from PIPELINE_* variables otherwise.
    #[arg(long, global = true, env = "PIPELINE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the pipeline for a single user.
    Run(RunArgs),

    /// Run the pipeline for many users with bounded concurrency.
    Batch(BatchArgs),

    /// Show whether runs are active plus storage aggregates.
    Status(StoreArgs),

    /// Show the ancestry of a stored version.
    Lineage(LineageArgs),

    /// Show storage statistics.
    #[command(alias = "statistics")]
    Stats(StoreArgs),

    /// List stored versions, most recent first.
    #[command(alias = "ls")]
    Versions(VersionsArgs),
}

/// Location of the version store.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Directory holding stored versions.
    #[arg(long, default_value = DEFAULT_STORE_DIR)]
    pub store: PathBuf,

    /// Output as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Options shared by `run` and `batch`.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Directory with `<user_id>/<kind>.json` exports.
    #[arg(long, default_value = DEFAULT_FIXTURES_DIR)]
    pub fixtures: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Window start (RFC 3339). Requires --end.
    #[arg(long, requires = "end")]
    pub start: Option<String>,

    /// Window end (RFC 3339). Requires --start.
    #[arg(long, requires = "start")]
    pub end: Option<String>,

    /// Trailing window length in days, ending now. Ignored with --start/--end.
    #[arg(long, default_value = "7")]
    pub days: i64,

    /// Comma-separated record kinds to collect.
    #[arg(long)]
    pub kinds: Option<String>,

    /// Skip validation.
    #[arg(long)]
    pub no_validate: bool,

    /// Do not store batches that fail validation.
    #[arg(long)]
    pub gate: bool,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// User to process.
    pub user_id: String,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Arguments for the `batch` command.
#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Users to process.
    #[arg(required_unless_present = "all")]
    pub user_ids: Vec<String>,

    /// Process every user directory in the fixture directory.
    #[arg(long, conflicts_with = "user_ids")]
    pub all: bool,

    /// Maximum users processed at once (default from configuration).
    #[arg(short = 'c', long)]
    pub max_concurrent: Option<usize>,

    /// Lineage owner prefix for the versions this batch writes.
    #[arg(long)]
    pub batch_tag: Option<String>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Arguments for the `lineage` command.
#[derive(Args, Debug)]
pub struct LineageArgs {
    /// Version id, e.g. v0000000042.
    pub version_id: String,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Validation status filter for `versions`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusArg {
    Unvalidated,
    Valid,
    Invalid,
}

impl From<StatusArg> for ValidationStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Unvalidated => ValidationStatus::Unvalidated,
            StatusArg::Valid => ValidationStatus::Valid,
            StatusArg::Invalid => ValidationStatus::Invalid,
        }
    }
}

/// Arguments for the `versions` command.
#[derive(Args, Debug)]
pub struct VersionsArgs {
    /// Only versions owned by this user or batch tag.
    #[arg(short = 'u', long)]
    pub owner: Option<String>,

    /// Only versions of this record kind.
    #[arg(short = 'k', long)]
    pub kind: Option<RecordKind>,

    /// Only versions with this validation status.
    #[arg(short = 's', long, value_enum)]
    pub status: Option<StatusArg>,

    /// Maximum versions listed.
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let base = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Run(args) => run_user_command(base, args).await,
        Commands::Batch(args) => run_batch_command(base, args).await,
        Commands::Status(args) => run_status_command(base, args).await,
        Commands::Lineage(args) => run_lineage_command(args).await,
        Commands::Stats(args) => run_stats_command(args).await,
        Commands::Versions(args) => run_versions_command(args).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_yaml_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path.display(), e))?,
        None => PipelineConfig::from_env()?,
    };
    Ok(config)
}

/// Applies command-line overrides to the base configuration.
fn pipeline_config(mut config: PipelineConfig, args: &PipelineArgs) -> anyhow::Result<PipelineConfig> {
    if let Some(kinds) = &args.kinds {
        config.data_kinds = parse_kinds(kinds)?;
    }
    if args.no_validate {
        config.validate_data = false;
    }
    if args.gate {
        config.gate_on_validation = true;
    }
    let config = config.with_file_storage(&args.store.store);
    config.validate()?;
    Ok(config)
}

fn resolve_window(args: &PipelineArgs) -> anyhow::Result<TimeWindow> {
    let window = match (&args.start, &args.end) {
        (Some(start), Some(end)) => TimeWindow::parse(start, end)?,
        _ => TimeWindow::trailing_days(Utc::now(), args.days)?,
    };
    Ok(window)
}

fn build_orchestrator(
    config: PipelineConfig,
    fixtures: &Path,
) -> anyhow::Result<PipelineOrchestrator> {
    let adapter = Arc::new(JsonDirCollector::new(fixtures));
    Ok(PipelineOrchestrator::new(config, adapter)?)
}

fn open_store(args: &StoreArgs) -> StorageManager {
    StorageManager::new(Arc::new(FileBackend::new(&args.store)))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
    println!("{}", json);
    Ok(())
}

// ============================================================================
// Pipeline commands
// ============================================================================

async fn run_user_command(base: PipelineConfig, args: RunArgs) -> anyhow::Result<()> {
    let config = pipeline_config(base, &args.pipeline)?;
    let window = resolve_window(&args.pipeline)?;
    let validate = config.validate_data;

    if args.pipeline.metrics {
        init_metrics()?;
    }

    let orchestrator = build_orchestrator(config, &args.pipeline.fixtures)?;
    orchestrator.initialize().await?;

    let result = orchestrator
        .run_user_pipeline(&args.user_id, window, validate)
        .await;

    if args.pipeline.store.json {
        print_json(&result)?;
    } else {
        print_run(&result);
    }
    if args.pipeline.metrics {
        print!("{}", export_metrics());
    }

    if !result.success {
        anyhow::bail!(
            "Pipeline run for {} was unsuccessful: {}",
            args.user_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn run_batch_command(base: PipelineConfig, args: BatchArgs) -> anyhow::Result<()> {
    let mut config = pipeline_config(base, &args.pipeline)?;
    if let Some(tag) = &args.batch_tag {
        config = config.with_batch_tag(tag.clone());
    }
    let window = resolve_window(&args.pipeline)?;
    let validate = config.validate_data;
    let max_concurrent = args.max_concurrent.unwrap_or(config.max_concurrent_users);

    if args.pipeline.metrics {
        init_metrics()?;
    }

    let fixtures = JsonDirCollector::new(&args.pipeline.fixtures);
    let user_ids = if args.all {
        fixtures.list_users().await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to list users in {}: {}",
                args.pipeline.fixtures.display(),
                e
            )
        })?
    } else {
        args.user_ids.clone()
    };
    if user_ids.is_empty() {
        warn!(fixtures = %args.pipeline.fixtures.display(), "No users to process");
    }

    let orchestrator = build_orchestrator(config, &args.pipeline.fixtures)?;
    orchestrator.initialize().await?;

    let cancel = CancellationHandle::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing in-flight users");
            on_interrupt.cancel();
        }
    });

    let result = orchestrator
        .run_batch_pipeline_with_cancel(user_ids, window, max_concurrent, validate, &cancel)
        .await;
    interrupt.abort();
    let result = result?;

    if args.pipeline.store.json {
        print_json(&result)?;
    } else {
        print_batch(&result);
    }
    if args.pipeline.metrics {
        print!("{}", export_metrics());
    }

    if result.summary.failed > 0 {
        anyhow::bail!(
            "{} of {} users failed",
            result.summary.failed,
            result.summary.total_users
        );
    }
    Ok(())
}

async fn run_status_command(base: PipelineConfig, args: StoreArgs) -> anyhow::Result<()> {
    let config = base.with_file_storage(&args.store);
    let orchestrator = build_orchestrator(config, Path::new(DEFAULT_FIXTURES_DIR))?;
    let status = orchestrator.get_pipeline_status().await?;

    if args.json {
        print_json(&status)
    } else {
        print_status(&status);
        Ok(())
    }
}

// ============================================================================
// Storage commands
// ============================================================================

async fn run_lineage_command(args: LineageArgs) -> anyhow::Result<()> {
    let version_id: VersionId = args.version_id.parse()?;

    let storage = open_store(&args.store);
    let lineage = storage.get_data_lineage(version_id).await?;

    if args.store.json {
        print_json(&lineage)
    } else {
        print_lineage(&lineage);
        Ok(())
    }
}

async fn run_stats_command(args: StoreArgs) -> anyhow::Result<()> {
    let storage = open_store(&args);
    let stats = storage.get_statistics().await?;

    if args.json {
        return print_json(&stats);
    }

    println!("Versions:      {}", stats.total_versions);
    println!("  valid:       {}", stats.valid_versions);
    println!("  invalid:     {}", stats.invalid_versions);
    println!("  unvalidated: {}", stats.unvalidated_versions);
    println!("Records:       {}", stats.total_records);
    println!("Size:          {:.3} MB", stats.total_size_mb);
    Ok(())
}

async fn run_versions_command(args: VersionsArgs) -> anyhow::Result<()> {
    let mut filter = VersionFilter::new().with_limit(args.limit);
    if let Some(owner) = &args.owner {
        filter = filter.with_owner(owner.clone());
    }
    if let Some(kind) = args.kind {
        filter = filter.with_data_type(kind);
    }
    if let Some(status) = args.status {
        filter = filter.with_status(status.into());
    }

    let storage = open_store(&args.store);
    let versions = storage.list_versions(&filter).await?;

    if args.store.json {
        return print_json(&versions);
    }

    if versions.is_empty() {
        println!("No versions found");
    }
    for version in &versions {
        print_version(version);
    }
    Ok(())
}

// ============================================================================
// Text output
// ============================================================================

fn print_run(result: &PipelineRunResult) {
    let verdict = if result.success { "success" } else { "unsuccessful" };
    println!(
        "{} [{}] {} in {:.3}s",
        result.user_id, result.state, verdict, result.total_duration_seconds
    );
    println!("  window: {}", result.window);

    if let Some(collection) = &result.steps.data_collection {
        let counts: Vec<String> = collection
            .records_collected
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect();
        println!("  collected: {}", counts.join(" "));
    }

    match &result.steps.validation {
        ValidationStep::Skipped => println!("  validation: skipped"),
        ValidationStep::Failed { error, .. } => println!("  validation: engine error: {}", error),
        ValidationStep::Completed { report, .. } => {
            println!(
                "  validation: {} ({} checks, {} failing errors, {} failing warnings)",
                report.overall_status,
                report.total_checks,
                report.failed_errors,
                report.failed_warnings
            );
            for check in report.failures().take(MAX_LISTED_FAILURES) {
                println!(
                    "    {} {} [{}]: {}",
                    check.severity, check.check_name, check.record_id, check.message
                );
            }
            let more = report.failures().count().saturating_sub(MAX_LISTED_FAILURES);
            if more > 0 {
                println!("    ... {} more", more);
            }
        }
    }

    if let Some(storage) = &result.steps.storage {
        if let Some(reason) = &storage.skipped_reason {
            println!("  storage: skipped ({})", reason);
        } else {
            let ids: Vec<String> = storage
                .version_ids
                .iter()
                .map(|(kind, id)| format!("{}={}", kind, id))
                .collect();
            println!("  stored: {}", ids.join(" "));
        }
    }

    if let Some(error) = &result.error {
        println!("  error: {}", error);
    }
}

fn print_batch(result: &BatchRunResult) {
    for run in result.per_user.values() {
        print_run(run);
    }
    for user_id in &result.cancelled_users {
        println!("{} [cancelled]", user_id);
    }

    let summary = &result.summary;
    println!();
    println!(
        "{} users: {} successful, {} failed, {} cancelled in {:.3}s (peak concurrency {})",
        summary.total_users,
        summary.successful,
        summary.failed,
        summary.cancelled,
        summary.total_duration_seconds,
        summary.peak_concurrency
    );
}

fn print_status(status: &PipelineStatus) {
    println!(
        "Pipeline: {} ({} active runs)",
        status.pipeline_status, status.active_runs
    );
    let stats = &status.storage_statistics;
    println!(
        "Storage: {} versions, {} records, {:.3} MB",
        stats.total_versions, stats.total_records, stats.total_size_mb
    );
    if !status.latest_versions.is_empty() {
        println!("Latest versions:");
        for version in &status.latest_versions {
            print_version(version);
        }
    }
}

fn print_lineage(lineage: &Lineage) {
    println!(
        "{} ({}, {} records)",
        lineage.version_id, lineage.data_type, lineage.record_count
    );
    match lineage.parent_version_id {
        Some(parent) => println!("  parent: {}", parent),
        None => println!("  parent: none (chain root)"),
    }
    if !lineage.ancestors.is_empty() {
        let ancestors: Vec<String> = lineage.ancestors.iter().map(ToString::to_string).collect();
        println!("  ancestors: {}", ancestors.join(" -> "));
    }
}

fn print_version(version: &DatasetVersion) {
    println!(
        "  {}  {:<14} {:<20} {:>6} records  {:<11} {}",
        version.version_id,
        version.data_type.as_str(),
        version.source.owner,
        version.record_count,
        version.validation_status.to_string(),
        version.created_at.to_rfc3339()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let cli = Cli::try_parse_from(["burnout-pipeline", "run", "alice"]).expect("should parse");

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.user_id, "alice");
                assert_eq!(args.pipeline.fixtures, PathBuf::from(DEFAULT_FIXTURES_DIR));
                assert_eq!(args.pipeline.store.store, PathBuf::from(DEFAULT_STORE_DIR));
                assert_eq!(args.pipeline.days, 7);
                assert!(args.pipeline.start.is_none());
                assert!(!args.pipeline.no_validate);
                assert!(!args.pipeline.gate);
                assert!(!args.pipeline.store.json);
            }
            _ => panic!("Expected Run command"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_batch_command_with_options() {
        let cli = Cli::try_parse_from([
            "burnout-pipeline",
            "batch",
            "alice",
            "bob",
            "-c",
            "2",
            "--batch-tag",
            "nightly",
            "--kinds",
            "email",
            "--start",
            "2024-03-01T00:00:00Z",
            "--end",
            "2024-03-08T00:00:00Z",
            "--gate",
            "-j",
            "--log-level",
            "debug",
        ])
        .expect("should parse");

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Batch(args) => {
                assert_eq!(args.user_ids, vec!["alice", "bob"]);
                assert!(!args.all);
                assert_eq!(args.max_concurrent, Some(2));
                assert_eq!(args.batch_tag.as_deref(), Some("nightly"));
                assert_eq!(args.pipeline.kinds.as_deref(), Some("email"));
                assert!(args.pipeline.gate);
                assert!(args.pipeline.store.json);

                let window = resolve_window(&args.pipeline).unwrap();
                assert_eq!(window.start().to_rfc3339(), "2024-03-01T00:00:00+00:00");
            }
            _ => panic!("Expected Batch command"),
        }
    }

    #[test]
    fn test_batch_requires_users_or_all() {
        assert!(Cli::try_parse_from(["burnout-pipeline", "batch"]).is_err());
        assert!(Cli::try_parse_from(["burnout-pipeline", "batch", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["burnout-pipeline", "batch", "--all", "alice"]).is_err());
    }

    #[test]
    fn test_window_bounds_require_each_other() {
        let result = Cli::try_parse_from([
            "burnout-pipeline",
            "run",
            "alice",
            "--start",
            "2024-03-01T00:00:00Z",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_range_days_is_an_error() {
        let cli = Cli::try_parse_from(["burnout-pipeline", "run", "alice", "--days", "1000000000"])
            .expect("should parse");

        match cli.command {
            Commands::Run(args) => {
                let err = resolve_window(&args.pipeline).unwrap_err();
                assert!(err.to_string().contains("days"));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_versions_command_filters() {
        let cli = Cli::try_parse_from([
            "burnout-pipeline",
            "versions",
            "--owner",
            "alice",
            "--kind",
            "calendar_event",
            "--status",
            "invalid",
            "-n",
            "5",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Versions(args) => {
                assert_eq!(args.owner.as_deref(), Some("alice"));
                assert_eq!(args.kind, Some(RecordKind::CalendarEvent));
                assert_eq!(args.status, Some(StatusArg::Invalid));
                assert_eq!(args.limit, 5);
            }
            _ => panic!("Expected Versions command"),
        }
    }

    #[test]
    fn test_stats_alias() {
        let cli = Cli::try_parse_from(["burnout-pipeline", "statistics", "--store", "/tmp/s"])
            .expect("should parse with alias");
        match cli.command {
            Commands::Stats(args) => assert_eq!(args.store, PathBuf::from("/tmp/s")),
            _ => panic!("Expected Stats command"),
        }
    }

    #[test]
    fn test_pipeline_config_overrides() {
        let cli = Cli::try_parse_from([
            "burnout-pipeline",
            "run",
            "alice",
            "--store",
            "/tmp/store",
            "--kinds",
            "calendar_event",
            "--no-validate",
            "--gate",
        ])
        .expect("should parse");

        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        let config = pipeline_config(PipelineConfig::default(), &args.pipeline).unwrap();
        assert_eq!(config.data_kinds, vec![RecordKind::CalendarEvent]);
        assert!(!config.validate_data);
        assert!(config.gate_on_validation);
        assert_eq!(config.storage_path, PathBuf::from("/tmp/store"));
    }

    #[test]
    fn test_pipeline_config_rejects_unknown_kind() {
        let cli = Cli::try_parse_from(["burnout-pipeline", "run", "alice", "--kinds", "slack"])
            .expect("should parse");
        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        assert!(pipeline_config(PipelineConfig::default(), &args.pipeline).is_err());
    }

    #[test]
    fn test_status_arg_maps_to_validation_status() {
        assert_eq!(
            ValidationStatus::from(StatusArg::Unvalidated),
            ValidationStatus::Unvalidated
        );
        assert_eq!(ValidationStatus::from(StatusArg::Valid), ValidationStatus::Valid);
        assert_eq!(
            ValidationStatus::from(StatusArg::Invalid),
            ValidationStatus::Invalid
        );
    }

    #[tokio::test]
    async fn test_stats_and_versions_on_empty_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StoreArgs {
            store: dir.path().to_path_buf(),
            json: true,
        };
        run_stats_command(store.clone()).await.unwrap();
        run_versions_command(VersionsArgs {
            owner: None,
            kind: None,
            status: None,
            limit: 10,
            store,
        })
        .await
        .unwrap();
    }
}
