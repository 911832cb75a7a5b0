//! Command-line interface for the pipeline.
//!
//! Provides commands for single-user and batch runs, pipeline status, and
//! storage inspection (lineage, statistics, version listing).

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
