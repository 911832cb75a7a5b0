//! Pipeline configuration for the orchestrator.
//!
//! Covers concurrency limits, which record kinds are collected, validation
//! behavior, per-step timeouts and where versions are stored. Values come from
//! defaults, `PIPELINE_*` environment variables or a YAML file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::records::RecordKind;
use crate::validation::DEFAULT_SHORT_BODY_WORDS;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A setting or argument has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Where dataset versions are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// Process-local, lost on exit.
    #[default]
    Memory,
    /// One JSON file per payload and manifest under `storage_path`.
    File,
}

impl FromStr for StorageBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageBackendKind::Memory),
            "file" | "fs" => Ok(StorageBackendKind::File),
            other => Err(ConfigError::InvalidValue {
                key: "storage_backend".to_string(),
                message: format!("expected 'memory' or 'file', got '{}'", other),
            }),
        }
    }
}

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Execution settings
    /// Default cap on concurrent user runs in a batch.
    pub max_concurrent_users: usize,
    /// Record kinds fetched for every user, in collection order.
    pub data_kinds: Vec<RecordKind>,

    // Validation settings
    /// Whether runs validate collected data by default.
    pub validate_data: bool,
    /// When set, batches failing validation are not stored.
    pub gate_on_validation: bool,
    /// Minimum body length in words before `short_body` warns.
    pub short_body_words: usize,

    // Timeouts
    /// Upper bound for collecting one user's records.
    pub collection_timeout: Duration,
    /// Upper bound for storing one user's batches.
    pub storage_timeout: Duration,

    // Storage settings
    pub storage_backend: StorageBackendKind,
    /// Root directory for the file backend.
    pub storage_path: PathBuf,
    /// Prefix for lineage owners of versions written by batch runs.
    pub batch_tag: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_users: 4,
            data_kinds: RecordKind::ALL.to_vec(),

            validate_data: true,
            gate_on_validation: false,
            short_body_words: DEFAULT_SHORT_BODY_WORDS,

            collection_timeout: Duration::from_secs(60),
            storage_timeout: Duration::from_secs(30),

            storage_backend: StorageBackendKind::Memory,
            storage_path: PathBuf::from("./pipeline-store"),
            batch_tag: None,
        }
    }
}

/// On-disk shape of the YAML configuration. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    max_concurrent_users: Option<usize>,
    data_kinds: Option<Vec<RecordKind>>,
    validate_data: Option<bool>,
    gate_on_validation: Option<bool>,
    short_body_words: Option<usize>,
    collection_timeout_secs: Option<u64>,
    storage_timeout_secs: Option<u64>,
    storage_backend: Option<StorageBackendKind>,
    storage_path: Option<PathBuf>,
    batch_tag: Option<String>,
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PIPELINE_MAX_CONCURRENT_USERS`: Concurrent user runs (default: 4)
    /// - `PIPELINE_DATA_KINDS`: Comma-separated kinds (default: calendar_event,email_message)
    /// - `PIPELINE_VALIDATE_DATA`: Validate collected data (default: true)
    /// - `PIPELINE_GATE_ON_VALIDATION`: Skip storing invalid batches (default: false)
    /// - `PIPELINE_SHORT_BODY_WORDS`: Short body threshold (default: 3)
    /// - `PIPELINE_COLLECTION_TIMEOUT_SECS`: Collection timeout (default: 60)
    /// - `PIPELINE_STORAGE_TIMEOUT_SECS`: Storage timeout (default: 30)
    /// - `PIPELINE_STORAGE_BACKEND`: `memory` or `file` (default: memory)
    /// - `PIPELINE_STORAGE_PATH`: File backend root (default: ./pipeline-store)
    /// - `PIPELINE_BATCH_TAG`: Lineage owner prefix for batch runs
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PIPELINE_MAX_CONCURRENT_USERS") {
            config.max_concurrent_users = parse_env_value(&val, "PIPELINE_MAX_CONCURRENT_USERS")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_DATA_KINDS") {
            config.data_kinds = parse_kinds(&val)?;
        }

        if let Ok(val) = std::env::var("PIPELINE_VALIDATE_DATA") {
            config.validate_data = parse_env_bool(&val, "PIPELINE_VALIDATE_DATA")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_GATE_ON_VALIDATION") {
            config.gate_on_validation = parse_env_bool(&val, "PIPELINE_GATE_ON_VALIDATION")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_SHORT_BODY_WORDS") {
            config.short_body_words = parse_env_value(&val, "PIPELINE_SHORT_BODY_WORDS")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_COLLECTION_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPELINE_COLLECTION_TIMEOUT_SECS")?;
            config.collection_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PIPELINE_STORAGE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPELINE_STORAGE_TIMEOUT_SECS")?;
            config.storage_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PIPELINE_STORAGE_BACKEND") {
            config.storage_backend = val.parse()?;
        }

        if let Ok(val) = std::env::var("PIPELINE_STORAGE_PATH") {
            config.storage_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PIPELINE_BATCH_TAG") {
            let tag = val.trim();
            config.batch_tag = (!tag.is_empty()).then(|| tag.to_string());
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file, filling absent keys with defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Parses configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(content)?;
        let mut config = Self::default();

        if let Some(v) = file.max_concurrent_users {
            config.max_concurrent_users = v;
        }
        if let Some(v) = file.data_kinds {
            config.data_kinds = v;
        }
        if let Some(v) = file.validate_data {
            config.validate_data = v;
        }
        if let Some(v) = file.gate_on_validation {
            config.gate_on_validation = v;
        }
        if let Some(v) = file.short_body_words {
            config.short_body_words = v;
        }
        if let Some(secs) = file.collection_timeout_secs {
            config.collection_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.storage_timeout_secs {
            config.storage_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = file.storage_backend {
            config.storage_backend = v;
        }
        if let Some(v) = file.storage_path {
            config.storage_path = v;
        }
        config.batch_tag = file.batch_tag.filter(|t| !t.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_users == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_users must be greater than 0".to_string(),
            ));
        }

        if self.data_kinds.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "data_kinds cannot be empty".to_string(),
            ));
        }

        for (i, kind) in self.data_kinds.iter().enumerate() {
            if self.data_kinds[..i].contains(kind) {
                return Err(ConfigError::ValidationFailed(format!(
                    "data_kinds lists '{}' more than once",
                    kind
                )));
            }
        }

        if self.collection_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "collection_timeout must be greater than 0".to_string(),
            ));
        }

        if self.storage_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "storage_timeout must be greater than 0".to_string(),
            ));
        }

        if self.storage_backend == StorageBackendKind::File
            && self.storage_path.as_os_str().is_empty()
        {
            return Err(ConfigError::ValidationFailed(
                "storage_path cannot be empty for the file backend".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the default concurrency cap.
    pub fn with_max_concurrent_users(mut self, max: usize) -> Self {
        self.max_concurrent_users = max;
        self
    }

    /// Builder method to set the collected record kinds.
    pub fn with_data_kinds(mut self, kinds: Vec<RecordKind>) -> Self {
        self.data_kinds = kinds;
        self
    }

    pub fn with_validate_data(mut self, enabled: bool) -> Self {
        self.validate_data = enabled;
        self
    }

    /// Builder method to stop invalid batches from being stored.
    pub fn with_gate_on_validation(mut self, enabled: bool) -> Self {
        self.gate_on_validation = enabled;
        self
    }

    pub fn with_short_body_words(mut self, words: usize) -> Self {
        self.short_body_words = words;
        self
    }

    /// Builder method to set the collection timeout.
    pub fn with_collection_timeout(mut self, timeout: Duration) -> Self {
        self.collection_timeout = timeout;
        self
    }

    /// Builder method to set the storage timeout.
    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Builder method to use the file backend rooted at `path`.
    pub fn with_file_storage(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_backend = StorageBackendKind::File;
        self.storage_path = path.into();
        self
    }

    pub fn with_batch_tag(mut self, tag: impl Into<String>) -> Self {
        self.batch_tag = Some(tag.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Parses a comma-separated list of record kinds.
pub fn parse_kinds(value: &str) -> Result<Vec<RecordKind>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(RecordKind::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrent_users, 4);
        assert_eq!(
            config.data_kinds,
            vec![RecordKind::CalendarEvent, RecordKind::EmailMessage]
        );
        assert!(config.validate_data);
        assert!(!config.gate_on_validation);
        assert_eq!(config.short_body_words, 3);
        assert_eq!(config.collection_timeout, Duration::from_secs(60));
        assert_eq!(config.storage_timeout, Duration::from_secs(30));
        assert_eq!(config.storage_backend, StorageBackendKind::Memory);
        assert!(config.batch_tag.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::new()
            .with_max_concurrent_users(8)
            .with_data_kinds(vec![RecordKind::EmailMessage])
            .with_validate_data(false)
            .with_gate_on_validation(true)
            .with_short_body_words(5)
            .with_collection_timeout(Duration::from_secs(5))
            .with_storage_timeout(Duration::from_secs(2))
            .with_file_storage("/tmp/store")
            .with_batch_tag("nightly");

        assert_eq!(config.max_concurrent_users, 8);
        assert_eq!(config.data_kinds, vec![RecordKind::EmailMessage]);
        assert!(!config.validate_data);
        assert!(config.gate_on_validation);
        assert_eq!(config.short_body_words, 5);
        assert_eq!(config.collection_timeout, Duration::from_secs(5));
        assert_eq!(config.storage_timeout, Duration::from_secs(2));
        assert_eq!(config.storage_backend, StorageBackendKind::File);
        assert_eq!(config.storage_path, PathBuf::from("/tmp/store"));
        assert_eq!(config.batch_tag.as_deref(), Some("nightly"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_zero_concurrency() {
        let result = PipelineConfig::default()
            .with_max_concurrent_users(0)
            .validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("max_concurrent_users"));
    }

    #[test]
    fn test_validation_empty_kinds() {
        let result = PipelineConfig::default().with_data_kinds(vec![]).validate();
        assert!(result.unwrap_err().to_string().contains("data_kinds"));
    }

    #[test]
    fn test_validation_duplicate_kinds() {
        let result = PipelineConfig::default()
            .with_data_kinds(vec![RecordKind::EmailMessage, RecordKind::EmailMessage])
            .validate();
        assert!(result.unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn test_validation_zero_timeouts() {
        let result = PipelineConfig::default()
            .with_collection_timeout(Duration::ZERO)
            .validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("collection_timeout"));

        let result = PipelineConfig::default()
            .with_storage_timeout(Duration::ZERO)
            .validate();
        assert!(result.unwrap_err().to_string().contains("storage_timeout"));
    }

    #[test]
    fn test_validation_empty_storage_path() {
        let result = PipelineConfig::default().with_file_storage("").validate();
        assert!(result.unwrap_err().to_string().contains("storage_path"));
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = PipelineConfig::from_yaml_str(
            "max_concurrent_users: 2\n\
             data_kinds: [email_message]\n\
             gate_on_validation: true\n\
             collection_timeout_secs: 10\n\
             storage_backend: file\n\
             storage_path: /var/lib/pipeline\n\
             batch_tag: weekly\n",
        )
        .unwrap();

        assert_eq!(config.max_concurrent_users, 2);
        assert_eq!(config.data_kinds, vec![RecordKind::EmailMessage]);
        assert!(config.gate_on_validation);
        assert!(config.validate_data);
        assert_eq!(config.collection_timeout, Duration::from_secs(10));
        assert_eq!(config.storage_timeout, Duration::from_secs(30));
        assert_eq!(config.storage_backend, StorageBackendKind::File);
        assert_eq!(config.storage_path, PathBuf::from("/var/lib/pipeline"));
        assert_eq!(config.batch_tag.as_deref(), Some("weekly"));
    }

    #[test]
    fn test_from_yaml_rejects_unknown_keys() {
        let err = PipelineConfig::from_yaml_str("max_steps: 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_from_yaml_runs_validation() {
        let err = PipelineConfig::from_yaml_str("max_concurrent_users: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed(_)));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, "validate_data: false\nshort_body_words: 7\n").unwrap();

        let config = PipelineConfig::from_yaml_file(&path).unwrap();
        assert!(!config.validate_data);
        assert_eq!(config.short_body_words, 7);

        let missing = PipelineConfig::from_yaml_file(dir.path().join("absent.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!(
            "memory".parse::<StorageBackendKind>().unwrap(),
            StorageBackendKind::Memory
        );
        assert_eq!(
            "FILE".parse::<StorageBackendKind>().unwrap(),
            StorageBackendKind::File
        );
        assert!("postgres".parse::<StorageBackendKind>().is_err());
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!(
            parse_kinds("calendar_event, email_message").unwrap(),
            vec![RecordKind::CalendarEvent, RecordKind::EmailMessage]
        );
        assert_eq!(parse_kinds("email").unwrap(), vec![RecordKind::EmailMessage]);
        assert!(parse_kinds("calendar,slack").is_err());
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "test").unwrap());
        assert!(parse_env_bool("1", "test").unwrap());
        assert!(parse_env_bool("yes", "test").unwrap());
        assert!(parse_env_bool("on", "test").unwrap());
        assert!(parse_env_bool("TRUE", "test").unwrap());

        assert!(!parse_env_bool("false", "test").unwrap());
        assert!(!parse_env_bool("0", "test").unwrap());
        assert!(!parse_env_bool("no", "test").unwrap());
        assert!(!parse_env_bool("off", "test").unwrap());

        assert!(parse_env_bool("invalid", "test").is_err());
    }

    #[test]
    fn test_parse_env_value() {
        let n: usize = parse_env_value(" 12 ", "KEY").unwrap();
        assert_eq!(n, 12);
        let err = parse_env_value::<usize>("twelve", "KEY").unwrap_err();
        assert!(err.to_string().contains("KEY"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingEnvVar("TEST_VAR".to_string());
        assert!(err.to_string().contains("TEST_VAR"));

        let err = ConfigError::InvalidValue {
            key: "KEY".to_string(),
            message: "bad value".to_string(),
        };
        assert!(err.to_string().contains("KEY"));
        assert!(err.to_string().contains("bad value"));

        let err = ConfigError::ValidationFailed("test failure".to_string());
        assert!(err.to_string().contains("test failure"));
    }
}
