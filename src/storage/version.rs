//! Dataset version metadata, lineage and statistics types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::records::{RecordKind, TimeWindow};
use crate::validation::{OverallStatus, ValidationReport};

/// Identifier of a stored dataset version.
///
/// Ids come from a single monotonic sequence, so ordering ids orders versions
/// by creation. The textual form is zero-padded so it sorts the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(u64);

impl VersionId {
    pub fn from_sequence(sequence: u64) -> Self {
        Self(sequence)
    }

    pub fn sequence(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{:010}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('v')
            .and_then(|digits| digits.parse::<u64>().ok())
            .map(VersionId)
            .ok_or_else(|| StorageError::InvalidId(s.to_string()))
    }
}

impl TryFrom<String> for VersionId {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionId> for String {
    fn from(id: VersionId) -> Self {
        id.to_string()
    }
}

/// Validation tag attached to every stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Unvalidated,
    Valid,
    Invalid,
}

impl ValidationStatus {
    /// Derives the tag from an optional validation report.
    pub fn from_report(report: Option<&ValidationReport>) -> Self {
        match report.map(|r| r.overall_status) {
            None => ValidationStatus::Unvalidated,
            Some(OverallStatus::Fail) => ValidationStatus::Invalid,
            Some(_) => ValidationStatus::Valid,
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Unvalidated => write!(f, "unvalidated"),
            ValidationStatus::Valid => write!(f, "valid"),
            ValidationStatus::Invalid => write!(f, "invalid"),
        }
    }
}

/// Where a version's records came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    /// A user id, or a batch tag for data stored on behalf of a group.
    pub owner: String,
    pub window: TimeWindow,
}

/// Key of a lineage chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineageKey {
    pub owner: String,
    pub data_type: RecordKind,
}

impl LineageKey {
    pub fn new(owner: impl Into<String>, data_type: RecordKind) -> Self {
        Self {
            owner: owner.into(),
            data_type,
        }
    }
}

impl fmt::Display for LineageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.data_type)
    }
}

/// Immutable metadata of one stored dataset version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub version_id: VersionId,
    pub data_type: RecordKind,
    pub record_count: usize,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub parent_version_id: Option<VersionId>,
    pub source: DataSource,
    pub validation_status: ValidationStatus,
    /// Hex SHA-256 of the stored payload.
    pub checksum: String,
}

impl DatasetVersion {
    pub fn lineage_key(&self) -> LineageKey {
        LineageKey::new(self.source.owner.clone(), self.data_type)
    }
}

/// Answer to a lineage query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub version_id: VersionId,
    pub data_type: RecordKind,
    pub record_count: usize,
    pub parent_version_id: Option<VersionId>,
    /// Ancestors ordered from the parent back to the chain root.
    pub ancestors: Vec<VersionId>,
}

/// Aggregates over every stored version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStatistics {
    pub total_versions: u64,
    pub total_records: u64,
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
    pub valid_versions: u64,
    pub invalid_versions: u64,
    pub unvalidated_versions: u64,
}

impl StorageStatistics {
    pub(crate) fn record(&mut self, version: &DatasetVersion) {
        self.total_versions += 1;
        self.total_records += version.record_count as u64;
        self.total_size_bytes += version.size_bytes;
        self.total_size_mb = self.total_size_bytes as f64 / (1024.0 * 1024.0);
        match version.validation_status {
            ValidationStatus::Valid => self.valid_versions += 1,
            ValidationStatus::Invalid => self.invalid_versions += 1,
            ValidationStatus::Unvalidated => self.unvalidated_versions += 1,
        }
    }
}

/// Filter for listing stored versions.
#[derive(Debug, Clone, Default)]
pub struct VersionFilter {
    pub owner: Option<String>,
    pub data_type: Option<RecordKind>,
    pub validation_status: Option<ValidationStatus>,
    pub limit: Option<usize>,
}

impl VersionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_data_type(mut self, data_type: RecordKind) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn with_status(mut self, status: ValidationStatus) -> Self {
        self.validation_status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, version: &DatasetVersion) -> bool {
        self.owner.as_ref().map_or(true, |o| *o == version.source.owner)
            && self.data_type.map_or(true, |t| t == version.data_type)
            && self
                .validation_status
                .map_or(true, |s| s == version.validation_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{Severity, ValidationCheck};

    #[test]
    fn test_version_id_format_and_parse() {
        let id = VersionId::from_sequence(42);
        assert_eq!(id.to_string(), "v0000000042");
        assert_eq!("v0000000042".parse::<VersionId>().unwrap(), id);
        for malformed in ["42", "vabc", ""] {
            let err = malformed.parse::<VersionId>().unwrap_err();
            assert!(matches!(err, StorageError::InvalidId(_)), "{}", malformed);
            assert!(!err.is_not_found());
        }
    }

    #[test]
    fn test_version_id_orders_by_creation() {
        let a = VersionId::from_sequence(9);
        let b = VersionId::from_sequence(10);
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn test_version_id_serde_as_string() {
        let json = serde_json::to_string(&VersionId::from_sequence(3)).unwrap();
        assert_eq!(json, "\"v0000000003\"");
        let back: VersionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sequence(), 3);
    }

    #[test]
    fn test_validation_status_from_report() {
        assert_eq!(
            ValidationStatus::from_report(None),
            ValidationStatus::Unvalidated
        );

        let failing = ValidationReport::from_checks(vec![ValidationCheck::new(
            "duration_mismatch",
            "e1",
            Severity::Error,
            false,
            "off",
        )]);
        assert_eq!(
            ValidationStatus::from_report(Some(&failing)),
            ValidationStatus::Invalid
        );

        let warning = ValidationReport::from_checks(vec![ValidationCheck::new(
            "short_body",
            "m1",
            Severity::Warning,
            false,
            "short",
        )]);
        assert_eq!(
            ValidationStatus::from_report(Some(&warning)),
            ValidationStatus::Valid
        );
    }
}
