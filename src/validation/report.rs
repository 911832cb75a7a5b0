//! Validation check results and batch reports.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity level for a validation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A failing error marks the batch as invalid.
    Error,
    /// Informational; never affects storage.
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Outcome of evaluating one rule against one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub check_name: String,
    pub record_id: String,
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
}

impl ValidationCheck {
    pub(crate) fn new(
        check_name: &str,
        record_id: &str,
        severity: Severity,
        passed: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check_name: check_name.to_string(),
            record_id: record_id.to_string(),
            passed,
            severity,
            message: message.into(),
        }
    }

    /// True for a failing error-severity check.
    pub fn is_blocking_failure(&self) -> bool {
        !self.passed && self.severity == Severity::Error
    }
}

/// Overall verdict of a validation report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Pass,
    PassWithWarnings,
    Fail,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Pass => write!(f, "pass"),
            OverallStatus::PassWithWarnings => write!(f, "pass_with_warnings"),
            OverallStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Summary of all checks run over one or more batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub overall_status: OverallStatus,
    pub total_checks: usize,
    pub failed_errors: usize,
    pub failed_warnings: usize,
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    /// Builds a report; the status is derived from the checks.
    pub fn from_checks(checks: Vec<ValidationCheck>) -> Self {
        let failed_errors = checks.iter().filter(|c| c.is_blocking_failure()).count();
        let failed_warnings = checks
            .iter()
            .filter(|c| !c.passed && c.severity == Severity::Warning)
            .count();

        let overall_status = if failed_errors > 0 {
            OverallStatus::Fail
        } else if failed_warnings > 0 {
            OverallStatus::PassWithWarnings
        } else {
            OverallStatus::Pass
        };

        Self {
            overall_status,
            total_checks: checks.len(),
            failed_errors,
            failed_warnings,
            checks,
        }
    }

    /// Concatenates reports in order and recomputes the status.
    pub fn merge(reports: impl IntoIterator<Item = ValidationReport>) -> Self {
        let checks = reports.into_iter().flat_map(|r| r.checks).collect();
        Self::from_checks(checks)
    }

    pub fn is_fail(&self) -> bool {
        self.overall_status == OverallStatus::Fail
    }

    /// Failing checks in report order.
    pub fn failures(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}
