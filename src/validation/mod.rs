//! Rule-based validation of collected record batches.
//!
//! The validator is pure: it never mutates records and never fails on
//! malformed input. Each rule produces a [`ValidationCheck`]; a
//! [`ValidationReport`] summarizes them into a pass/fail verdict that the
//! orchestrator uses to tag stored versions.

pub mod record_validator;
pub mod report;

pub use record_validator::{DataValidator, DEFAULT_SHORT_BODY_WORDS};
pub use report::{OverallStatus, Severity, ValidationCheck, ValidationReport};
