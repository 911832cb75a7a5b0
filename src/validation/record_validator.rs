//! Per-record validation rules for calendar and email batches.
//!
//! Every rule is evaluated independently per record and emits one
//! [`ValidationCheck`], passing or failing. The only cross-record rule is id
//! uniqueness within the batch. Rules whose inputs are missing are skipped;
//! the `missing_fields` check already reports those records.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::ValidationError;
use crate::records::{CalendarEvent, EmailMessage, RecordBatch, Records};

use super::report::{Severity, ValidationCheck, ValidationReport};

pub const MISSING_FIELDS: &str = "missing_fields";
pub const DUPLICATE_ID: &str = "duplicate_id";
pub const INVALID_TIME_RANGE: &str = "invalid_time_range";
pub const NEGATIVE_ATTENDEES: &str = "negative_attendees";
pub const DURATION_MISMATCH: &str = "duration_mismatch";
pub const MEETING_WITHOUT_ATTENDEES: &str = "meeting_without_attendees";
pub const EMPTY_RECIPIENTS: &str = "empty_recipients";
pub const NEGATIVE_WORD_COUNT: &str = "negative_word_count";
pub const WORD_COUNT_MISMATCH: &str = "word_count_mismatch";
pub const SHORT_BODY: &str = "short_body";

/// Default minimum number of body words before `short_body` warns.
pub const DEFAULT_SHORT_BODY_WORDS: usize = 3;

/// Stateless rule engine for record batches.
#[derive(Debug, Clone)]
pub struct DataValidator {
    short_body_words: usize,
}

impl Default for DataValidator {
    fn default() -> Self {
        Self::new(DEFAULT_SHORT_BODY_WORDS)
    }
}

impl DataValidator {
    /// Creates a validator; bodies with fewer than `short_body_words` words
    /// produce a warning.
    pub fn new(short_body_words: usize) -> Self {
        Self { short_body_words }
    }

    /// Runs every rule against every record, in record order.
    pub fn validate(&self, records: &Records) -> Vec<ValidationCheck> {
        match records {
            Records::CalendarEvent(events) => self.validate_calendar(events),
            Records::EmailMessage(messages) => self.validate_email(messages),
        }
    }

    /// Summarizes checks into a report.
    pub fn report(checks: Vec<ValidationCheck>) -> ValidationReport {
        ValidationReport::from_checks(checks)
    }

    /// Validates a single batch and returns its report.
    pub fn validate_batch(&self, batch: &RecordBatch) -> ValidationReport {
        let report = Self::report(self.validate(&batch.records));
        debug!(
            user_id = %batch.user_id,
            kind = %batch.kind(),
            records = batch.len(),
            total_checks = report.total_checks,
            status = %report.overall_status,
            "Validated batch"
        );
        report
    }

    /// Validates batches on the blocking pool, one report per batch.
    pub async fn validate_batches(
        &self,
        batches: Arc<Vec<RecordBatch>>,
    ) -> Result<Vec<ValidationReport>, ValidationError> {
        let validator = self.clone();
        tokio::task::spawn_blocking(move || {
            batches
                .iter()
                .map(|batch| validator.validate_batch(batch))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| ValidationError::Internal(format!("validation task failed: {}", e)))
    }

    fn validate_calendar(&self, events: &[CalendarEvent]) -> Vec<ValidationCheck> {
        let mut checks = Vec::with_capacity(events.len() * 5);
        let mut seen: HashSet<&str> = HashSet::new();

        for (index, event) in events.iter().enumerate() {
            let record_id = record_id(event.event_id.as_deref(), index);

            let mut missing = Vec::new();
            if is_blank(event.event_id.as_deref()) {
                missing.push("event_id");
            }
            if event.title.is_none() {
                missing.push("title");
            }
            if event.start_time.is_none() {
                missing.push("start_time");
            }
            if event.end_time.is_none() {
                missing.push("end_time");
            }
            if event.duration_minutes.is_none() {
                missing.push("duration_minutes");
            }
            if event.is_meeting.is_none() {
                missing.push("is_meeting");
            }
            if event.attendees_count.is_none() {
                missing.push("attendees_count");
            }
            checks.push(missing_fields_check(&record_id, &missing));

            if let Some(id) = event.event_id.as_deref().filter(|id| !id.trim().is_empty()) {
                checks.push(duplicate_check(&record_id, "event_id", seen.insert(id)));
            }

            let valid_range = match (event.start_time, event.end_time) {
                (Some(start), Some(end)) => {
                    let passed = end > start;
                    checks.push(ValidationCheck::new(
                        INVALID_TIME_RANGE,
                        &record_id,
                        Severity::Error,
                        passed,
                        if passed {
                            "end_time is after start_time".to_string()
                        } else {
                            format!(
                                "end_time {} is not after start_time {}",
                                end.to_rfc3339(),
                                start.to_rfc3339()
                            )
                        },
                    ));
                    passed.then_some((start, end))
                }
                _ => None,
            };

            if let Some(attendees) = event.attendees_count {
                let passed = attendees >= 0;
                checks.push(ValidationCheck::new(
                    NEGATIVE_ATTENDEES,
                    &record_id,
                    Severity::Error,
                    passed,
                    if passed {
                        format!("attendees_count is {}", attendees)
                    } else {
                        format!("attendees_count must be >= 0, got {}", attendees)
                    },
                ));
            }

            if let (Some((start, end)), Some(minutes)) = (valid_range, event.duration_minutes) {
                checks.push(duration_check(&record_id, start, end, minutes));
            }

            if let (Some(true), Some(attendees)) = (event.is_meeting, event.attendees_count) {
                if attendees >= 0 {
                    let passed = attendees > 0;
                    checks.push(ValidationCheck::new(
                        MEETING_WITHOUT_ATTENDEES,
                        &record_id,
                        Severity::Warning,
                        passed,
                        if passed {
                            format!("meeting has {} attendees", attendees)
                        } else {
                            "meeting has no attendees".to_string()
                        },
                    ));
                }
            }
        }

        checks
    }

    fn validate_email(&self, messages: &[EmailMessage]) -> Vec<ValidationCheck> {
        let mut checks = Vec::with_capacity(messages.len() * 5);
        let mut seen: HashSet<&str> = HashSet::new();

        for (index, message) in messages.iter().enumerate() {
            let record_id = record_id(message.message_id.as_deref(), index);

            let mut missing = Vec::new();
            if is_blank(message.message_id.as_deref()) {
                missing.push("message_id");
            }
            if is_blank(message.sender.as_deref()) {
                missing.push("sender");
            }
            if message.recipients.is_none() {
                missing.push("recipients");
            }
            if message.subject.is_none() {
                missing.push("subject");
            }
            if message.body.is_none() {
                missing.push("body");
            }
            if message.timestamp.is_none() {
                missing.push("timestamp");
            }
            if message.is_sent.is_none() {
                missing.push("is_sent");
            }
            if message.is_urgent.is_none() {
                missing.push("is_urgent");
            }
            if message.word_count.is_none() {
                missing.push("word_count");
            }
            checks.push(missing_fields_check(&record_id, &missing));

            if let Some(id) = message
                .message_id
                .as_deref()
                .filter(|id| !id.trim().is_empty())
            {
                checks.push(duplicate_check(&record_id, "message_id", seen.insert(id)));
            }

            if let Some(recipients) = &message.recipients {
                let blank = recipients.iter().filter(|r| r.trim().is_empty()).count();
                let passed = !recipients.is_empty() && blank == 0;
                checks.push(ValidationCheck::new(
                    EMPTY_RECIPIENTS,
                    &record_id,
                    Severity::Error,
                    passed,
                    if recipients.is_empty() {
                        "recipients must not be empty".to_string()
                    } else if blank > 0 {
                        format!("{} of {} recipients are blank", blank, recipients.len())
                    } else {
                        format!("{} recipients", recipients.len())
                    },
                ));
            }

            if let Some(word_count) = message.word_count {
                let passed = word_count >= 0;
                checks.push(ValidationCheck::new(
                    NEGATIVE_WORD_COUNT,
                    &record_id,
                    Severity::Error,
                    passed,
                    if passed {
                        format!("word_count is {}", word_count)
                    } else {
                        format!("word_count must be >= 0, got {}", word_count)
                    },
                ));
            }

            if let Some(body) = message.body.as_deref() {
                let actual = body.split_whitespace().count();

                if let Some(word_count) = message.word_count.filter(|w| *w >= 0) {
                    let passed = word_count as usize == actual;
                    checks.push(ValidationCheck::new(
                        WORD_COUNT_MISMATCH,
                        &record_id,
                        Severity::Error,
                        passed,
                        if passed {
                            format!("word_count matches body ({} words)", actual)
                        } else {
                            format!(
                                "word_count is {} but body has {} words",
                                word_count, actual
                            )
                        },
                    ));
                }

                let passed = actual >= self.short_body_words;
                checks.push(ValidationCheck::new(
                    SHORT_BODY,
                    &record_id,
                    Severity::Warning,
                    passed,
                    if passed {
                        format!("body has {} words", actual)
                    } else {
                        format!(
                            "body has {} words, fewer than {}",
                            actual, self.short_body_words
                        )
                    },
                ));
            }
        }

        checks
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

fn record_id(id: Option<&str>, index: usize) -> String {
    match id {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => format!("#{}", index),
    }
}

fn missing_fields_check(record_id: &str, missing: &[&str]) -> ValidationCheck {
    let passed = missing.is_empty();
    ValidationCheck::new(
        MISSING_FIELDS,
        record_id,
        Severity::Error,
        passed,
        if passed {
            "all required fields present".to_string()
        } else {
            format!("missing required fields: {}", missing.join(", "))
        },
    )
}

fn duplicate_check(record_id: &str, field: &str, first_seen: bool) -> ValidationCheck {
    ValidationCheck::new(
        DUPLICATE_ID,
        record_id,
        Severity::Error,
        first_seen,
        if first_seen {
            format!("{} is unique", field)
        } else {
            format!("{} '{}' appears more than once", field, record_id)
        },
    )
}

fn duration_check(
    record_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    minutes: i64,
) -> ValidationCheck {
    let actual_secs = (end - start).num_seconds();
    let passed = minutes.checked_mul(60) == Some(actual_secs);
    let message = if passed {
        format!("duration_minutes matches end - start ({} minutes)", minutes)
    } else if actual_secs % 60 == 0 {
        format!(
            "duration_minutes is {} but end - start is {} minutes",
            minutes,
            actual_secs / 60
        )
    } else {
        format!(
            "duration_minutes is {} but end - start is {} seconds",
            minutes, actual_secs
        )
    };
    ValidationCheck::new(DURATION_MISMATCH, record_id, Severity::Error, passed, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::TimeWindow;
    use crate::validation::OverallStatus;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
    }

    fn email(id: &str, body: &str) -> EmailMessage {
        EmailMessage::new(
            id,
            "lead@example.com",
            vec!["dev@example.com".to_string()],
            "Weekly sync",
            body,
            at(8, 0),
        )
    }

    fn failing<'a>(checks: &'a [ValidationCheck]) -> Vec<&'a ValidationCheck> {
        checks.iter().filter(|c| !c.passed).collect()
    }

    #[test]
    fn test_empty_batch_passes_vacuously() {
        let validator = DataValidator::default();
        let checks = validator.validate(&Records::empty(crate::records::RecordKind::EmailMessage));
        let report = DataValidator::report(checks);
        assert_eq!(report.total_checks, 0);
        assert_eq!(report.overall_status, OverallStatus::Pass);
    }

    #[test]
    fn test_well_formed_calendar_passes() {
        let validator = DataValidator::default();
        let records = Records::CalendarEvent(vec![
            CalendarEvent::new("e1", "Focus", at(9, 0), at(10, 30)),
            CalendarEvent::new("e2", "Planning", at(11, 0), at(12, 0)).meeting(4),
        ]);
        let checks = validator.validate(&records);
        assert!(failing(&checks).is_empty());
        // e1: missing, duplicate, range, attendees, duration
        // e2: the same plus meeting_without_attendees
        assert_eq!(checks.len(), 11);
        assert_eq!(DataValidator::report(checks).overall_status, OverallStatus::Pass);
    }

    #[test]
    fn test_duration_mismatch_is_single_error() {
        let validator = DataValidator::default();
        let records = Records::CalendarEvent(vec![CalendarEvent::new(
            "evt-1",
            "1:1",
            at(9, 0),
            at(10, 0),
        )
        .with_duration_minutes(45)]);

        let checks = validator.validate(&records);
        let failures = failing(&checks);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].check_name, DURATION_MISMATCH);
        assert_eq!(failures[0].record_id, "evt-1");
        assert_eq!(failures[0].severity, Severity::Error);
        assert!(failures[0].message.contains("45"));
        assert!(failures[0].message.contains("60"));
        assert!(DataValidator::report(checks).is_fail());
    }

    #[test]
    fn test_duration_off_by_any_amount_fails_once() {
        let validator = DataValidator::default();
        for delta in [-59, -1, 1, 7, 600] {
            let event = CalendarEvent::new("e", "t", at(13, 0), at(14, 0))
                .with_duration_minutes(60 + delta);
            let checks = validator.validate(&Records::CalendarEvent(vec![event]));
            let errors: Vec<_> = checks.iter().filter(|c| c.is_blocking_failure()).collect();
            assert_eq!(errors.len(), 1, "delta {}", delta);
        }
    }

    #[test]
    fn test_inverted_range_skips_duration_check() {
        let validator = DataValidator::default();
        let mut event = CalendarEvent::new("e1", "Bad", at(9, 0), at(10, 0));
        event.end_time = Some(at(8, 0));
        let checks = validator.validate(&Records::CalendarEvent(vec![event]));
        let failures = failing(&checks);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].check_name, INVALID_TIME_RANGE);
        assert!(!checks.iter().any(|c| c.check_name == DURATION_MISMATCH));
    }

    #[test]
    fn test_meeting_without_attendees_warns() {
        let validator = DataValidator::default();
        let records =
            Records::CalendarEvent(vec![CalendarEvent::new("e1", "Sync", at(9, 0), at(9, 30))
                .meeting(0)]);
        let report = DataValidator::report(validator.validate(&records));
        assert_eq!(report.overall_status, OverallStatus::PassWithWarnings);
        assert_eq!(report.failures().next().unwrap().check_name, MEETING_WITHOUT_ATTENDEES);
    }

    #[test]
    fn test_negative_attendees_is_error() {
        let validator = DataValidator::default();
        let records =
            Records::CalendarEvent(vec![CalendarEvent::new("e1", "Sync", at(9, 0), at(9, 30))
                .meeting(-2)]);
        let checks = validator.validate(&records);
        let failures = failing(&checks);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].check_name, NEGATIVE_ATTENDEES);
    }

    #[test]
    fn test_missing_fields_reported_without_aborting() {
        let validator = DataValidator::default();
        let records = Records::CalendarEvent(vec![
            CalendarEvent::default(),
            CalendarEvent::new("e2", "Fine", at(9, 0), at(9, 30)),
        ]);
        let checks = validator.validate(&records);
        let failures = failing(&checks);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].check_name, MISSING_FIELDS);
        assert_eq!(failures[0].record_id, "#0");
        assert!(failures[0].message.contains("event_id"));
        assert!(failures[0].message.contains("attendees_count"));
        assert!(checks.iter().any(|c| c.record_id == "e2"));
    }

    #[test]
    fn test_duplicate_ids_flagged() {
        let validator = DataValidator::default();
        let records = Records::EmailMessage(vec![
            email("m1", "see attached notes please"),
            email("m1", "see attached notes again"),
        ]);
        let checks = validator.validate(&records);
        let failures = failing(&checks);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].check_name, DUPLICATE_ID);
    }

    #[test]
    fn test_email_word_count_mismatch() {
        let validator = DataValidator::default();
        let records = Records::EmailMessage(vec![
            email("m1", "can we move the deadline").with_word_count(4)
        ]);
        let checks = validator.validate(&records);
        let failures = failing(&checks);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].check_name, WORD_COUNT_MISMATCH);
        assert!(failures[0].message.contains("5 words"));
    }

    #[test]
    fn test_email_empty_recipients() {
        let validator = DataValidator::default();
        let mut message = email("m1", "ping about the release plan");
        message.recipients = Some(Vec::new());
        let checks = validator.validate(&Records::EmailMessage(vec![message]));
        let failures = failing(&checks);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].check_name, EMPTY_RECIPIENTS);
    }

    #[test]
    fn test_short_body_warning_threshold() {
        let validator = DataValidator::new(3);
        let records = Records::EmailMessage(vec![email("m1", "ok thanks")]);
        let report = DataValidator::report(validator.validate(&records));
        assert_eq!(report.overall_status, OverallStatus::PassWithWarnings);

        let lenient = DataValidator::new(1);
        let report = DataValidator::report(lenient.validate(&records));
        assert_eq!(report.overall_status, OverallStatus::Pass);
    }

    #[test]
    fn test_validation_does_not_mutate_input() {
        let validator = DataValidator::default();
        let records = Records::EmailMessage(vec![email("m1", "x").with_word_count(-3)]);
        let before = records.clone();
        let _ = validator.validate(&records);
        assert_eq!(records, before);
    }

    #[tokio::test]
    async fn test_validate_batches_off_thread() {
        let validator = DataValidator::default();
        let window = TimeWindow::new(at(0, 0), at(23, 0)).unwrap();
        let batches = Arc::new(vec![
            RecordBatch::new(
                "u1",
                window,
                Records::CalendarEvent(vec![CalendarEvent::new("e1", "a", at(9, 0), at(10, 0))]),
            ),
            RecordBatch::new("u1", window, Records::EmailMessage(Vec::new())),
        ]);

        let reports = validator
            .validate_batches(Arc::clone(&batches))
            .await
            .expect("validation should run");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].overall_status, OverallStatus::Pass);
        assert_eq!(reports[1].total_checks, 0);
    }
}
