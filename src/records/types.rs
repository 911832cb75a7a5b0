//! Behavioral record types collected per user.
//!
//! Every field of a record is optional at the type level: collection adapters
//! hand raw payloads through unchanged, and missing or out-of-range values are
//! reported by the validator instead of being rejected on deserialization.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::config::ConfigError;

use super::window::TimeWindow;

/// The kind of records held by a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    CalendarEvent,
    EmailMessage,
}

impl RecordKind {
    /// All supported kinds, in collection order.
    pub const ALL: [RecordKind; 2] = [RecordKind::CalendarEvent, RecordKind::EmailMessage];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::CalendarEvent => "calendar_event",
            RecordKind::EmailMessage => "email_message",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "calendar_event" | "calendar" => Ok(RecordKind::CalendarEvent),
            "email_message" | "email" => Ok(RecordKind::EmailMessage),
            other => Err(ConfigError::InvalidValue {
                key: "kind".to_string(),
                message: format!(
                    "unknown record kind '{}', expected calendar_event or email_message",
                    other
                ),
            }),
        }
    }
}

/// A calendar event as delivered by a collection adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarEvent {
    pub event_id: Option<String>,
    pub title: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Must equal `end_time - start_time` in whole minutes.
    pub duration_minutes: Option<i64>,
    pub is_meeting: Option<bool>,
    pub attendees_count: Option<i64>,
}

impl CalendarEvent {
    /// Creates a well-formed, non-meeting event with a derived duration.
    pub fn new(
        event_id: impl Into<String>,
        title: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Some(event_id.into()),
            title: Some(title.into()),
            start_time: Some(start_time),
            end_time: Some(end_time),
            duration_minutes: Some((end_time - start_time).num_minutes()),
            is_meeting: Some(false),
            attendees_count: Some(0),
        }
    }

    /// Marks the event as a meeting with the given attendee count.
    pub fn meeting(mut self, attendees_count: i64) -> Self {
        self.is_meeting = Some(true);
        self.attendees_count = Some(attendees_count);
        self
    }

    /// Overrides the reported duration.
    pub fn with_duration_minutes(mut self, minutes: i64) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }
}

/// An email message as delivered by a collection adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailMessage {
    pub message_id: Option<String>,
    pub sender: Option<String>,
    pub recipients: Option<Vec<String>>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub is_sent: Option<bool>,
    pub is_urgent: Option<bool>,
    /// Must equal the whitespace-token count of `body`.
    pub word_count: Option<i64>,
}

impl EmailMessage {
    /// Creates a well-formed received message with a derived word count.
    pub fn new(
        message_id: impl Into<String>,
        sender: impl Into<String>,
        recipients: Vec<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let body = body.into();
        let word_count = body.split_whitespace().count() as i64;
        Self {
            message_id: Some(message_id.into()),
            sender: Some(sender.into()),
            recipients: Some(recipients),
            subject: Some(subject.into()),
            body: Some(body),
            timestamp: Some(timestamp),
            is_sent: Some(false),
            is_urgent: Some(false),
            word_count: Some(word_count),
        }
    }

    pub fn sent(mut self) -> Self {
        self.is_sent = Some(true);
        self
    }

    pub fn urgent(mut self) -> Self {
        self.is_urgent = Some(true);
        self
    }

    /// Overrides the reported word count.
    pub fn with_word_count(mut self, word_count: i64) -> Self {
        self.word_count = Some(word_count);
        self
    }
}

/// A homogeneous sequence of records; the variant fixes the kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum Records {
    CalendarEvent(Vec<CalendarEvent>),
    EmailMessage(Vec<EmailMessage>),
}

impl Records {
    /// An empty record set of the given kind.
    pub fn empty(kind: RecordKind) -> Self {
        match kind {
            RecordKind::CalendarEvent => Records::CalendarEvent(Vec::new()),
            RecordKind::EmailMessage => Records::EmailMessage(Vec::new()),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Records::CalendarEvent(_) => RecordKind::CalendarEvent,
            Records::EmailMessage(_) => RecordKind::EmailMessage,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Records::CalendarEvent(events) => events.len(),
            Records::EmailMessage(messages) => messages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keeps records whose anchor timestamp lies inside `window`.
    ///
    /// Records without an anchor timestamp are kept so that validation can
    /// report them.
    pub fn retain_window(&mut self, window: &TimeWindow) {
        match self {
            Records::CalendarEvent(events) => {
                events.retain(|e| e.start_time.map_or(true, |t| window.contains(t)))
            }
            Records::EmailMessage(messages) => {
                messages.retain(|m| m.timestamp.map_or(true, |t| window.contains(t)))
            }
        }
    }
}

/// One user's records of a single kind for one collection window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub user_id: String,
    pub window: TimeWindow,
    pub records: Records,
}

impl RecordBatch {
    pub fn new(user_id: impl Into<String>, window: TimeWindow, records: Records) -> Self {
        Self {
            user_id: user_id.into(),
            window,
            records,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.records.kind()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
