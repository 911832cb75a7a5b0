//! Half-open collection windows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::config::ConfigError;

/// A half-open time range `[start, end)` used to scope record collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window, rejecting `start >= end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ConfigError> {
        if start >= end {
            return Err(ConfigError::InvalidValue {
                key: "window".to_string(),
                message: format!("start ({}) must be before end ({})", start, end),
            });
        }
        Ok(Self { start, end })
    }

    /// Creates a window covering the `days` days that end at `end`.
    pub fn trailing_days(end: DateTime<Utc>, days: i64) -> Result<Self, ConfigError> {
        let start = chrono::Duration::try_days(days)
            .and_then(|span| end.checked_sub_signed(span))
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "days".to_string(),
                message: format!("{} days before {} is out of range", days, end),
            })?;
        Self::new(start, end)
    }

    /// Parses a window from two RFC 3339 timestamps.
    pub fn parse(start: &str, end: &str) -> Result<Self, ConfigError> {
        let parse = |key: &str, value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{}' is not an RFC 3339 timestamp: {}", value, e),
                })
        };
        Self::new(parse("start", start)?, parse("end", end)?)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns true if `instant` falls inside `[start, end)`.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}
