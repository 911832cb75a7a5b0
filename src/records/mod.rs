//! Record model shared by collection, validation and storage.
//!
//! A [`RecordBatch`] holds one user's records of a single [`RecordKind`] for
//! one [`TimeWindow`]. The kind is carried by the [`Records`] variant, so a
//! batch can never mix calendar events and email messages.

pub mod types;
pub mod window;

pub use types::{CalendarEvent, EmailMessage, RecordBatch, RecordKind, Records};
pub use window::TimeWindow;
