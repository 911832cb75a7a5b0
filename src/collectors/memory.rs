//! Scripted in-memory adapter.
//!
//! Serves canned records per user and kind, can fail selected users and
//! simulate latency. It also tracks how many fetches are in flight, which
//! makes concurrency limits observable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::records::{RecordKind, Records, TimeWindow};

use super::types::{CollectionAdapter, CollectorError, CollectorResult};

#[derive(Default)]
pub struct InMemoryCollector {
    records: Mutex<HashMap<(String, RecordKind), Records>>,
    failures: Mutex<HashMap<String, String>>,
    latency: Option<Duration>,
    user_latency: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    fetches: AtomicUsize,
}

impl InMemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `records` for `user_id`; the kind comes from the variant.
    pub fn with_records(self, user_id: impl Into<String>, records: Records) -> Self {
        self.insert_records(user_id, records);
        self
    }

    /// Every fetch for `user_id` fails as unavailable.
    pub fn with_failure(self, user_id: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.into(), message.into());
        self
    }

    /// Delays every fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delays fetches for one user, overriding the global latency.
    pub fn with_user_latency(mut self, user_id: impl Into<String>, latency: Duration) -> Self {
        self.user_latency.insert(user_id.into(), latency);
        self
    }

    pub fn insert_records(&self, user_id: impl Into<String>, records: Records) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((user_id.into(), records.kind()), records);
    }

    /// Highest number of concurrent fetches observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Total number of fetch calls.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CollectionAdapter for InMemoryCollector {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn fetch(
        &self,
        user_id: &str,
        window: &TimeWindow,
        kind: RecordKind,
    ) -> CollectorResult<Records> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = self.user_latency.get(user_id).copied().or(self.latency) {
            tokio::time::sleep(latency).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned();
        if let Some(message) = failure {
            return Err(CollectorError::Unavailable(message));
        }

        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(user_id.to_string(), kind))
            .cloned()
            .unwrap_or_else(|| Records::empty(kind));
        records.retain_window(window);
        Ok(records)
    }
}
