//! Per-source ingestion counters and the failure escalation policy.
//!
//! Window-derived fields (`currentEntries`, `oldestEntry`, `newestEntry`) are
//! never stored here; `snapshot` reads them from the store on every call.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::rolling::RollingWindowStore;
use crate::source::SourceId;

/// When sustained failures turn into a visible `error` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub threshold: u32,
    pub reset_on_success: bool,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_on_success: true,
        }
    }
}

/// What the caller of `record_failure` should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    Continue,
    /// Consecutive failures reached the threshold.
    Escalate,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    successful: u64,
    failed: u64,
    consecutive_failures: u32,
    total_entries: u64,
    last_ingestion: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
}

/// Read-only stats view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub current_entries: usize,
    pub successful_ingestions: u64,
    pub failed_ingestions: u64,
    pub last_ingestion: Option<DateTime<Utc>>,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_entries_ingested: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct StatsTracker {
    inner: RwLock<HashMap<SourceId, Counters>>,
    store: Arc<RollingWindowStore>,
    policy: FailurePolicy,
}

impl StatsTracker {
    pub fn new(store: Arc<RollingWindowStore>, policy: FailurePolicy) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            store,
            policy,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Start tracking `id` with zeroed counters.
    pub fn create(&self, id: SourceId) {
        self.inner.write().insert(id, Counters::default());
    }

    pub fn release(&self, id: SourceId) -> bool {
        self.inner.write().remove(&id).is_some()
    }

    /// A completed cycle that added `count` entries. No-op for unknown ids.
    pub fn record_success(&self, id: SourceId, count: usize) {
        let mut map = self.inner.write();
        let Some(c) = map.get_mut(&id) else {
            return;
        };
        c.successful += 1;
        c.total_entries += count as u64;
        c.last_ingestion = Some(Utc::now());
        if self.policy.reset_on_success {
            c.consecutive_failures = 0;
        }
    }

    /// A failed cycle. Unknown ids yield `Continue`.
    pub fn record_failure(&self, id: SourceId, error: &str) -> FailureVerdict {
        let mut map = self.inner.write();
        let Some(c) = map.get_mut(&id) else {
            return FailureVerdict::Continue;
        };
        c.failed += 1;
        c.consecutive_failures = c.consecutive_failures.saturating_add(1);
        c.last_error = Some(error.to_string());
        c.last_error_at = Some(Utc::now());

        if self.policy.threshold > 0 && c.consecutive_failures >= self.policy.threshold {
            FailureVerdict::Escalate
        } else {
            FailureVerdict::Continue
        }
    }

    /// Clear the consecutive-failure streak (manual resume).
    pub fn reset_failures(&self, id: SourceId) {
        if let Some(c) = self.inner.write().get_mut(&id) {
            c.consecutive_failures = 0;
        }
    }

    pub fn snapshot(&self, id: SourceId) -> Option<Stats> {
        let c = self.inner.read().get(&id).cloned()?;
        let bounds = self.store.bounds(id).unwrap_or_default();
        Some(Stats {
            current_entries: bounds.len,
            successful_ingestions: c.successful,
            failed_ingestions: c.failed,
            last_ingestion: c.last_ingestion,
            oldest_entry: bounds.oldest,
            newest_entry: bounds.newest,
            consecutive_failures: c.consecutive_failures,
            total_entries_ingested: c.total_entries,
            last_error: c.last_error,
            last_error_at: c.last_error_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Record;
    use serde_json::json;

    fn setup(policy: FailurePolicy) -> (Arc<RollingWindowStore>, StatsTracker, SourceId) {
        let store = Arc::new(RollingWindowStore::new());
        let stats = StatsTracker::new(store.clone(), policy);
        let id = SourceId::new();
        store.create(id, 10);
        stats.create(id);
        (store, stats, id)
    }

    #[test]
    fn escalates_on_fifth_consecutive_failure() {
        let (_store, stats, id) = setup(FailurePolicy::default());
        for _ in 0..4 {
            assert_eq!(stats.record_failure(id, "boom"), FailureVerdict::Continue);
        }
        assert_eq!(stats.record_failure(id, "boom"), FailureVerdict::Escalate);
        let s = stats.snapshot(id).unwrap();
        assert_eq!(s.failed_ingestions, 5);
        assert_eq!(s.consecutive_failures, 5);
        assert_eq!(s.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn success_resets_streak() {
        let (_store, stats, id) = setup(FailurePolicy::default());
        for _ in 0..4 {
            stats.record_failure(id, "x");
        }
        stats.record_success(id, 2);
        assert_eq!(stats.record_failure(id, "x"), FailureVerdict::Continue);
        let s = stats.snapshot(id).unwrap();
        assert_eq!(s.successful_ingestions, 1);
        assert_eq!(s.total_entries_ingested, 2);
        assert_eq!(s.consecutive_failures, 1);
        assert!(s.last_ingestion.is_some());
    }

    #[test]
    fn streak_survives_success_when_reset_disabled() {
        let policy = FailurePolicy {
            threshold: 3,
            reset_on_success: false,
        };
        let (_store, stats, id) = setup(policy);
        stats.record_failure(id, "x");
        stats.record_failure(id, "x");
        stats.record_success(id, 1);
        assert_eq!(stats.record_failure(id, "x"), FailureVerdict::Escalate);
    }

    #[test]
    fn window_fields_are_read_from_store() {
        let (store, stats, id) = setup(FailurePolicy::default());
        assert_eq!(stats.snapshot(id).unwrap().current_entries, 0);
        store.insert(id, vec![Record::with_id("a", json!(1)), Record::with_id("b", json!(2))]);
        let s = stats.snapshot(id).unwrap();
        assert_eq!(s.current_entries, 2);
        assert!(s.oldest_entry.unwrap() <= s.newest_entry.unwrap());
    }

    #[test]
    fn unknown_source_is_ignored() {
        let (_store, stats, _id) = setup(FailurePolicy::default());
        let other = SourceId::new();
        stats.record_success(other, 1);
        assert_eq!(stats.record_failure(other, "x"), FailureVerdict::Continue);
        assert!(stats.snapshot(other).is_none());
    }
}
