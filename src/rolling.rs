//! # Rolling Window Store
//! Per-source bounded window of ingested entries.
//!
//! Entries are kept in insertion order. After every mutation the window holds
//! at most `capacity` entries; overflow is evicted from the front (oldest
//! ingestion first). Upstream timestamps play no part in eviction.
//!
//! Each window's state sits behind an `Arc`. Writers mutate a private copy
//! (`Arc::make_mut`) while holding the write lock, readers only clone the
//! `Arc`, so a snapshot is always a complete pre- or post-insert view.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::ingest::types::Record;
use crate::source::SourceId;

/// One ingested record. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub entry_id: String,
    pub payload: Value,
    pub ingested_at: DateTime<Utc>,
}

/// Result of one `insert` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    /// Records skipped because their entry id is already in the window.
    pub duplicates: usize,
    pub evicted: usize,
}

/// Size and timestamp bounds of a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowBounds {
    pub len: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct WindowState {
    capacity: usize,
    entries: VecDeque<Entry>,
    ids: HashSet<String>,
}

impl WindowState {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    fn evict_overflow(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            if let Some(old) = self.entries.pop_front() {
                self.ids.remove(&old.entry_id);
                evicted += 1;
            }
        }
        evicted
    }
}

#[derive(Debug)]
struct Window {
    state: RwLock<Arc<WindowState>>,
}

impl Window {
    fn current(&self) -> Arc<WindowState> {
        self.state.read().clone()
    }
}

/// Thread-safe store of rolling windows, one per source.
#[derive(Debug, Default)]
pub struct RollingWindowStore {
    windows: RwLock<HashMap<SourceId, Arc<Window>>>,
}

impl RollingWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty window. An existing window for `id` is replaced.
    pub fn create(&self, id: SourceId, capacity: usize) {
        let window = Arc::new(Window {
            state: RwLock::new(Arc::new(WindowState::new(capacity))),
        });
        self.windows.write().insert(id, window);
    }

    /// Drop the window. Returns whether one existed.
    pub fn release(&self, id: SourceId) -> bool {
        self.windows.write().remove(&id).is_some()
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.windows.read().contains_key(&id)
    }

    fn window(&self, id: SourceId) -> Option<Arc<Window>> {
        self.windows.read().get(&id).cloned()
    }

    /// Append `records` in order, then evict from the front until the window
    /// fits its capacity. `None` when the window does not exist (released).
    pub fn insert(&self, id: SourceId, records: Vec<Record>) -> Option<InsertOutcome> {
        let window = self.window(id)?;
        let mut guard = window.state.write();
        let state = Arc::make_mut(&mut guard);

        let mut out = InsertOutcome::default();
        for rec in records {
            let entry_id = rec
                .id
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| derive_entry_id(&rec.payload));
            if state.ids.contains(&entry_id) {
                out.duplicates += 1;
                continue;
            }

            // keep the window ordered by ingestion time
            let mut ingested_at = rec.ingested_at.unwrap_or_else(Utc::now);
            if let Some(last) = state.entries.back() {
                if ingested_at < last.ingested_at {
                    ingested_at = last.ingested_at;
                }
            }

            state.ids.insert(entry_id.clone());
            state.entries.push_back(Entry {
                entry_id,
                payload: rec.payload,
                ingested_at,
            });
            out.inserted += 1;
        }
        out.evicted = state.evict_overflow();
        Some(out)
    }

    /// Change the capacity and evict immediately. Returns the number evicted.
    pub fn set_capacity(&self, id: SourceId, capacity: usize) -> Option<usize> {
        let window = self.window(id)?;
        let mut guard = window.state.write();
        let state = Arc::make_mut(&mut guard);
        state.capacity = capacity;
        Some(state.evict_overflow())
    }

    /// Owned copy of the window, oldest first.
    pub fn snapshot(&self, id: SourceId) -> Option<Vec<Entry>> {
        let state = self.window(id)?.current();
        Some(state.entries.iter().cloned().collect())
    }

    /// The newest `n` entries, still oldest first.
    pub fn latest(&self, id: SourceId, n: usize) -> Option<Vec<Entry>> {
        let state = self.window(id)?.current();
        let skip = state.entries.len().saturating_sub(n);
        Some(state.entries.iter().skip(skip).cloned().collect())
    }

    pub fn clear(&self, id: SourceId) -> bool {
        let Some(window) = self.window(id) else {
            return false;
        };
        let mut guard = window.state.write();
        let state = Arc::make_mut(&mut guard);
        state.entries.clear();
        state.ids.clear();
        true
    }

    pub fn bounds(&self, id: SourceId) -> Option<WindowBounds> {
        let state = self.window(id)?.current();
        Some(WindowBounds {
            len: state.entries.len(),
            oldest: state.entries.front().map(|e| e.ingested_at),
            newest: state.entries.back().map(|e| e.ingested_at),
        })
    }

    pub fn capacity(&self, id: SourceId) -> Option<usize> {
        Some(self.window(id)?.current().capacity)
    }

    pub fn len(&self, id: SourceId) -> usize {
        self.window(id).map(|w| w.current().entries.len()).unwrap_or(0)
    }

    /// Sum of all window sizes.
    pub fn total_entries(&self) -> usize {
        let windows: Vec<Arc<Window>> = self.windows.read().values().cloned().collect();
        windows.iter().map(|w| w.current().entries.len()).sum()
    }
}

/// Stable id for records without a feed-provided one.
pub fn derive_entry_id(payload: &Value) -> String {
    let canonical = serde_json::to_string(payload).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
