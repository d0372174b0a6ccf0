// src/management.rs
//! Caller-facing operations. Everything here delegates to the registry,
//! store and stats tracker and returns owned views.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::Serialize;
use tracing::debug;

use crate::error::RegistryError;
use crate::registry::SourceRegistry;
use crate::rolling::{Entry, RollingWindowStore};
use crate::source::{NewSource, Source, SourceId, SourceStatus, SourceUpdate};
use crate::stats::{Stats, StatsTracker};

/// A source merged with its live stats.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceView {
    #[serde(flatten)]
    pub source: Source,
    pub is_active: bool,
    pub stats: Stats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceList {
    pub sources: Vec<SourceView>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub total_sources: usize,
    pub active_sources: usize,
    pub paused_sources: usize,
    pub error_sources: usize,
    pub total_entries_across_sources: usize,
    pub successful_ingestions: u64,
    pub failed_ingestions: u64,
    pub last_ingestion: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntriesView {
    pub source_id: SourceId,
    pub max_entries: usize,
    pub entries: Vec<Entry>,
}

#[derive(Clone)]
pub struct ManagementApi {
    registry: Arc<SourceRegistry>,
    store: Arc<RollingWindowStore>,
    stats: Arc<StatsTracker>,
}

impl ManagementApi {
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<RollingWindowStore>,
        stats: Arc<StatsTracker>,
    ) -> Self {
        Self {
            registry,
            store,
            stats,
        }
    }

    fn view(&self, source: Source) -> SourceView {
        let stats = self.stats.snapshot(source.source_id).unwrap_or_default();
        SourceView {
            is_active: source.is_active(),
            source,
            stats,
        }
    }

    fn publish_count(&self) {
        gauge!("live_sources_registered").set(self.registry.len() as f64);
    }

    pub fn register(&self, input: NewSource) -> Result<SourceView, RegistryError> {
        let source = self.registry.register(input)?;
        self.publish_count();
        Ok(self.view(source))
    }

    /// All sources in registration order.
    pub fn list(&self) -> SourceList {
        let sources = self
            .registry
            .list()
            .into_iter()
            .map(|s| self.view(s))
            .collect();
        SourceList { sources }
    }

    pub fn get(&self, id: SourceId) -> Result<SourceView, RegistryError> {
        self.registry.get(id).map(|s| self.view(s))
    }

    /// Apply a partial update. A status of `deleted` removes the source and
    /// returns the last view it had.
    pub fn update(&self, id: SourceId, patch: &SourceUpdate) -> Result<SourceView, RegistryError> {
        let before = self.get(id)?;
        let updated = self.registry.update(id, patch)?;
        if updated.status == SourceStatus::Deleted {
            self.publish_count();
            let mut view = before;
            view.source = updated;
            view.is_active = false;
            return Ok(view);
        }
        Ok(self.view(updated))
    }

    /// Idempotent: deleting an unknown id still succeeds.
    pub fn delete(&self, id: SourceId) -> DeleteResponse {
        self.registry.delete(id);
        self.publish_count();
        DeleteResponse { success: true }
    }

    /// Newest `limit` entries of the window (all when `None`), oldest first.
    pub fn entries(&self, id: SourceId, limit: Option<usize>) -> Result<EntriesView, RegistryError> {
        let source = self.registry.get(id)?;
        let entries = match limit {
            Some(n) => self.store.latest(id, n),
            None => self.store.snapshot(id),
        }
        .unwrap_or_default();
        Ok(EntriesView {
            source_id: id,
            max_entries: source.max_entries,
            entries,
        })
    }

    /// Aggregate health over all registered sources.
    pub fn status(&self) -> StatusView {
        let mut out = StatusView::default();
        for source in self.registry.list() {
            out.total_sources += 1;
            match source.status {
                SourceStatus::Active => out.active_sources += 1,
                SourceStatus::Paused => out.paused_sources += 1,
                SourceStatus::Error => out.error_sources += 1,
                SourceStatus::Deleted => {}
            }
            if let Some(st) = self.stats.snapshot(source.source_id) {
                out.total_entries_across_sources += st.current_entries;
                out.successful_ingestions += st.successful_ingestions;
                out.failed_ingestions += st.failed_ingestions;
                out.last_ingestion = out.last_ingestion.max(st.last_ingestion);
            }
        }
        debug!(
            target: "api",
            total = out.total_sources,
            active = out.active_sources,
            entries = out.total_entries_across_sources,
            "status requested"
        );
        out
    }
}
