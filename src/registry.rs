//! Source registry: the only writer of source configuration and lifecycle.
//!
//! Every accepted change is published as a [`LifecycleEvent`] on a broadcast
//! channel. The scheduler subscribes to it; the registry itself knows nothing
//! about timers.

use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::rolling::RollingWindowStore;
use crate::source::{NewSource, Source, SourceId, SourceLimits, SourceStatus, SourceUpdate};
use crate::stats::StatsTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Registered(SourceId),
    StatusChanged {
        id: SourceId,
        from: SourceStatus,
        to: SourceStatus,
    },
    ConfigChanged(SourceId),
    Deleted(SourceId),
}

impl LifecycleEvent {
    pub fn source_id(&self) -> SourceId {
        match *self {
            Self::Registered(id) | Self::ConfigChanged(id) | Self::Deleted(id) => id,
            Self::StatusChanged { id, .. } => id,
        }
    }
}

pub struct SourceRegistry {
    sources: RwLock<IndexMap<SourceId, Source>>,
    store: Arc<RollingWindowStore>,
    stats: Arc<StatsTracker>,
    limits: SourceLimits,
    events: broadcast::Sender<LifecycleEvent>,
}

impl SourceRegistry {
    pub fn new(
        store: Arc<RollingWindowStore>,
        stats: Arc<StatsTracker>,
        limits: SourceLimits,
        event_buffer: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            sources: RwLock::new(IndexMap::new()),
            store,
            stats,
            limits,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn limits(&self) -> &SourceLimits {
        &self.limits
    }

    fn publish(&self, ev: LifecycleEvent) {
        // no subscribers yet is fine; the scheduler reconciles on start
        let _ = self.events.send(ev);
    }

    /// Validate and register a new `active` source with an empty window and
    /// zeroed stats.
    pub fn register(&self, input: NewSource) -> Result<Source, RegistryError> {
        let source = input.into_source(&self.limits)?;
        let id = source.source_id;

        self.store.create(id, source.max_entries);
        self.stats.create(id);
        self.sources.write().insert(id, source.clone());

        info!(
            target: "registry",
            source_id = %id,
            name = %source.source_name,
            kind = %source.source_type,
            max_entries = source.max_entries,
            interval_secs = source.ingestion_interval,
            "source registered"
        );
        self.publish(LifecycleEvent::Registered(id));
        Ok(source)
    }

    pub fn get(&self, id: SourceId) -> Result<Source, RegistryError> {
        self.sources
            .read()
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Live sources in registration order.
    pub fn list(&self) -> Vec<Source> {
        self.sources.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    pub fn update_status(&self, id: SourceId, to: SourceStatus) -> Result<Source, RegistryError> {
        self.apply(id, None, None, Some(to))
    }

    /// Live change of capacity and/or interval. A smaller capacity evicts
    /// before this returns; a new interval is picked up from the next cycle.
    pub fn update_config(
        &self,
        id: SourceId,
        max_entries: Option<i64>,
        ingestion_interval: Option<i64>,
    ) -> Result<Source, RegistryError> {
        let v = SourceUpdate {
            status: None,
            max_entries,
            ingestion_interval,
        }
        .validate(&self.limits)?;
        self.apply(id, v.max_entries, v.ingestion_interval, None)
    }

    /// Combined update. Input and transition are validated before anything
    /// is applied.
    pub fn update(&self, id: SourceId, patch: &SourceUpdate) -> Result<Source, RegistryError> {
        let v = patch.validate(&self.limits)?;
        self.apply(id, v.max_entries, v.ingestion_interval, v.status)
    }

    /// Transition `active -> error` after sustained fetch failures.
    pub fn mark_error(&self, id: SourceId) -> Result<Source, RegistryError> {
        self.update_status(id, SourceStatus::Error)
    }

    fn apply(
        &self,
        id: SourceId,
        max_entries: Option<usize>,
        interval: Option<u64>,
        status: Option<SourceStatus>,
    ) -> Result<Source, RegistryError> {
        if status == Some(SourceStatus::Deleted) {
            let mut gone = self.get(id)?;
            self.delete(id);
            gone.status = SourceStatus::Deleted;
            return Ok(gone);
        }

        let (updated, from, config_changed) = {
            let mut map = self.sources.write();
            let src = map.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
            let from = src.status;
            if let Some(to) = status {
                if !from.can_transition_to(to) {
                    return Err(RegistryError::InvalidTransition { from, to });
                }
            }

            let mut config_changed = false;
            if let Some(n) = max_entries.filter(|n| *n != src.max_entries) {
                src.max_entries = n;
                let evicted = self.store.set_capacity(id, n).unwrap_or(0);
                config_changed = true;
                debug!(target: "registry", source_id = %id, max_entries = n, evicted, "capacity changed");
            }
            if let Some(secs) = interval.filter(|s| *s != src.ingestion_interval) {
                src.ingestion_interval = secs;
                config_changed = true;
            }
            if let Some(to) = status {
                src.status = to;
            }
            if config_changed || status.is_some_and(|to| to != from) {
                src.updated_at = Utc::now();
            }
            (src.clone(), from, config_changed)
        };

        if config_changed {
            self.publish(LifecycleEvent::ConfigChanged(id));
        }
        let to = updated.status;
        if to != from {
            if to == SourceStatus::Active {
                self.stats.reset_failures(id);
            }
            info!(target: "registry", source_id = %id, %from, %to, "status changed");
            self.publish(LifecycleEvent::StatusChanged { id, from, to });
        }
        Ok(updated)
    }

    /// Terminal and idempotent: unknown or already deleted ids succeed.
    pub fn delete(&self, id: SourceId) {
        let removed = self.sources.write().shift_remove(&id);
        if removed.is_none() {
            debug!(target: "registry", source_id = %id, "delete: nothing to do");
            return;
        }
        self.store.release(id);
        self.stats.release(id);
        info!(target: "registry", source_id = %id, "source deleted");
        self.publish(LifecycleEvent::Deleted(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Record;
    use crate::stats::FailurePolicy;
    use serde_json::json;

    fn registry() -> (SourceRegistry, Arc<RollingWindowStore>, Arc<StatsTracker>) {
        let store = Arc::new(RollingWindowStore::new());
        let stats = Arc::new(StatsTracker::new(store.clone(), FailurePolicy::default()));
        let reg = SourceRegistry::new(store.clone(), stats.clone(), SourceLimits::default(), 64);
        (reg, store, stats)
    }

    fn rss(name: &str) -> NewSource {
        NewSource::new(name, "rss", "https://example.com/feed.xml")
    }

    #[test]
    fn register_creates_window_and_stats() {
        let (reg, store, stats) = registry();
        let s = reg.register(rss("a").with_max_entries(20)).unwrap();
        assert_eq!(store.capacity(s.source_id), Some(20));
        assert_eq!(stats.snapshot(s.source_id).unwrap().successful_ingestions, 0);
        assert_eq!(reg.get(s.source_id).unwrap(), s);
    }

    #[test]
    fn list_keeps_registration_order() {
        let (reg, _, _) = registry();
        let a = reg.register(rss("a")).unwrap();
        let b = reg.register(rss("b")).unwrap();
        let c = reg.register(rss("c")).unwrap();
        reg.delete(b.source_id);
        let ids: Vec<_> = reg.list().into_iter().map(|s| s.source_id).collect();
        assert_eq!(ids, vec![a.source_id, c.source_id]);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let (reg, _, _) = registry();
        let s = reg.register(rss("a")).unwrap();
        reg.update_status(s.source_id, SourceStatus::Paused).unwrap();
        let err = reg.update_status(s.source_id, SourceStatus::Error).unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidTransition {
                from: SourceStatus::Paused,
                to: SourceStatus::Error
            }
        );
    }

    #[test]
    fn update_is_all_or_nothing() {
        let (reg, _, _) = registry();
        let s = reg.register(rss("a")).unwrap();
        reg.update_status(s.source_id, SourceStatus::Paused).unwrap();
        let patch = SourceUpdate {
            status: Some("error".into()),
            max_entries: Some(50),
            ingestion_interval: None,
        };
        assert!(reg.update(s.source_id, &patch).is_err());
        assert_eq!(reg.get(s.source_id).unwrap().max_entries, 500);
    }

    #[test]
    fn shrink_evicts_immediately() {
        let (reg, store, _) = registry();
        let s = reg.register(rss("a")).unwrap();
        let recs = (0..500).map(|i| Record::with_id(format!("e{i}"), json!(i))).collect();
        store.insert(s.source_id, recs);
        reg.update_config(s.source_id, Some(100), None).unwrap();
        let snap = store.snapshot(s.source_id).unwrap();
        assert_eq!(snap.len(), 100);
        assert_eq!(snap[0].entry_id, "e400");
    }

    #[test]
    fn update_config_validates_bounds() {
        let (reg, _, _) = registry();
        let s = reg.register(rss("a")).unwrap();
        assert!(matches!(
            reg.update_config(s.source_id, Some(5), None),
            Err(RegistryError::Validation(_))
        ));
        assert!(matches!(
            reg.update_config(s.source_id, None, Some(10)),
            Err(RegistryError::Validation(_))
        ));
    }

    #[test]
    fn delete_is_idempotent_and_releases() {
        let (reg, store, stats) = registry();
        let s = reg.register(rss("a")).unwrap();
        reg.delete(s.source_id);
        reg.delete(s.source_id);
        reg.delete(SourceId::new());
        assert!(matches!(reg.get(s.source_id), Err(RegistryError::NotFound(_))));
        assert!(!store.contains(s.source_id));
        assert!(stats.snapshot(s.source_id).is_none());
    }

    #[test]
    fn status_deleted_via_update_deletes() {
        let (reg, _, _) = registry();
        let s = reg.register(rss("a")).unwrap();
        let out = reg.update_status(s.source_id, SourceStatus::Deleted).unwrap();
        assert_eq!(out.status, SourceStatus::Deleted);
        assert!(reg.is_empty());
    }

    #[test]
    fn resume_resets_failure_streak() {
        let (reg, _, stats) = registry();
        let s = reg.register(rss("a")).unwrap();
        for _ in 0..5 {
            stats.record_failure(s.source_id, "down");
        }
        reg.mark_error(s.source_id).unwrap();
        reg.update_status(s.source_id, SourceStatus::Active).unwrap();
        assert_eq!(stats.snapshot(s.source_id).unwrap().consecutive_failures, 0);
        assert_eq!(stats.snapshot(s.source_id).unwrap().failed_ingestions, 5);
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let (reg, _, _) = registry();
        let mut rx = reg.subscribe();
        let s = reg.register(rss("a")).unwrap();
        let id = s.source_id;
        reg.update_status(id, SourceStatus::Paused).unwrap();
        reg.update_config(id, None, Some(120)).unwrap();
        reg.delete(id);

        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Registered(id));
        assert_eq!(
            rx.recv().await.unwrap(),
            LifecycleEvent::StatusChanged {
                id,
                from: SourceStatus::Active,
                to: SourceStatus::Paused
            }
        );
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::ConfigChanged(id));
        assert_eq!(rx.recv().await.unwrap(), LifecycleEvent::Deleted(id));
    }
}
