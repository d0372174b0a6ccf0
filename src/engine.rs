//! # Live Sources Engine
//! Wires one store, stats tracker, registry and scheduler together. Each
//! `LiveSources` is an independent instance; nothing is global except the
//! metrics recorder.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::EngineConfig;
use crate::ingest::providers::{default_fetchers, http_client};
use crate::ingest::scheduler::IngestionScheduler;
use crate::ingest::types::FetcherSet;
use crate::management::ManagementApi;
use crate::registry::SourceRegistry;
use crate::rolling::RollingWindowStore;
use crate::stats::StatsTracker;

pub struct LiveSources {
    pub config: EngineConfig,
    pub store: Arc<RollingWindowStore>,
    pub stats: Arc<StatsTracker>,
    pub registry: Arc<SourceRegistry>,
    pub scheduler: Arc<IngestionScheduler>,
}

impl LiveSources {
    /// Build an engine with explicit fetchers (tests inject fakes here).
    pub fn with_fetchers(config: EngineConfig, fetchers: FetcherSet) -> Self {
        let store = Arc::new(RollingWindowStore::new());
        let stats = Arc::new(StatsTracker::new(store.clone(), config.failure_policy()));
        let registry = Arc::new(SourceRegistry::new(
            store.clone(),
            stats.clone(),
            config.limits(),
            config.event_buffer,
        ));
        let scheduler = Arc::new(IngestionScheduler::new(
            registry.clone(),
            store.clone(),
            stats.clone(),
            fetchers,
            config.scheduler_config(),
        ));
        Self {
            config,
            store,
            stats,
            registry,
            scheduler,
        }
    }

    /// Build an engine with the built-in HTTP fetchers.
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        // transport backstop slightly above the scheduler's own timeout cap
        let client = http_client(
            &config.user_agent,
            Duration::from_secs(config.fetch_timeout_cap_secs + 5),
        )?;
        let fetchers = default_fetchers(client, &config.user_agent, config.rss_items_per_fetch);
        Ok(Self::with_fetchers(config, fetchers))
    }

    /// Start the scheduler. Must be called inside a tokio runtime.
    pub fn start(&self) -> JoinHandle<()> {
        info!(
            target: "ingest",
            max_concurrent_fetches = self.config.max_concurrent_fetches,
            failure_threshold = self.config.failure_threshold,
            "starting live sources engine"
        );
        self.scheduler.start()
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub fn management(&self) -> ManagementApi {
        ManagementApi::new(self.registry.clone(), self.store.clone(), self.stats.clone())
    }

    /// HTTP router over the management API (no `/metrics`).
    pub fn router(&self) -> Router {
        crate::api::router(self.management())
    }
}
