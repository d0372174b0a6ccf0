// src/ingest/scheduler.rs
//! Per-source ingestion scheduling.
//!
//! A supervisor task follows the registry's lifecycle events and keeps one
//! worker task per live source. A worker runs its cycles strictly one after
//! another, so a source never has two fetches in flight. Workers treat the
//! registry as the source of truth: a wake-up only means "re-read your status".
//!
//! Worker state machine: `Stopped -> Scheduled -> Fetching -> Scheduled | Stopped`.

use std::{collections::HashMap, sync::Arc, time::Duration};

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
    sync::{broadcast::error::RecvError, watch, Notify, Semaphore},
    task::JoinHandle,
    time::{sleep_until, timeout, Instant},
};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::ingest::ensure_metrics_described;
use crate::ingest::types::FetcherSet;
use crate::registry::{LifecycleEvent, SourceRegistry};
use crate::rolling::RollingWindowStore;
use crate::source::{SourceId, SourceStatus};
use crate::stats::{FailureVerdict, StatsTracker};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on fetches in flight across all sources.
    pub max_concurrent_fetches: usize,
    /// Per-fetch timeout is `min(interval, fetch_timeout_cap)`.
    pub fetch_timeout_cap: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 16,
            fetch_timeout_cap: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Stopped,
    Scheduled,
    Fetching,
}

struct Shared {
    registry: Arc<SourceRegistry>,
    store: Arc<RollingWindowStore>,
    stats: Arc<StatsTracker>,
    fetchers: FetcherSet,
    permits: Arc<Semaphore>,
    cfg: SchedulerConfig,
}

struct WorkerHandle {
    wake: Arc<Notify>,
    state: watch::Receiver<CycleState>,
    task: JoinHandle<()>,
}

pub struct IngestionScheduler {
    shared: Arc<Shared>,
    workers: Mutex<HashMap<SourceId, WorkerHandle>>,
    shutdown: watch::Sender<bool>,
}

impl IngestionScheduler {
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<RollingWindowStore>,
        stats: Arc<StatsTracker>,
        fetchers: FetcherSet,
        cfg: SchedulerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(cfg.max_concurrent_fetches.max(1)));
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                registry,
                store,
                stats,
                fetchers,
                permits,
                cfg,
            }),
            workers: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Spawn the supervisor. Sources registered before this call are picked
    /// up by an initial reconcile. Must be called inside a tokio runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        ensure_metrics_described();
        let mut events = self.shared.registry.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        self.reconcile();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!(target: "scheduler", "ingestion scheduler started");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    ev = events.recv() => match ev {
                        Ok(ev) => this.on_event(ev),
                        Err(RecvError::Lagged(missed)) => {
                            warn!(target: "scheduler", missed, "lifecycle events lagged; reconciling");
                            this.reconcile();
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            this.shutdown();
            info!(target: "scheduler", "ingestion scheduler stopped");
        })
    }

    /// Stop the supervisor and every worker. In-flight fetches finish.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.stop_all();
    }

    pub fn cycle_state(&self, id: SourceId) -> Option<CycleState> {
        self.workers.lock().get(&id).map(|h| *h.state.borrow())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    fn on_event(&self, ev: LifecycleEvent) {
        match ev {
            // picked up at the next cycle start
            LifecycleEvent::ConfigChanged(_) => {}
            _ => self.sync_source(ev.source_id()),
        }
    }

    /// Bring the worker set in line with the registry.
    pub fn reconcile(&self) {
        let live = self.shared.registry.list();
        for src in &live {
            self.sync_source(src.source_id);
        }
        let stale: Vec<SourceId> = self
            .workers
            .lock()
            .keys()
            .filter(|id| !live.iter().any(|s| s.source_id == **id))
            .copied()
            .collect();
        for id in stale {
            self.stop_worker(id);
        }
    }

    fn sync_source(&self, id: SourceId) {
        let Ok(source) = self.shared.registry.get(id) else {
            self.stop_worker(id);
            return;
        };

        let mut workers = self.workers.lock();
        if let Some(h) = workers.get(&id) {
            if !h.task.is_finished() {
                h.wake.notify_one();
                return;
            }
        }

        let wake = Arc::new(Notify::new());
        let (state_tx, state_rx) = watch::channel(CycleState::Stopped);
        let worker = Worker {
            id,
            shared: Arc::clone(&self.shared),
            wake: Arc::clone(&wake),
            state: state_tx,
            shutdown: self.shutdown.subscribe(),
        };
        let task = tokio::spawn(worker.run(source.status));
        workers.insert(
            id,
            WorkerHandle {
                wake,
                state: state_rx,
                task,
            },
        );
        gauge!("live_sources_workers").set(workers.len() as f64);
        debug!(target: "scheduler", source_id = %id, status = %source.status, "worker spawned");
    }

    fn stop_worker(&self, id: SourceId) {
        let mut workers = self.workers.lock();
        if let Some(h) = workers.remove(&id) {
            // the worker re-reads the registry, finds nothing and exits
            h.wake.notify_one();
            debug!(target: "scheduler", source_id = %id, "worker stopped");
        }
        gauge!("live_sources_workers").set(workers.len() as f64);
    }

    fn stop_all(&self) {
        let drained: Vec<(SourceId, WorkerHandle)> = self.workers.lock().drain().collect();
        for (_, h) in drained {
            h.wake.notify_one();
        }
        gauge!("live_sources_workers").set(0.0);
    }
}

struct Worker {
    id: SourceId,
    shared: Arc<Shared>,
    wake: Arc<Notify>,
    state: watch::Sender<CycleState>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    fn current_status(&self) -> Option<SourceStatus> {
        self.shared.registry.get(self.id).ok().map(|s| s.status)
    }

    fn interval(&self) -> Option<Duration> {
        self.shared.registry.get(self.id).ok().map(|s| s.interval())
    }

    async fn run(mut self, initial: SourceStatus) {
        let mut last_seen = initial;
        // a new source waits one full interval before its first fetch
        let mut next_fire = match (initial, self.interval()) {
            (SourceStatus::Active, Some(every)) => Some(Instant::now() + every),
            _ => None,
        };

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.state.send_replace(if next_fire.is_some() {
                CycleState::Scheduled
            } else {
                CycleState::Stopped
            });

            let fired = match next_fire {
                Some(at) => tokio::select! {
                    _ = sleep_until(at) => true,
                    _ = self.wake.notified() => false,
                    _ = self.shutdown.changed() => break,
                },
                None => tokio::select! {
                    _ = self.wake.notified() => false,
                    _ = self.shutdown.changed() => break,
                },
            };

            if !fired {
                match self.current_status() {
                    None | Some(SourceStatus::Deleted) => break,
                    Some(SourceStatus::Active) => {
                        if last_seen != SourceStatus::Active {
                            // resumed: fetch right away
                            next_fire = Some(Instant::now());
                        }
                        last_seen = SourceStatus::Active;
                    }
                    Some(other) => {
                        next_fire = None;
                        last_seen = other;
                    }
                }
                continue;
            }

            let cycle_start = Instant::now();
            self.cycle().await;

            // pause / delete / escalation during the cycle: do not re-arm
            match self.current_status() {
                None | Some(SourceStatus::Deleted) => break,
                Some(SourceStatus::Active) => {
                    let every = self.interval().unwrap_or_default();
                    next_fire = Some((cycle_start + every).max(Instant::now()));
                    last_seen = SourceStatus::Active;
                }
                Some(other) => {
                    next_fire = None;
                    last_seen = other;
                }
            }
        }

        self.state.send_replace(CycleState::Stopped);
        debug!(target: "scheduler", source_id = %self.id, "worker exited");
    }

    /// One fetch-and-merge cycle. Only runs for sources that are still active.
    async fn cycle(&self) {
        let id = self.id;
        let source = match self.shared.registry.get(id) {
            Ok(s) if s.is_active() => s,
            _ => return,
        };

        self.state.send_replace(CycleState::Fetching);
        let Ok(permit) = self.shared.permits.clone().acquire_owned().await else {
            return;
        };

        let limit = source.interval().min(self.shared.cfg.fetch_timeout_cap);
        let t0 = Instant::now();
        let result = match self.shared.fetchers.get(source.source_type) {
            None => Err(FetchError::Misconfigured(format!(
                "no fetcher for source type '{}'",
                source.source_type
            ))),
            Some(fetcher) => match timeout(limit, fetcher.fetch(&source)).await {
                Ok(r) => r,
                Err(_) => Err(FetchError::Timeout(limit)),
            },
        };
        drop(permit);
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        match result {
            Ok(records) => {
                let fetched = records.len();
                let Some(out) = self.shared.store.insert(id, records) else {
                    debug!(target: "ingest", source_id = %id, "window released mid-cycle; result dropped");
                    return;
                };
                self.shared.stats.record_success(id, out.inserted);

                counter!("ingest_cycles_total", "outcome" => "ok").increment(1);
                counter!("ingest_entries_total").increment(out.inserted as u64);
                counter!("ingest_duplicates_total").increment(out.duplicates as u64);
                counter!("ingest_evicted_total").increment(out.evicted as u64);
                info!(
                    target: "ingest",
                    source_id = %id,
                    name = %source.source_name,
                    fetched,
                    inserted = out.inserted,
                    duplicates = out.duplicates,
                    evicted = out.evicted,
                    "ingest cycle ok"
                );
            }
            Err(e) => {
                counter!("ingest_cycles_total", "outcome" => e.label()).increment(1);
                warn!(
                    target: "ingest",
                    source_id = %id,
                    name = %source.source_name,
                    kind = e.label(),
                    error = %e,
                    "ingest cycle failed"
                );
                if self.shared.stats.record_failure(id, &e.to_string()) == FailureVerdict::Escalate {
                    match self.shared.registry.mark_error(id) {
                        Ok(_) => {
                            counter!("ingest_escalations_total").increment(1);
                            warn!(
                                target: "ingest",
                                source_id = %id,
                                threshold = self.shared.stats.policy().threshold,
                                "sustained failures; source moved to error"
                            );
                        }
                        Err(err) => {
                            debug!(target: "ingest", source_id = %id, error = %err, "escalation skipped")
                        }
                    }
                }
            }
        }
    }
}
