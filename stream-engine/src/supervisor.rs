//! Transcode worker supervisor.
//!
//! Owns every worker process: at most one per source, spawned on demand,
//! respawned with exponential backoff within a bounded restart budget,
//! and terminated (SIGTERM, then kill) with its segment area purged on
//! every exit path. Nothing outside this module touches a worker's
//! process handle; other components refer to workers by source id only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use segment_store::SegmentStore;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::health::{HealthMonitor, HealthSignal};
use crate::registry::{Source, SourceId};
use crate::worker;

struct WorkerEntry {
    /// Distinguishes this worker from any successor for the same source,
    /// so a monitor task never removes an entry it no longer owns.
    generation: u64,
    started_at: Instant,
    last_activity: Instant,
    restart_count: u32,
    shutdown: watch::Sender<bool>,
    monitor: JoinHandle<()>,
}

struct SupervisorInner {
    config: EngineConfig,
    store: SegmentStore,
    health: HealthMonitor,
    workers: Mutex<HashMap<SourceId, WorkerEntry>>,
    generations: AtomicU64,
}

/// Cheaply cloneable handle to the worker set.
#[derive(Clone)]
pub(crate) struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    pub(crate) fn new(config: EngineConfig, store: SegmentStore, health: HealthMonitor) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                store,
                health,
                workers: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Make sure a live worker exists for `source`.
    ///
    /// Idempotent: a second call while a worker is alive only refreshes
    /// its activity timestamp. At most one worker per source is a hard
    /// invariant; two transcoders writing the same area would corrupt
    /// the segment sequence.
    pub(crate) async fn ensure_worker(&self, source: &Source) -> Result<(), EngineError> {
        let mut workers = self.inner.workers.lock().await;

        if let Some(entry) = workers.get_mut(&source.id) {
            entry.last_activity = Instant::now();
            return Ok(());
        }

        let area = self.inner.store.ensure_area(source.id.as_str()).await?;
        let child = worker::spawn_transcoder(&self.inner.config, &source.url, &area)?;

        self.inner
            .health
            .apply(&source.id, HealthSignal::ActivationRequested, None);

        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = tokio::spawn(monitor_worker(
            Arc::clone(&self.inner),
            source.clone(),
            generation,
            child,
            shutdown_rx,
        ));

        tracing::info!("Started transcode worker for {}", source.id);
        workers.insert(
            source.id.clone(),
            WorkerEntry {
                generation,
                started_at: Instant::now(),
                last_activity: Instant::now(),
                restart_count: 0,
                shutdown: shutdown_tx,
                monitor,
            },
        );

        Ok(())
    }

    /// Stop a source's worker if one is running, wait for the process to
    /// be gone, and purge its segment area.
    pub(crate) async fn stop_worker(&self, id: &SourceId) {
        let entry = self.inner.workers.lock().await.remove(id);
        if let Some(entry) = entry {
            tracing::info!("Stopping transcode worker for {}", id);
            let _ = entry.shutdown.send(true);
            let _ = entry.monitor.await;
        }
        if let Err(e) = self.inner.store.purge(id.as_str()).await {
            tracing::warn!("Failed to purge segment area for {}: {}", id, e);
        }
    }

    pub(crate) async fn is_running(&self, id: &SourceId) -> bool {
        self.inner.workers.lock().await.contains_key(id)
    }

    /// Record playback activity for a source. Returns false when no
    /// worker is running (the caller's fast path must re-activate).
    pub(crate) async fn touch(&self, id: &SourceId) -> bool {
        match self.inner.workers.lock().await.get_mut(id) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Stop workers with no recorded activity inside the idle window.
    ///
    /// Selection and removal happen under the worker-map lock, so a
    /// concurrent `resolve` that just touched a worker either refreshed
    /// its timestamp first (and the worker survives) or finds it gone
    /// and re-activates.
    pub(crate) async fn evict_idle(&self, idle: Duration) -> Vec<SourceId> {
        let stale: Vec<(SourceId, WorkerEntry)> = {
            let mut workers = self.inner.workers.lock().await;
            let ids: Vec<SourceId> = workers
                .iter()
                .filter(|(_, entry)| entry.last_activity.elapsed() >= idle)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| workers.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let mut evicted = Vec::with_capacity(stale.len());
        for (id, entry) in stale {
            tracing::info!(
                "Evicting idle transcode worker for {} (up {:?}, {} restarts)",
                id,
                entry.started_at.elapsed(),
                entry.restart_count
            );
            let _ = entry.shutdown.send(true);
            let _ = entry.monitor.await;
            if let Err(e) = self.inner.store.purge(id.as_str()).await {
                tracing::warn!("Failed to purge segment area for {}: {}", id, e);
            }
            evicted.push(id);
        }
        evicted
    }

    /// Stop every worker. Used on shutdown.
    pub(crate) async fn stop_all(&self) {
        let entries: Vec<(SourceId, WorkerEntry)> =
            self.inner.workers.lock().await.drain().collect();
        for (id, entry) in entries {
            let _ = entry.shutdown.send(true);
            let _ = entry.monitor.await;
            let _ = self.inner.store.purge(id.as_str()).await;
        }
    }
}

/// Per-worker monitor task: waits on process exit, respawns within the
/// restart budget, and performs graceful termination on shutdown.
async fn monitor_worker(
    inner: Arc<SupervisorInner>,
    source: Source,
    generation: u64,
    mut child: Child,
    mut shutdown: watch::Receiver<bool>,
) {
    let config = &inner.config;
    let mut recent_exits: Vec<Instant> = Vec::new();
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            status = child.wait() => {
                if *shutdown.borrow() {
                    return;
                }

                let detail = match status {
                    Ok(s) => format!("transcoder exited: {}", s),
                    Err(e) => format!("transcoder wait failed: {}", e),
                };
                tracing::warn!("Worker for {}: {}", source.id, detail);

                let now = Instant::now();
                recent_exits.retain(|t| now.duration_since(*t) < config.restart_window());
                recent_exits.push(now);

                if recent_exits.len() as u32 > config.max_restarts {
                    tracing::warn!(
                        "Restart budget exhausted for {} ({} exits in {:?})",
                        source.id,
                        recent_exits.len(),
                        config.restart_window()
                    );
                    inner.health.apply(&source.id, HealthSignal::WorkerFailed, Some(detail.as_str()));
                    break;
                }

                let delay = config.restart_backoff() * 2u32.saturating_pow(attempt.min(6));
                attempt += 1;
                tracing::info!(
                    "Respawning transcoder for {} in {:?} (attempt {})",
                    source.id,
                    delay,
                    attempt
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return,
                }

                let area = inner.store.area(source.id.as_str());
                match worker::spawn_transcoder(config, &source.url, &area) {
                    Ok(new_child) => {
                        child = new_child;
                        inner.health.apply(&source.id, HealthSignal::WorkerRestarted, Some(detail.as_str()));
                        sync_restart_count(&inner, &source.id, generation, attempt).await;
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        tracing::warn!("Respawn failed for {}: {}", source.id, reason);
                        inner.health.apply(&source.id, HealthSignal::WorkerFailed, Some(reason.as_str()));
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                worker::terminate(&mut child, config.stop_grace()).await;
                return;
            }
        }
    }

    // Failure path: the entry is still in the map, remove it (unless a
    // newer worker already replaced it) and clean up the area.
    {
        let mut workers = inner.workers.lock().await;
        let ours = workers
            .get(&source.id)
            .map(|entry| entry.generation == generation)
            .unwrap_or(false);
        if ours {
            workers.remove(&source.id);
        }
    }
    if let Err(e) = inner.store.purge(source.id.as_str()).await {
        tracing::warn!("Failed to purge segment area for {}: {}", source.id, e);
    }
}

async fn sync_restart_count(
    inner: &Arc<SupervisorInner>,
    id: &SourceId,
    generation: u64,
    count: u32,
) {
    if let Some(entry) = inner.workers.lock().await.get_mut(id) {
        if entry.generation == generation {
            entry.restart_count = count;
        }
    }
}
