//! Stream activation coordination.
//!
//! Turns "give me a playable stream for source X" into at most one
//! underlying activation, no matter how many callers ask concurrently.
//! The first caller starts an activation task (ensure a worker, then
//! wait for the segment store to show a playable manifest); everyone
//! else subscribes to the same `watch` channel and gets the shared
//! outcome. Deadlines are per-caller: a caller timing out or hanging up
//! never cancels the activation or the worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};

use segment_store::SegmentStore;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::health::{HealthMonitor, HealthSignal, HealthState};
use crate::registry::{Source, SourceId};
use crate::supervisor::Supervisor;

/// Shared outcome of one activation attempt.
#[derive(Debug, Clone)]
enum Activation {
    Pending,
    Ready,
    Failed(String),
}

#[derive(Clone)]
pub(crate) struct Coordinator {
    config: EngineConfig,
    store: SegmentStore,
    health: HealthMonitor,
    supervisor: Supervisor,
    activations: Arc<Mutex<HashMap<SourceId, watch::Receiver<Activation>>>>,
}

impl Coordinator {
    pub(crate) fn new(
        config: EngineConfig,
        store: SegmentStore,
        health: HealthMonitor,
        supervisor: Supervisor,
    ) -> Self {
        Self {
            config,
            store,
            health,
            supervisor,
            activations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Block (suspending only the caller) until the source has a playable
    /// manifest or `deadline` elapses.
    pub(crate) async fn resolve(
        &self,
        source: Source,
        deadline: Duration,
    ) -> Result<(), EngineError> {
        let id = source.id.clone();

        // An exhausted restart budget suppresses re-activation until the
        // cooldown has elapsed; callers get a retry-later verdict instead
        // of burning another process spawn.
        if self.health.in_cooldown(&id, self.config.cooldown()) {
            return Err(EngineError::SourceUnavailable {
                source_id: id,
                reason: "cooling down after repeated worker failures".to_string(),
            });
        }

        // Fast path: live worker with fresh, playable output. `touch`
        // first so the idle sweep cannot evict the worker under us.
        if self.supervisor.touch(&id).await {
            match self.store.probe(id.as_str()).await {
                Ok(Some(readiness))
                    if readiness.is_ready() && readiness.is_fresh(self.config.stall_window()) =>
                {
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Probe failed for {}: {}", id, e),
            }
        }

        let mut rx = self.join_or_start(&source).await;
        match tokio::time::timeout(deadline, wait_for_outcome(&mut rx)).await {
            Err(_) => Err(EngineError::Timeout(id)),
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(EngineError::SourceUnavailable {
                source_id: id,
                reason,
            }),
        }
    }

    /// Subscribe to the in-flight activation for a source, starting one
    /// if none exists. Only the first caller spawns work.
    async fn join_or_start(&self, source: &Source) -> watch::Receiver<Activation> {
        let mut activations = self.activations.lock().await;

        if let Some(rx) = activations.get(&source.id) {
            if matches!(*rx.borrow(), Activation::Pending) {
                return rx.clone();
            }
            activations.remove(&source.id);
        }

        let (tx, rx) = watch::channel(Activation::Pending);
        activations.insert(source.id.clone(), rx.clone());

        let coordinator = self.clone();
        let source = source.clone();
        tokio::spawn(async move {
            let outcome = coordinator.run_activation(&source).await;
            let _ = tx.send(match outcome {
                Ok(()) => Activation::Ready,
                Err(reason) => Activation::Failed(reason),
            });
            coordinator.activations.lock().await.remove(&source.id);
        });

        rx
    }

    /// The single activation body shared by all coalesced waiters.
    async fn run_activation(&self, source: &Source) -> Result<(), String> {
        if let Err(e) = self.supervisor.ensure_worker(source).await {
            let reason = e.to_string();
            tracing::warn!("Failed to start worker for {}: {}", source.id, reason);
            self.health
                .apply(&source.id, HealthSignal::WorkerFailed, Some(reason.as_str()));
            return Err(reason);
        }

        let grace_deadline = Instant::now() + self.config.startup_grace();
        loop {
            match self.store.probe(source.id.as_str()).await {
                Ok(Some(readiness))
                    if readiness.is_ready() && readiness.is_fresh(self.config.stall_window()) =>
                {
                    self.health
                        .apply(&source.id, HealthSignal::ManifestFresh, None);
                    self.supervisor.touch(&source.id).await;
                    return Ok(());
                }
                Ok(_) => {}
                // Store faults are logged and retried within the grace
                // period; persistent ones surface as unavailability below.
                Err(e) => tracing::warn!("Probe failed for {}: {}", source.id, e),
            }

            // The supervisor's monitor task marks the source offline when
            // the restart budget runs out mid-activation.
            if self.health.state_of(&source.id) == Some(HealthState::Offline) {
                return Err("worker failed before producing output".to_string());
            }

            if Instant::now() >= grace_deadline {
                tracing::warn!(
                    "No playable manifest for {} within startup grace period",
                    source.id
                );
                self.supervisor.stop_worker(&source.id).await;
                self.health.apply(
                    &source.id,
                    HealthSignal::GraceExpired,
                    Some("no output within startup grace period"),
                );
                return Err("no output within startup grace period".to_string());
            }

            tokio::time::sleep(self.config.activation_poll()).await;
        }
    }
}

/// Wait until an activation reaches a terminal state.
async fn wait_for_outcome(rx: &mut watch::Receiver<Activation>) -> Result<(), String> {
    loop {
        let current = rx.borrow_and_update().clone();
        match current {
            Activation::Ready => return Ok(()),
            Activation::Failed(reason) => return Err(reason),
            Activation::Pending => {
                if rx.changed().await.is_err() {
                    return Err("activation aborted".to_string());
                }
            }
        }
    }
}
