//! Per-source health tracking.
//!
//! Health is a small state machine driven by explicit signals rather than
//! ad-hoc flags, so the transition rules can be audited and tested in
//! isolation from process management. The monitor is the only writer;
//! everyone else reads snapshots by source id.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::registry::SourceId;

/// Operational state of one camera source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// No worker has run for this source since it was registered
    Unknown,
    /// A worker exists but has not yet produced a playable manifest
    Starting,
    /// Fresh segments are being produced
    Online,
    /// The worker process is alive but output has stopped advancing
    /// (frozen camera feed or hung transcoder)
    Stalled,
    /// The worker failed past its restart budget, or never produced
    /// output within the startup grace period
    Offline,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Unknown => "unknown",
            HealthState::Starting => "starting",
            HealthState::Online => "online",
            HealthState::Stalled => "stalled",
            HealthState::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Observations that drive health transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSignal {
    /// A worker was (re-)requested for the source
    ActivationRequested,
    /// A fresh manifest referencing at least one segment was observed
    ManifestFresh,
    /// The worker is alive but the manifest has not advanced within the
    /// stall window
    ManifestStale,
    /// The startup grace period elapsed without a playable manifest
    GraceExpired,
    /// The worker crashed and was automatically respawned within budget
    WorkerRestarted,
    /// The worker failed for good: spawn failure or restart budget exhausted
    WorkerFailed,
    /// The worker was stopped without failing (idle eviction)
    WorkerStopped,
}

/// Pure transition function for the health state machine.
///
/// Signals that don't apply to the current state leave it unchanged.
pub fn transition(state: HealthState, signal: HealthSignal) -> HealthState {
    use HealthSignal::*;
    use HealthState::*;

    match (state, signal) {
        (Unknown | Offline, ActivationRequested) => Starting,
        (Starting | Online | Stalled, ManifestFresh) => Online,
        (Online, ManifestStale) => Stalled,
        (Starting, GraceExpired) => Offline,
        (_, WorkerFailed) => Offline,
        (Starting | Online | Stalled, WorkerRestarted) => Starting,
        (Starting | Online | Stalled, WorkerStopped) => Unknown,
        (current, _) => current,
    }
}

#[derive(Debug)]
struct Record {
    state: HealthState,
    since: Instant,
    since_utc: DateTime<Utc>,
    last_error: Option<String>,
}

impl Record {
    fn new() -> Self {
        Self {
            state: HealthState::Unknown,
            since: Instant::now(),
            since_utc: Utc::now(),
            last_error: None,
        }
    }
}

/// Read-only view of one source's health, for the status feed.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub source_id: SourceId,
    pub state: HealthState,
    /// When the source entered its current state
    pub since: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Exclusive writer of health records; cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub(crate) struct HealthMonitor {
    records: Arc<DashMap<SourceId, Record>>,
}

impl HealthMonitor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create a record in `Unknown` for a newly registered source.
    pub(crate) fn register(&self, id: &SourceId) {
        self.records.entry(id.clone()).or_insert_with(Record::new);
    }

    /// Drop the record when the source leaves the registry.
    pub(crate) fn unregister(&self, id: &SourceId) {
        self.records.remove(id);
    }

    /// Apply a signal to a source's record. Unregistered ids are ignored.
    pub(crate) fn apply(&self, id: &SourceId, signal: HealthSignal, error: Option<&str>) {
        if let Some(mut record) = self.records.get_mut(id) {
            if let Some(err) = error {
                record.last_error = Some(err.to_string());
            }
            let next = transition(record.state, signal);
            if next != record.state {
                tracing::info!("Health {}: {} -> {} ({:?})", id, record.state, next, signal);
                record.state = next;
                record.since = Instant::now();
                record.since_utc = Utc::now();
                if next == HealthState::Online {
                    record.last_error = None;
                }
            }
        }
    }

    pub(crate) fn state_of(&self, id: &SourceId) -> Option<HealthState> {
        self.records.get(id).map(|r| r.state)
    }

    /// How long the source has been in its current state.
    pub(crate) fn time_in_state(&self, id: &SourceId) -> Option<Duration> {
        self.records.get(id).map(|r| r.since.elapsed())
    }

    /// Whether the source is `Offline` and still inside the cooldown
    /// window, during which re-activation is refused.
    pub(crate) fn in_cooldown(&self, id: &SourceId, cooldown: Duration) -> bool {
        self.records
            .get(id)
            .map(|r| r.state == HealthState::Offline && r.since.elapsed() < cooldown)
            .unwrap_or(false)
    }

    pub(crate) fn snapshot(&self, id: &SourceId) -> Option<HealthSnapshot> {
        self.records.get(id).map(|r| HealthSnapshot {
            source_id: id.clone(),
            state: r.state,
            since: r.since_utc,
            last_error: r.last_error.clone(),
        })
    }

    pub(crate) fn snapshot_all(&self) -> Vec<HealthSnapshot> {
        let mut all: Vec<_> = self
            .records
            .iter()
            .map(|entry| HealthSnapshot {
                source_id: entry.key().clone(),
                state: entry.state,
                since: entry.since_utc,
                last_error: entry.last_error.clone(),
            })
            .collect();
        all.sort_by(|a, b| a.source_id.as_str().cmp(b.source_id.as_str()));
        all
    }
}
