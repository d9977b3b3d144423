//! Stream delivery engine for the site monitoring dashboard.
//!
//! Takes a set of physical camera sources (network address plus
//! credentials), converts their live video into HLS on demand via one
//! external ffmpeg process per active source, tracks each camera's
//! operational health, and resolves playback requests to manifest
//! references with bounded latency.
//!
//! # Architecture
//!
//! ```text
//! Browser <--HLS--> playback-api <--resolve--> stream-engine <--RTSP--> cameras
//!                                                    |
//!                                              segment-store
//! ```
//!
//! - One transcode worker (ffmpeg) per *active* source, started on the
//!   first playback request, never eagerly.
//! - Concurrent requests for the same source coalesce into one
//!   activation; at most one worker per source ever exists.
//! - A background monitor derives Online/Starting/Stalled/Offline per
//!   source from process liveness and manifest freshness.
//! - Crashed workers respawn with exponential backoff inside a bounded
//!   restart budget; past it the source goes offline until a cooldown
//!   elapses.
//! - Idle workers (no playback activity) are evicted to free resources.

pub mod config;
pub mod error;
pub mod health;
pub mod registry;

mod coordinator;
mod engine;
mod supervisor;
mod worker;

pub use config::EngineConfig;
pub use engine::{ManifestRef, StreamEngine};
pub use error::EngineError;
pub use health::{transition, HealthSignal, HealthSnapshot, HealthState};
pub use registry::{Source, SourceId};

/// Check that the configured transcoder binary (ffmpeg) is runnable.
pub async fn check_dependencies(ffmpeg_bin: &str) -> Result<(), EngineError> {
    worker::check_transcoder(ffmpeg_bin).await
}
