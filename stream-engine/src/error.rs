use thiserror::Error;

use crate::registry::SourceId;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The source id is not in the registry. Not retryable.
    #[error("Unknown source: {0}")]
    SourceUnknown(SourceId),

    /// The worker failed to start or crashed past its restart budget.
    /// Retryable after the cooldown elapses.
    #[error("Source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: SourceId, reason: String },

    /// Activation was still in progress when the caller's deadline elapsed.
    /// Retryable immediately or shortly.
    #[error("Timed out waiting for source {0} to become ready")]
    Timeout(SourceId),

    #[error("Invalid source id: {0}")]
    InvalidSourceId(String),

    /// Transcoder process fault. Internal: recovered via restart within
    /// budget, or surfaced to callers as `SourceUnavailable`.
    #[error("Transcoder error: {0}")]
    Process(String),

    #[error("Segment store error: {0}")]
    Store(#[from] segment_store::SegmentStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
