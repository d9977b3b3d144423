//! Segment store for the stream delivery engine.
//!
//! Each active camera source gets its own directory under a common base,
//! where the transcoding process writes an HLS playlist (`stream.m3u8`)
//! and its media segments (`segment_NNN.ts`). This crate owns everything
//! filesystem-side:
//!
//! - **Readiness probing**: does a source have a playable manifest yet,
//!   and how fresh is it?
//! - **Housekeeping**: deleting segment files that the playlist no longer
//!   references, strictly after the rewritten playlist is visible on disk.
//! - **Purging**: removing a source's entire area when its worker stops.

pub mod error;
pub mod housekeeping;
pub mod manifest;

pub use error::SegmentStoreError;
pub use manifest::MediaPlaylist;

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Filename of the HLS media playlist inside each source's area.
pub const MANIFEST_FILE: &str = "stream.m3u8";

/// File extension of media segments.
pub const SEGMENT_EXT: &str = "ts";

/// What a readiness probe found for one source's area.
#[derive(Debug, Clone)]
pub struct StreamReadiness {
    /// Number of segments the on-disk playlist currently references.
    pub segment_count: usize,
    /// Time since the playlist file was last written.
    pub manifest_age: Duration,
    /// Media sequence number of the playlist.
    pub media_sequence: u64,
}

impl StreamReadiness {
    /// A stream is playable once its playlist references at least one segment.
    pub fn is_ready(&self) -> bool {
        self.segment_count > 0
    }

    /// Whether the playlist was written recently enough to be considered live.
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.manifest_age <= window
    }
}

/// Filesystem area holding HLS output for all sources.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    base_dir: PathBuf,
}

impl SegmentStore {
    /// Create a store rooted at `base_dir`. The directory itself is created
    /// lazily, per source, by [`SegmentStore::ensure_area`].
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding one source's playlist and segments.
    pub fn area(&self, source_id: &str) -> PathBuf {
        self.base_dir.join(source_id)
    }

    /// Path of one source's playlist file.
    pub fn manifest_path(&self, source_id: &str) -> PathBuf {
        self.area(source_id).join(MANIFEST_FILE)
    }

    /// Path of one segment file, without checking existence.
    pub fn segment_path(&self, source_id: &str, filename: &str) -> PathBuf {
        self.area(source_id).join(filename)
    }

    /// Create the output directory for a source, ready for a worker to
    /// write into.
    pub async fn ensure_area(&self, source_id: &str) -> Result<PathBuf, SegmentStoreError> {
        let area = self.area(source_id);
        tokio::fs::create_dir_all(&area).await?;
        Ok(area)
    }

    /// Probe a source's area for a playable manifest.
    ///
    /// Returns `Ok(None)` when no playlist file exists yet (worker still
    /// starting up, or never started).
    pub async fn probe(&self, source_id: &str) -> Result<Option<StreamReadiness>, SegmentStoreError> {
        let path = self.manifest_path(source_id);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let manifest_age = metadata
            .modified()
            .ok()
            .and_then(|m| std::time::SystemTime::now().duration_since(m).ok())
            .unwrap_or_default();

        let text = tokio::fs::read_to_string(&path).await?;
        let playlist = manifest::parse_media_playlist(&text)?;

        Ok(Some(StreamReadiness {
            segment_count: playlist.segments.len(),
            manifest_age,
            media_sequence: playlist.media_sequence,
        }))
    }

    /// Delete a source's entire area. Safe to call when it doesn't exist.
    pub async fn purge(&self, source_id: &str) -> Result<(), SegmentStoreError> {
        let area = self.area(source_id);
        match tokio::fs::remove_dir_all(&area).await {
            Ok(()) => {
                tracing::debug!("Purged segment area for {}", source_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the whole base directory. Used on shutdown.
    pub async fn purge_all(&self) {
        if self.base_dir.exists() {
            let _ = tokio::fs::remove_dir_all(&self.base_dir).await;
        }
    }

    /// Run one housekeeping pass over a source's area, deleting segments
    /// the current playlist no longer references. See [`housekeeping`].
    pub async fn sweep(
        &self,
        source_id: &str,
        linger: Duration,
    ) -> Result<usize, SegmentStoreError> {
        housekeeping::sweep_area(&self.area(source_id), linger).await
    }
}
