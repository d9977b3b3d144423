//! Segment aging.
//!
//! The transcoding process keeps a bounded sliding window in the playlist
//! (oldest entry dropped as a new one is appended) but never deletes the
//! backing files itself. This module does the deleting, with one ordering
//! guarantee: a segment file is only removed once the on-disk playlist no
//! longer references it AND the file has lingered past a small margin
//! since its last write. A client that fetched the previous playlist
//! revision can therefore still retrieve every segment it names.

use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::error::SegmentStoreError;
use crate::manifest::parse_media_playlist;
use crate::{MANIFEST_FILE, SEGMENT_EXT};

/// Delete unreferenced, aged-out segment files in one source's area.
///
/// Returns the number of files deleted. A missing area or missing
/// playlist means there is nothing to age out yet, so both are a no-op.
pub async fn sweep_area(area: &Path, linger: Duration) -> Result<usize, SegmentStoreError> {
    let manifest_path = area.join(MANIFEST_FILE);

    let text = match tokio::fs::read_to_string(&manifest_path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    // Parse first: if the playlist is mid-rewrite and unreadable, delete
    // nothing rather than risk removing a still-referenced segment.
    let playlist = match parse_media_playlist(&text) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!("Skipping sweep of {}: {}", area.display(), e);
            return Ok(0);
        }
    };

    let mut deleted = 0;
    let mut entries = match tokio::fs::read_dir(area).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let now = SystemTime::now();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|ext| ext != SEGMENT_EXT).unwrap_or(true) {
            continue;
        }

        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        if playlist.segments.iter().any(|s| s == &filename) {
            continue;
        }

        // Unreferenced. Only delete once it has sat untouched past the
        // linger margin, so clients on the previous playlist revision can
        // finish fetching it.
        let old_enough = entry
            .metadata()
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|m| now.duration_since(m).ok())
            .map(|age| age >= linger)
            .unwrap_or(false);

        if old_enough {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::trace!("Aged out segment {}", path.display());
                    deleted += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(deleted)
}
