//! Minimal HLS media-playlist parsing.
//!
//! The engine only needs three things out of a playlist: the media
//! sequence, the target duration, and which segment files are currently
//! referenced. Anything else ffmpeg writes is passed through untouched.

use crate::error::SegmentStoreError;

/// Parsed view of one HLS media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    /// Sequence number of the first segment in the playlist.
    pub media_sequence: u64,
    /// Maximum segment duration in whole seconds.
    pub target_duration: u32,
    /// Segment filenames in playlist order (URL path stripped).
    pub segments: Vec<String>,
}

/// Parse an HLS media playlist.
///
/// Lenient about tags it doesn't know; strict about the `#EXTM3U` header.
pub fn parse_media_playlist(text: &str) -> Result<MediaPlaylist, SegmentStoreError> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

    match lines.next() {
        Some("#EXTM3U") => {}
        _ => {
            return Err(SegmentStoreError::InvalidPlaylist(
                "missing #EXTM3U header".to_string(),
            ))
        }
    }

    let mut media_sequence = 0;
    let mut target_duration = 0;
    let mut segments = Vec::new();

    for line in lines {
        if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = value.parse().map_err(|_| {
                SegmentStoreError::InvalidPlaylist(format!("bad media sequence: {}", value))
            })?;
        } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = value.parse().map_err(|_| {
                SegmentStoreError::InvalidPlaylist(format!("bad target duration: {}", value))
            })?;
        } else if !line.starts_with('#') {
            // A URI line. ffmpeg may prefix segments with a base URL
            // (e.g. "segment/segment_004.ts"); keep only the filename.
            let filename = line.rsplit('/').next().unwrap_or(line);
            segments.push(filename.to_string());
        }
    }

    Ok(MediaPlaylist {
        media_sequence,
        target_duration,
        segments,
    })
}
