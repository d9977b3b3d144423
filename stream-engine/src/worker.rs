//! Transcoder process handling: spawn and graceful termination.
//!
//! One external ffmpeg process per active source pulls the camera stream
//! and writes HLS output into that source's segment area. The stream is
//! copied, not re-encoded.

use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use segment_store::MANIFEST_FILE;

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Spawn a transcoder for one source, writing HLS output into `area`.
///
/// Segment deletion is NOT delegated to ffmpeg (`delete_segments` is
/// deliberately absent): the store's housekeeping sweep owns deletion so
/// that a segment is only removed after the rewritten playlist dropping
/// it is visible on disk.
pub(crate) fn spawn_transcoder(
    config: &EngineConfig,
    source_url: &str,
    area: &Path,
) -> Result<Child, EngineError> {
    let segment_pattern = area.join("segment_%05d.ts");
    let playlist_path = area.join(MANIFEST_FILE);

    let mut command = Command::new(&config.ffmpeg_bin);
    command
        .args(["-hide_banner", "-loglevel", "warning"])
        // Input settings
        .args(["-rtsp_transport", "tcp", "-i"])
        .arg(source_url)
        // Copy the stream without re-encoding
        .args(["-c", "copy"])
        // HLS output with a bounded sliding playlist window
        .args(["-f", "hls", "-hls_time"])
        .arg(config.segment_seconds.to_string())
        .arg("-hls_list_size")
        .arg(config.playlist_window.to_string())
        .args(["-hls_flags", "append_list"])
        .arg("-hls_segment_filename")
        .arg(&segment_pattern)
        // Prefix segment URIs so they resolve under the serving route
        .args(["-hls_base_url", "segment/"])
        .arg(&playlist_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::Process(format!(
                "transcoder binary '{}' not found",
                config.ffmpeg_bin
            ))
        } else {
            EngineError::Io(e)
        }
    })
}

/// Terminate a transcoder: SIGTERM first, forced kill after the grace
/// period. Always reaps the child.
pub(crate) async fn terminate(child: &mut Child, grace: std::time::Duration) {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        tracing::warn!("Transcoder did not exit within grace period, killing");
    }
    let _ = child.kill().await;
}

/// Check that the configured transcoder binary is runnable.
pub async fn check_transcoder(ffmpeg_bin: &str) -> Result<(), EngineError> {
    let status = Command::new(ffmpeg_bin)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| {
            EngineError::Process(format!("cannot run '{}': {}", ffmpeg_bin, e))
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(EngineError::Process(format!(
            "'{}' exited with {}",
            ffmpeg_bin, status
        )))
    }
}
