use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the stream delivery engine.
///
/// All timing policy (grace periods, freshness windows, restart budget,
/// cooldown) is configurable rather than hard-coded; the defaults match
/// the behavior expected by the reference dashboard client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base directory for HLS output (one subdirectory per source)
    pub segment_dir: PathBuf,
    /// Transcoder binary to spawn (default: "ffmpeg")
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    /// How long a freshly started worker gets to produce its first
    /// playable manifest before the source is marked offline (default: 20)
    #[serde(default = "default_startup_grace_secs")]
    pub startup_grace_secs: u64,
    /// Manifest older than this counts as stalled output (default: 10)
    #[serde(default = "default_stall_window_secs")]
    pub stall_window_secs: u64,
    /// Health monitor polling interval (default: 2)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Workers with no playback activity for this long are stopped (default: 60)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Maximum automatic restarts within the restart window (default: 5)
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Window over which restarts are counted, in seconds (default: 60)
    #[serde(default = "default_restart_window_secs")]
    pub restart_window_secs: u64,
    /// Base delay before an automatic respawn; doubles per attempt (default: 500)
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
    /// After the restart budget is exhausted, re-activation is refused
    /// for this long (default: 30)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// SIGTERM grace period before a worker is force-killed (default: 3000)
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// How often an in-flight activation re-probes the segment store (default: 200)
    #[serde(default = "default_activation_poll_ms")]
    pub activation_poll_ms: u64,
    /// HLS segment duration in seconds (default: 2, for low latency)
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,
    /// Number of segments kept in the playlist window (default: 5)
    #[serde(default = "default_playlist_window")]
    pub playlist_window: u32,
    /// Unreferenced segments linger this long before deletion (default: 2)
    #[serde(default = "default_segment_linger_secs")]
    pub segment_linger_secs: u64,
    /// Default per-request resolve deadline when the caller names none (default: 15)
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,
    /// Upper bound on caller-supplied resolve deadlines (default: 60)
    #[serde(default = "default_resolve_timeout_cap_secs")]
    pub resolve_timeout_cap_secs: u64,
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_startup_grace_secs() -> u64 {
    20
}

fn default_stall_window_secs() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_max_restarts() -> u32 {
    5
}

fn default_restart_window_secs() -> u64 {
    60
}

fn default_restart_backoff_ms() -> u64 {
    500
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_stop_grace_ms() -> u64 {
    3000
}

fn default_activation_poll_ms() -> u64 {
    200
}

fn default_segment_seconds() -> u32 {
    2
}

fn default_playlist_window() -> u32 {
    5
}

fn default_segment_linger_secs() -> u64 {
    2
}

fn default_resolve_timeout_secs() -> u64 {
    15
}

fn default_resolve_timeout_cap_secs() -> u64 {
    60
}

impl EngineConfig {
    /// Create a config with defaults for everything but the output directory.
    pub fn new(segment_dir: PathBuf) -> Self {
        Self {
            segment_dir,
            ffmpeg_bin: default_ffmpeg_bin(),
            startup_grace_secs: default_startup_grace_secs(),
            stall_window_secs: default_stall_window_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_restarts: default_max_restarts(),
            restart_window_secs: default_restart_window_secs(),
            restart_backoff_ms: default_restart_backoff_ms(),
            cooldown_secs: default_cooldown_secs(),
            stop_grace_ms: default_stop_grace_ms(),
            activation_poll_ms: default_activation_poll_ms(),
            segment_seconds: default_segment_seconds(),
            playlist_window: default_playlist_window(),
            segment_linger_secs: default_segment_linger_secs(),
            resolve_timeout_secs: default_resolve_timeout_secs(),
            resolve_timeout_cap_secs: default_resolve_timeout_cap_secs(),
        }
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    pub fn stall_window(&self) -> Duration {
        Duration::from_secs(self.stall_window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn activation_poll(&self) -> Duration {
        Duration::from_millis(self.activation_poll_ms)
    }

    pub fn segment_linger(&self) -> Duration {
        Duration::from_secs(self.segment_linger_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn resolve_timeout_cap(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_cap_secs)
    }
}
