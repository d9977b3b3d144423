//! Integration tests driving the engine with a stub transcoder script
//! instead of ffmpeg. The script receives the same argument vector as
//! ffmpeg would; its last argument is the playlist path.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use stream_engine::{EngineConfig, EngineError, HealthState, Source, SourceId, StreamEngine};
use tempfile::TempDir;

/// Shell fragment that writes a playable one-segment manifest to the
/// playlist path (held in `$last`).
const WRITE_MANIFEST: &str = r#"dir="$(dirname "$last")"
mkdir -p "$dir"
: > "$dir/segment_00000.ts"
printf '#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:2.000,\nsegment_00000.ts\n' > "$last""#;

fn stub_transcoder(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("stub-transcoder.sh");
    // `for last; do :; done` leaves the final argument in $last
    let script = format!("#!/bin/sh\nfor last; do :; done\n{}\n", body);
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn test_config(tmp: &TempDir, stub: &Path) -> EngineConfig {
    let mut config = EngineConfig::new(tmp.path().join("streams"));
    config.ffmpeg_bin = stub.to_string_lossy().to_string();
    config.startup_grace_secs = 5;
    config.stall_window_secs = 5;
    config.activation_poll_ms = 50;
    config.restart_backoff_ms = 10;
    config.stop_grace_ms = 500;
    config.idle_timeout_secs = 1;
    config.cooldown_secs = 30;
    config.max_restarts = 2;
    config
}

fn camera(id: &str) -> Source {
    Source {
        id: SourceId::new(id).unwrap(),
        url: format!("rtsp://127.0.0.1:8554/{}", id),
        name: None,
        group: None,
    }
}

fn spawn_count(log: &Path) -> usize {
    std::fs::read_to_string(log)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_resolve_unknown_source() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_transcoder(tmp.path(), "sleep 60");
    let engine = StreamEngine::new(test_config(&tmp, &stub));

    let id = SourceId::new("ghost").unwrap();
    let err = engine.resolve(&id, Duration::from_secs(1)).await.unwrap_err();

    assert!(matches!(err, EngineError::SourceUnknown(_)));
}

#[tokio::test]
async fn test_end_to_end_resolve() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_transcoder(tmp.path(), &format!("{}\nsleep 60", WRITE_MANIFEST));
    let engine = StreamEngine::new(test_config(&tmp, &stub));

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;
    assert_eq!(engine.health_of(&id).unwrap().state, HealthState::Unknown);

    let manifest = engine.resolve(&id, Duration::from_secs(20)).await.unwrap();

    assert_eq!(manifest.source_id, id);
    assert!(manifest.manifest_path.exists());
    assert!(engine.has_worker(&id).await);
    assert_eq!(engine.health_of(&id).unwrap().state, HealthState::Online);
}

#[tokio::test]
async fn test_short_deadline_returns_timeout() {
    let tmp = TempDir::new().unwrap();
    // Worker never produces a manifest within the caller's deadline
    let stub = stub_transcoder(tmp.path(), "sleep 60");
    let engine = StreamEngine::new(test_config(&tmp, &stub));

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;

    let err = engine
        .resolve(&id, Duration::from_millis(300))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Timeout(_)));
    // The activation keeps running for future callers
    assert!(engine.has_worker(&id).await);
    assert_eq!(engine.health_of(&id).unwrap().state, HealthState::Starting);
}

#[tokio::test]
async fn test_concurrent_resolves_spawn_one_worker() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("spawns.log");
    let stub = stub_transcoder(
        tmp.path(),
        &format!("echo spawned >> \"{}\"\n{}\nsleep 60", log.display(), WRITE_MANIFEST),
    );
    let engine = Arc::new(StreamEngine::new(test_config(&tmp, &stub)));

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let engine = Arc::clone(&engine);
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            engine.resolve(&id, Duration::from_secs(20)).await
        }));
    }

    for task in tasks {
        let result = task.await.unwrap();
        assert!(result.is_ok(), "coalesced resolve failed: {:?}", result);
    }

    assert_eq!(spawn_count(&log), 1, "resolve storm must spawn exactly one worker");
}

#[tokio::test]
async fn test_coalesced_waiters_share_slow_activation() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("spawns.log");
    let stub = stub_transcoder(
        tmp.path(),
        &format!(
            "echo spawned >> \"{}\"\nsleep 0.4\n{}\nsleep 60",
            log.display(),
            WRITE_MANIFEST
        ),
    );
    let engine = Arc::new(StreamEngine::new(test_config(&tmp, &stub)));

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let engine = Arc::clone(&engine);
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            engine.resolve(&id, Duration::from_secs(20)).await
        }));
    }

    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert_eq!(spawn_count(&log), 1);
}

#[tokio::test]
async fn test_per_caller_deadlines() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_transcoder(
        tmp.path(),
        &format!("sleep 0.5\n{}\nsleep 60", WRITE_MANIFEST),
    );
    let engine = Arc::new(StreamEngine::new(test_config(&tmp, &stub)));

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;

    let impatient = {
        let engine = Arc::clone(&engine);
        let id = id.clone();
        tokio::spawn(async move { engine.resolve(&id, Duration::from_millis(100)).await })
    };
    let patient = {
        let engine = Arc::clone(&engine);
        let id = id.clone();
        tokio::spawn(async move { engine.resolve(&id, Duration::from_secs(20)).await })
    };

    // Each caller gets its own deadline against the shared activation,
    // and the impatient caller's timeout doesn't abort it
    assert!(matches!(
        impatient.await.unwrap().unwrap_err(),
        EngineError::Timeout(_)
    ));
    assert!(patient.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_crash_past_budget_goes_offline_with_cooldown() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("spawns.log");
    let stub = stub_transcoder(
        tmp.path(),
        &format!("echo spawned >> \"{}\"\nexit 1", log.display()),
    );
    let engine = StreamEngine::new(test_config(&tmp, &stub));

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;

    let err = engine.resolve(&id, Duration::from_secs(10)).await.unwrap_err();
    assert!(matches!(err, EngineError::SourceUnavailable { .. }));
    assert_eq!(engine.health_of(&id).unwrap().state, HealthState::Offline);

    // Initial spawn plus max_restarts automatic respawns
    let spawns_after_failure = spawn_count(&log);
    assert_eq!(spawns_after_failure, 3);

    // During cooldown, resolving again is refused without a new spawn
    let err = engine.resolve(&id, Duration::from_secs(10)).await.unwrap_err();
    assert!(matches!(err, EngineError::SourceUnavailable { .. }));
    assert_eq!(spawn_count(&log), spawns_after_failure);
    assert!(!engine.has_worker(&id).await);
}

#[tokio::test]
async fn test_grace_expiry_marks_offline() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_transcoder(tmp.path(), "sleep 60");
    let mut config = test_config(&tmp, &stub);
    config.startup_grace_secs = 1;
    let engine = StreamEngine::new(config);

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;

    let err = engine.resolve(&id, Duration::from_secs(10)).await.unwrap_err();

    assert!(matches!(err, EngineError::SourceUnavailable { .. }));
    assert_eq!(engine.health_of(&id).unwrap().state, HealthState::Offline);
    assert!(!engine.has_worker(&id).await);
}

#[tokio::test]
async fn test_source_removal_kills_worker_and_purges() {
    let tmp = TempDir::new().unwrap();
    let pidfile = tmp.path().join("worker.pid");
    let stub = stub_transcoder(
        tmp.path(),
        &format!("echo $$ > \"{}\"\n{}\nsleep 60", pidfile.display(), WRITE_MANIFEST),
    );
    let engine = StreamEngine::new(test_config(&tmp, &stub));

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;
    engine.resolve(&id, Duration::from_secs(20)).await.unwrap();

    let pid: u32 = std::fs::read_to_string(&pidfile)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let area = engine.manifest_path(&id).parent().unwrap().to_path_buf();
    assert!(area.exists());

    assert!(engine.remove_source(&id).await);

    assert!(!engine.has_worker(&id).await);
    assert!(!area.exists(), "segment area must be purged");
    assert!(engine.health_of(&id).is_none(), "health record must be dropped");

    // The process itself must be gone within a bounded time
    let mut alive = true;
    for _ in 0..40 {
        alive = Path::new(&format!("/proc/{}", pid)).exists();
        if !alive {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!alive, "transcoder process must be terminated");

    // Removing an unknown id reports false
    assert!(!engine.remove_source(&id).await);
}

#[tokio::test]
async fn test_idle_worker_is_evicted() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_transcoder(tmp.path(), &format!("{}\nsleep 60", WRITE_MANIFEST));
    let engine = StreamEngine::new(test_config(&tmp, &stub));

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;
    engine.resolve(&id, Duration::from_secs(20)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    engine.sweep_idle_once().await;

    assert!(!engine.has_worker(&id).await);
    assert_eq!(engine.health_of(&id).unwrap().state, HealthState::Unknown);
    assert!(!engine.manifest_path(&id).exists());
}

#[tokio::test]
async fn test_recent_activity_defers_eviction() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_transcoder(tmp.path(), &format!("{}\nsleep 60", WRITE_MANIFEST));
    let engine = StreamEngine::new(test_config(&tmp, &stub));

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;
    engine.resolve(&id, Duration::from_secs(20)).await.unwrap();

    // Past the nominal timeout boundary overall, but with activity inside
    // the idle window
    tokio::time::sleep(Duration::from_millis(700)).await;
    engine.record_activity(&id).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    engine.sweep_idle_once().await;

    assert!(engine.has_worker(&id).await, "active worker must not be evicted");
}

#[tokio::test]
async fn test_stall_detection_and_recovery() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_transcoder(tmp.path(), &format!("{}\nsleep 60", WRITE_MANIFEST));
    let mut config = test_config(&tmp, &stub);
    config.stall_window_secs = 1;
    let engine = StreamEngine::new(config);

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;
    engine.resolve(&id, Duration::from_secs(20)).await.unwrap();
    assert_eq!(engine.health_of(&id).unwrap().state, HealthState::Online);

    // The worker is alive but its output stops advancing
    tokio::time::sleep(Duration::from_millis(1300)).await;
    engine.poll_health_once().await;
    assert_eq!(engine.health_of(&id).unwrap().state, HealthState::Stalled);

    // Output resumes: rewrite the manifest with a fresh mtime
    let manifest_path = engine.manifest_path(&id);
    let text = std::fs::read_to_string(&manifest_path).unwrap();
    std::fs::write(&manifest_path, text).unwrap();

    engine.poll_health_once().await;
    assert_eq!(engine.health_of(&id).unwrap().state, HealthState::Online);
}

#[tokio::test]
async fn test_shutdown_stops_workers_and_cleans_up() {
    let tmp = TempDir::new().unwrap();
    let stub = stub_transcoder(tmp.path(), &format!("{}\nsleep 60", WRITE_MANIFEST));
    let engine = StreamEngine::new(test_config(&tmp, &stub));

    let source = camera("cam1");
    let id = source.id.clone();
    engine.add_source(source).await;
    engine.resolve(&id, Duration::from_secs(20)).await.unwrap();

    engine.shutdown().await;

    assert!(!engine.has_worker(&id).await);
    assert!(!engine.config().segment_dir.exists());
}
