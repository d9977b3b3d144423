//! Stream delivery daemon.
//!
//! Loads the camera list and engine policy from a TOML config file,
//! starts the background monitoring loops and serves the playback API.
//! Worker and health state are process-lifetime only: on restart every
//! source begins at `Unknown` and workers are re-spawned on demand.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use playback_api::stream_router;
use stream_engine::{EngineConfig, Source, StreamEngine};

#[derive(Parser)]
#[command(name = "streamd", about = "Camera stream delivery daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "streamd.toml")]
    config: PathBuf,

    /// Override the configured listen address
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[derive(Debug, Deserialize)]
struct StreamdConfig {
    #[serde(default = "default_listen")]
    listen: SocketAddr,
    engine: EngineConfig,
    #[serde(default)]
    sources: Vec<Source>,
}

fn default_listen() -> SocketAddr {
    ([0, 0, 0, 0], 8080).into()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let text = std::fs::read_to_string(&args.config)
        .with_context(|| format!("cannot read config file {}", args.config.display()))?;
    let config: StreamdConfig =
        toml::from_str(&text).with_context(|| format!("invalid config in {}", args.config.display()))?;

    if let Err(e) = stream_engine::check_dependencies(&config.engine.ffmpeg_bin).await {
        tracing::warn!("Transcoder check failed ({}); streams will not start until it is fixed", e);
    }

    let engine = Arc::new(StreamEngine::new(config.engine));
    for source in config.sources {
        engine.add_source(source).await;
    }
    let background = engine.spawn_background_tasks();

    let listen = args.listen.unwrap_or(config.listen);
    let app = stream_router(Arc::clone(&engine));
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot bind {}", listen))?;
    tracing::info!("Playback API listening on {}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in background {
        task.abort();
    }
    engine.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown requested");
}
