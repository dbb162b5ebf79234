//! Streaming Receiver Application
//!
//! Accepts audio and video chunk streams, records them per session, and serves
//! the session API (listing, compilation, download, deletion).

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use av_chunk_streamer::{
    api::{AppState, WebServer},
    compile::FfmpegMuxer,
    config::AppConfig,
    session::spawn_expiry_sweeper,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting AV Chunk Receiver");

    // Optional config file path as the first argument
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?.server;

    if config.access_token.is_none() {
        tracing::warn!("No access token configured, stream connections are not authenticated");
    }
    std::fs::create_dir_all(&config.storage_dir)?;

    let muxer = Arc::new(FfmpegMuxer::new(config.ffmpeg_path.clone()));
    let sweep_interval = config.sweep_interval();
    let state = Arc::new(AppState::new(config, muxer));

    let sweeper = spawn_expiry_sweeper(state.registry.clone(), sweep_interval);

    let server = WebServer::new(state);
    let listener = server.bind().await?;
    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    sweeper.abort();
    Ok(())
}
