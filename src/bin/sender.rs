//! Streaming Sender Application
//!
//! Captures audio and video with ffmpeg and streams both to the receiver as
//! chunked WebSocket streams until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use av_chunk_streamer::{
    capture::{codecs::candidates, CaptureBackend, FfmpegCaptureBackend},
    config::AppConfig,
    network::WsConnector,
    protocol::{Channel, ConnectionState},
    streaming::{ChannelEvent, StreamingController},
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

    tracing::info!("Starting AV Chunk Sender");

    let mut config = AppConfig::load(None)?;

    // Endpoint from args overrides the config file
    if let Some(endpoint) = std::env::args().nth(1) {
        config.client.endpoint = endpoint;
    }

    let backend = Arc::new(FfmpegCaptureBackend::new(&config.client));

    println!("\n=== Capture Codecs ===");
    for channel in Channel::ALL {
        for profile in candidates(channel) {
            let marker = if backend.is_type_supported(profile.mime_type) {
                "available"
            } else {
                "missing"
            };
            println!("  {:<28} {}", profile.mime_type, marker);
        }
    }
    println!();

    let connector = Arc::new(WsConnector::new(config.client.outbound_capacity));
    let (mut controller, mut events) =
        StreamingController::new(config.client.clone(), backend, connector);

    controller.start()?;
    tracing::info!(
        "Streaming session {} to {} - press Ctrl+C to stop",
        controller.session_id().unwrap_or("-"),
        config.client.endpoint
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(ChannelEvent::Status { channel, state }) => {
                    if state == ConnectionState::Error {
                        tracing::warn!("{} channel: {}", channel, state);
                    } else {
                        tracing::info!("{} channel: {}", channel, state);
                    }
                }
                Some(ChannelEvent::Error { channel, message }) => {
                    tracing::error!("{} channel error: {}", channel, message);
                }
                Some(ChannelEvent::Acknowledged { channel, session_id }) => {
                    tracing::info!("{} stream accepted into session {}", channel, session_id);
                }
                None => break,
            },
        }
    }

    tracing::info!("Shutting down");
    controller.stop().await;
    Ok(())
}
