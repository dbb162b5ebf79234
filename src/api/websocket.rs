//! Stream ingest endpoint
//!
//! One WebSocket per (session, channel). Frames arrive as pairs: a text frame
//! with the chunk metadata, then the binary payload. Pairs are recorded in
//! arrival order; nothing is acknowledged back to the sender.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::api::handlers::{session_error_status, ApiResponse};
use crate::api::server::AppState;
use crate::constants::TOKEN_HEADER;
use crate::error::SessionError;
use crate::protocol::{close_code, Channel, ChunkMetadata, ServerMessage};
use crate::session::validate_session_id;

/// Query parameters of the stream endpoint
#[derive(Debug, Default, serde::Deserialize)]
pub struct StreamParams {
    pub session_id: Option<String>,
    pub token: Option<String>,
}

/// Upgrade `/ws/{channel}` after checking the token and session id.
///
/// The upgrade extractor goes last so that a bad token is answered with 401
/// even when the request is not a valid handshake.
pub async fn stream_upgrade(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<Channel>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = params.token.clone().or_else(|| {
        headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    });

    if !state.config.token_matches(token.as_deref()) {
        tracing::warn!("Refused {} stream: invalid token", channel);
        return reject(SessionError::Unauthorized);
    }
    if let Some(id) = params.session_id.as_deref() {
        if let Err(e) = validate_session_id(id) {
            return reject(e);
        }
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    upgrade.on_upgrade(move |socket| async move {
        match state
            .registry
            .accept_connection(params.session_id.as_deref(), channel, token.as_deref())
        {
            Ok(session_id) => handle_stream(socket, state, channel, session_id).await,
            Err(e) => refuse(socket, e).await,
        }
    })
}

fn reject(error: SessionError) -> Response {
    let status = session_error_status(&error);
    (
        status,
        axum::Json(ApiResponse::<()>::error(error.to_string())),
    )
        .into_response()
}

async fn refuse(mut socket: WebSocket, error: SessionError) {
    let code = match session_error_status(&error) {
        StatusCode::UNAUTHORIZED | StatusCode::BAD_REQUEST => close_code::POLICY_VIOLATION,
        _ => close_code::INTERNAL_ERROR,
    };
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: error.to_string().into(),
        })))
        .await;
}

/// Per-connection tallies for the closing summary
struct ConnectionStats {
    chunks: u64,
    bytes: u64,
    discarded: u64,
}

/// Receive loop of one accepted stream
async fn handle_stream(socket: WebSocket, state: Arc<AppState>, channel: Channel, session_id: String) {
    let started_at = Utc::now();
    let (mut sender, mut receiver) = socket.split();

    let ack = ServerMessage::ConnectionAck {
        stream_type: channel,
        session_id: session_id.clone(),
        received_at: started_at,
    };
    if let Ok(text) = serde_json::to_string(&ack) {
        if sender.send(Message::Text(text)).await.is_err() {
            tracing::debug!("{} stream for {} closed before ack", channel, session_id);
        }
    }

    let mut stats = ConnectionStats {
        chunks: 0,
        bytes: 0,
        discarded: 0,
    };
    let mut pending: Option<ChunkMetadata> = None;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ChunkMetadata>(&text) {
                Ok(metadata) => {
                    if let Some(orphan) = pending.replace(metadata) {
                        tracing::warn!(
                            "{} chunk {} of {} had no payload, discarded",
                            channel,
                            orphan.sequence,
                            session_id
                        );
                        stats.discarded += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!("Invalid {} metadata from {}: {}", channel, session_id, e);
                }
            },
            Ok(Message::Binary(data)) => {
                let Some(metadata) = pending.take() else {
                    tracing::warn!(
                        "{} payload without metadata from {}, discarded",
                        channel,
                        session_id
                    );
                    stats.discarded += 1;
                    continue;
                };

                match state
                    .registry
                    .record_chunk(&session_id, channel, &metadata, Bytes::from(data))
                    .await
                {
                    Ok(_) => {
                        stats.chunks += 1;
                        stats.bytes += metadata.size;
                    }
                    Err(e @ (SessionError::Framing { .. } | SessionError::ChannelMismatch { .. })) => {
                        tracing::warn!(
                            "Discarding {} chunk {} from {}: {}",
                            channel,
                            metadata.sequence,
                            session_id,
                            e
                        );
                        stats.discarded += 1;
                    }
                    Err(e) => {
                        tracing::error!("Storage failure for {} {}: {}", session_id, channel, e);
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::INTERNAL_ERROR,
                                reason: "storage failure".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("{} stream for {} errored: {}", channel, session_id, e);
                break;
            }
        }
    }

    let summary = ServerMessage::ConnectionSummary {
        stream_type: channel,
        session_id: session_id.clone(),
        chunks_received: stats.chunks,
        bytes_received: stats.bytes,
        started_at,
        ended_at: Utc::now(),
    };
    tracing::info!(
        "{} stream for {} closed: {} chunks, {} bytes, {} discarded",
        channel,
        session_id,
        stats.chunks,
        stats.bytes,
        stats.discarded
    );
    if let Ok(text) = serde_json::to_string(&summary) {
        let _ = sender.send(Message::Text(text)).await;
    }

    let idle = state.registry.release_connection(&session_id, channel);
    if idle && state.config.auto_compile {
        auto_compile(state, session_id);
    }
}

/// Compile in the background once both channels hold chunks
fn auto_compile(state: Arc<AppState>, session_id: String) {
    let ready = state
        .registry
        .session_info(&session_id)
        .map(|info| info.audio_chunks > 0 && info.video_chunks > 0)
        .unwrap_or(false);
    if !ready {
        tracing::debug!("Session {} incomplete, not compiling", session_id);
        return;
    }

    tokio::spawn(async move {
        if let Err(e) = state.pipeline.compile(&session_id).await {
            tracing::error!("Automatic compilation of {} failed: {}", session_id, e);
        }
    });
}
