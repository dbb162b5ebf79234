//! WebSocket connector built on tokio-tungstenite
//!
//! Each connection runs two tasks: a writer draining the outbound queue into
//! the socket (and sending the close frame on request), and a reader turning
//! server messages and closures into [`TransportEvent`]s.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::constants::DEFAULT_OUTBOUND_CAPACITY;
use crate::error::NetworkError;
use crate::network::transport::{Connector, Link, TransportEvent, WireFrame};
use crate::protocol::ServerMessage;

/// Connector for `ws://` and `wss://` endpoints
#[derive(Debug, Clone)]
pub struct WsConnector {
    outbound_capacity: usize,
}

impl WsConnector {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            // Room for at least one metadata/payload pair
            outbound_capacity: outbound_capacity.max(2),
        }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, NetworkError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(map_handshake_error)?;

        tracing::debug!("WebSocket connected to {}", redact_token(url));

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<WireFrame>(self.outbound_capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (close_tx, mut close_rx) = oneshot::channel::<u16>();

        let writer_events = event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    code = &mut close_rx => {
                        if let Ok(code) = code {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: "client stop".into(),
                            };
                            let _ = sink.send(Message::Close(Some(frame))).await;
                        }
                        break;
                    }
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let message = match frame {
                            WireFrame::Text(text) => Message::Text(text),
                            WireFrame::Binary(bytes) => Message::Binary(bytes.to_vec()),
                        };
                        if let Err(e) = sink.send(message).await {
                            let error = NetworkError::SendFailed(e.to_string());
                            let _ = writer_events.send(TransportEvent::Failed(error.to_string()));
                            break;
                        }
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::ConnectionAck { session_id, .. }) => {
                            let _ = event_tx.send(TransportEvent::Acknowledged { session_id });
                        }
                        Ok(other) => tracing::debug!("Server message: {:?}", other),
                        Err(_) => tracing::debug!("Ignoring unrecognised server text: {}", text),
                    },
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                            None => (None, String::new()),
                        };
                        let _ = event_tx.send(TransportEvent::Closed { code, reason });
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let error = NetworkError::ConnectionFailed(e.to_string());
                        let _ = event_tx.send(TransportEvent::Failed(error.to_string()));
                        return;
                    }
                }
            }
            let _ = event_tx.send(TransportEvent::Closed {
                code: None,
                reason: "connection dropped".into(),
            });
        });

        Ok(Link::new(out_tx, event_rx, close_tx))
    }
}

fn map_handshake_error(error: tungstenite::Error) -> NetworkError {
    match error {
        tungstenite::Error::Http(response)
            if response.status() == 401 || response.status() == 403 =>
        {
            NetworkError::Authentication(format!("server answered {}", response.status()))
        }
        other => NetworkError::ConnectionFailed(other.to_string()),
    }
}

/// Hide the token query value in log output
fn redact_token(url: &str) -> String {
    match url.find("token=") {
        Some(start) => {
            let value_start = start + "token=".len();
            let value_end = url[value_start..]
                .find('&')
                .map(|i| value_start + i)
                .unwrap_or(url.len());
            format!("{}***{}", &url[..value_start], &url[value_end..])
        }
        None => url.to_string(),
    }
}
