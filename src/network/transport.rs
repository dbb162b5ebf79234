//! Transport seam between a stream channel and its connection
//!
//! A [`Connector`] opens one connection and hands back a [`Link`]: a bounded
//! outbound frame queue, a stream of transport events, and a one-shot close
//! trigger. The channel never blocks on the queue; see [`Link::try_send_pair`].

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::NetworkError;

/// Outbound WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

/// Something that happened on the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Server acknowledged the connection and named the session
    Acknowledged { session_id: String },
    /// Connection closed; `None` means no close frame (abnormal closure)
    Closed { code: Option<u16>, reason: String },
    /// Network-level failure
    Failed(String),
}

/// Live connection handle owned by a stream channel
pub struct Link {
    outbound: mpsc::Sender<WireFrame>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    close: Option<oneshot::Sender<u16>>,
}

impl Link {
    pub fn new(
        outbound: mpsc::Sender<WireFrame>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        close: oneshot::Sender<u16>,
    ) -> Self {
        Self {
            outbound,
            events,
            close: Some(close),
        }
    }

    /// Queue a metadata/payload pair without waiting.
    ///
    /// Both frames are queued or neither is. The owning channel is the only
    /// producer, so free capacity cannot shrink between the check and the sends.
    pub fn try_send_pair(&self, metadata: String, payload: Bytes) -> bool {
        if self.outbound.is_closed() || self.outbound.capacity() < 2 {
            return false;
        }
        self.outbound.try_send(WireFrame::Text(metadata)).is_ok()
            && self.outbound.try_send(WireFrame::Binary(payload)).is_ok()
    }

    /// Next transport event; `None` once the connection tasks are gone
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Begin an intentional close. Frames still queued are discarded.
    pub fn close(mut self, code: u16) {
        if let Some(close) = self.close.take() {
            let _ = close.send(code);
        }
    }
}

/// Opens connections for stream channels
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Link, NetworkError>;
}
