//! In-memory capture backend and connector for state machine tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

use crate::capture::{CaptureBackend, CaptureEvent, CaptureSource, CodecProfile};
use crate::error::{CaptureError, NetworkError};
use crate::network::{Connector, Link, TransportEvent, WireFrame};
use crate::protocol::{Channel, ConnectionState};
use crate::streaming::ChannelEvent;

/// Capture backend whose sources are fed by the test
#[derive(Default)]
pub struct MockBackend {
    pub unavailable: AtomicBool,
    pub failing: Mutex<HashSet<Channel>>,
    starts: Arc<AtomicUsize>,
    feeds: Arc<Mutex<Vec<(Channel, mpsc::Sender<CaptureEvent>)>>>,
}

impl MockBackend {
    /// Push an event into the most recently started source for `channel`
    pub async fn feed(&self, channel: Channel, event: CaptureEvent) {
        let sender = self
            .feeds
            .lock()
            .iter()
            .rev()
            .find(|(c, _)| *c == channel)
            .map(|(_, tx)| tx.clone());
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

struct MockSource {
    channel: Channel,
    mime_type: String,
    starts: Arc<AtomicUsize>,
    feeds: Arc<Mutex<Vec<(Channel, mpsc::Sender<CaptureEvent>)>>>,
    running: bool,
}

impl CaptureSource for MockSource {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn start(&mut self) -> Result<mpsc::Receiver<CaptureEvent>, CaptureError> {
        let (tx, rx) = mpsc::channel(16);
        self.feeds.lock().push((self.channel, tx));
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running = true;
        Ok(rx)
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

impl CaptureBackend for MockBackend {
    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        mime_type == "audio/webm;codecs=opus" || mime_type == "video/webm;codecs=vp8"
    }

    fn open(
        &self,
        channel: Channel,
        profile: Option<&'static CodecProfile>,
    ) -> Result<Box<dyn CaptureSource>, CaptureError> {
        if self.failing.lock().contains(&channel) {
            return Err(CaptureError::StartFailed(format!("{} device busy", channel)));
        }
        Ok(Box::new(MockSource {
            channel,
            mime_type: profile.map(|p| p.mime_type).unwrap_or("application/octet-stream").into(),
            starts: self.starts.clone(),
            feeds: self.feeds.clone(),
            running: false,
        }))
    }
}

/// Server side of one mock connection
pub struct Peer {
    pub url: String,
    pub frames: mpsc::Receiver<WireFrame>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub close: oneshot::Receiver<u16>,
}

/// Connector handing every connection to the test as a [`Peer`]
pub struct MockConnector {
    pub attempts: AtomicUsize,
    pub refuse: AtomicBool,
    pub reject_token: AtomicBool,
    peers: mpsc::UnboundedSender<Peer>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            reject_token: AtomicBool::new(false),
            peers,
        });
        (connector, rx)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Link, NetworkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject_token.load(Ordering::SeqCst) {
            return Err(NetworkError::Authentication("server answered 401".into()));
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(NetworkError::ConnectionFailed("connection refused".into()));
        }

        let (out_tx, out_rx) = mpsc::channel(8);
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let _ = self.peers.send(Peer {
            url: url.to_string(),
            frames: out_rx,
            events: ev_tx,
            close: close_rx,
        });
        Ok(Link::new(out_tx, ev_rx, close_tx))
    }
}

/// Wait (in virtual time) until the channel reaches `target`
pub async fn wait_state(rx: &mut watch::Receiver<ConnectionState>, target: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", target))
        .map(|_| ())
        .expect("state sender dropped");
}

/// Poll `condition` until it holds
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

/// Status transitions seen so far for `channel`
pub fn drain_statuses(
    events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
    channel: Channel,
) -> Vec<ConnectionState> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ChannelEvent::Status { channel: c, state } = event {
            if c == channel {
                seen.push(state);
            }
        }
    }
    seen
}
