//! One media channel: capture source plus connection state machine
//!
//! ```text
//!            start()                handshake ok
//!   idle ─────────────▶ connecting ─────────────▶ connected
//!    ▲                   ▲    │                      │
//!    │ stop()            │    │ failure              │ close / failure
//!    │ (from any)        │    ▼                      ▼
//!    │            timer/ │  error ◀──────────── disconnected
//!    │            restart└──────────────────────────┘
//! ```
//!
//! The channel runs as one tokio task. Capture keeps producing regardless of
//! connection state; chunks produced while not connected are dropped by the
//! framer.

use futures_util::future::BoxFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};

use crate::capture::{select_profile, CaptureBackend, CaptureEvent, CaptureSource};
use crate::error::{CaptureError, NetworkError};
use crate::network::{Connector, Link, TransportEvent};
use crate::protocol::{close_code, Channel, ConnectionState};
use crate::streaming::framer::ChunkFramer;

/// Notifications for whoever supervises the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Emitted on every state transition
    Status { channel: Channel, state: ConnectionState },
    /// Human-readable description of a failure
    Error { channel: Channel, message: String },
    /// The server accepted the connection into a session
    Acknowledged { channel: Channel, session_id: String },
}

enum ChannelCommand {
    Reconnect,
    Stop,
}

/// Publishes state transitions and errors
#[derive(Clone)]
struct StateReporter {
    channel: Channel,
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl StateReporter {
    fn set(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!("{} channel {} -> {}", self.channel, previous, next);
            let _ = self.events.send(ChannelEvent::Status {
                channel: self.channel,
                state: next,
            });
        }
    }

    fn error(&self, message: String) {
        tracing::warn!("{} channel error: {}", self.channel, message);
        let _ = self.events.send(ChannelEvent::Error {
            channel: self.channel,
            message,
        });
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

struct WorkerHandle {
    commands: mpsc::UnboundedSender<ChannelCommand>,
    task: JoinHandle<()>,
}

/// Owns one capture source and one connection for a channel kind
pub struct StreamChannel {
    kind: Channel,
    reconnect_delay: Duration,
    backend: Arc<dyn CaptureBackend>,
    connector: Arc<dyn Connector>,
    reporter: StateReporter,
    url: Option<String>,
    worker: Option<WorkerHandle>,
}

impl StreamChannel {
    pub fn new(
        kind: Channel,
        reconnect_delay: Duration,
        backend: Arc<dyn CaptureBackend>,
        connector: Arc<dyn Connector>,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            kind,
            reconnect_delay,
            backend,
            connector,
            reporter: StateReporter {
                channel: kind,
                state: Arc::new(state),
                events,
            },
            url: None,
            worker: None,
        }
    }

    pub fn kind(&self) -> Channel {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.reporter.current()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.reporter.state.subscribe()
    }

    /// Whether the channel task is alive
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.task.is_finished())
            .unwrap_or(false)
    }

    /// Start capturing and connecting to `url`. No-op while running.
    pub fn start(&mut self, url: String) {
        if self.is_running() {
            return;
        }
        self.url = Some(url);
        self.spawn_worker();
    }

    /// Manual restart from `disconnected` or `error`
    pub fn restart(&mut self) {
        match &self.worker {
            Some(worker) if !worker.task.is_finished() => {
                let _ = worker.commands.send(ChannelCommand::Reconnect);
            }
            Some(_) => {
                // The task ended after a fatal failure; bring up a fresh one
                self.spawn_worker();
            }
            None => tracing::debug!("{} channel not started, restart ignored", self.kind),
        }
    }

    /// Tear everything down and return to `idle`. Once this returns no more
    /// frames are written for this channel.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.send(ChannelCommand::Stop);
            if let Err(e) = worker.task.await {
                tracing::error!("{} channel task failed: {}", self.kind, e);
            }
        }
        self.reporter.set(ConnectionState::Idle);
    }

    fn spawn_worker(&mut self) {
        let Some(url) = self.url.clone() else {
            return;
        };

        self.reporter.set(ConnectionState::Connecting);

        let (commands, command_rx) = mpsc::unbounded_channel();
        let worker = ChannelWorker {
            kind: self.kind,
            url,
            reconnect_delay: self.reconnect_delay,
            backend: self.backend.clone(),
            connector: self.connector.clone(),
            reporter: self.reporter.clone(),
            framer: ChunkFramer::new(self.kind, ""),
            capture: None,
            capture_events: None,
            capture_started: Instant::now(),
            link: None,
            connecting: None,
            reconnect_timer: None,
            capture_retry: None,
        };
        let task = tokio::spawn(worker.run(command_rx));
        self.worker = Some(WorkerHandle { commands, task });
    }
}

type PendingConnect = BoxFuture<'static, Result<Link, NetworkError>>;

/// State owned by the channel task
struct ChannelWorker {
    kind: Channel,
    url: String,
    reconnect_delay: Duration,
    backend: Arc<dyn CaptureBackend>,
    connector: Arc<dyn Connector>,
    reporter: StateReporter,
    framer: ChunkFramer,
    capture: Option<Box<dyn CaptureSource>>,
    capture_events: Option<mpsc::Receiver<CaptureEvent>>,
    capture_started: Instant,
    link: Option<Link>,
    connecting: Option<PendingConnect>,
    /// At most one pending reconnect; scheduling replaces it
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    capture_retry: Option<Pin<Box<Sleep>>>,
}

impl ChannelWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ChannelCommand>) {
        if let Err(e) = self.open_capture() {
            self.reporter.set(ConnectionState::Error);
            self.reporter.error(e.to_string());
            return;
        }
        self.begin_connect();

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(ChannelCommand::Reconnect) => self.manual_reconnect(),
                    Some(ChannelCommand::Stop) | None => {
                        self.shutdown();
                        return;
                    }
                },
                result = wait_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result);
                }
                event = wait_link(&mut self.link) => self.on_transport_event(event),
                () = wait_timer(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    tracing::info!("Reconnecting {} channel", self.kind);
                    self.begin_connect();
                }
                () = wait_timer(&mut self.capture_retry) => {
                    self.capture_retry = None;
                    self.restart_capture();
                }
                event = wait_capture(&mut self.capture_events) => self.on_capture_event(event),
            }
        }
    }

    fn open_capture(&mut self) -> Result<(), CaptureError> {
        if !self.backend.is_available() {
            return Err(CaptureError::Unavailable(format!(
                "no capture support for {}",
                self.kind
            )));
        }

        let backend = self.backend.clone();
        let profile = select_profile(self.kind, |mime| backend.is_type_supported(mime));
        if profile.is_none() {
            tracing::warn!("No preferred {} codec supported, using backend default", self.kind);
        }

        let mut source = self.backend.open(self.kind, profile)?;
        let events = source.start()?;
        self.framer.set_mime_type(source.mime_type());
        tracing::info!("{} capture running with {}", self.kind, source.mime_type());

        self.capture = Some(source);
        self.capture_events = Some(events);
        self.capture_started = Instant::now();
        Ok(())
    }

    fn begin_connect(&mut self) {
        if self.link.is_some() || self.connecting.is_some() {
            return;
        }
        self.reconnect_timer = None;
        self.reporter.set(ConnectionState::Connecting);

        let connector = self.connector.clone();
        let url = self.url.clone();
        self.connecting = Some(Box::pin(async move { connector.connect(&url).await }));
    }

    fn manual_reconnect(&mut self) {
        match self.reporter.current() {
            ConnectionState::Disconnected | ConnectionState::Error => {
                if self.capture.is_none() {
                    if let Err(e) = self.open_capture() {
                        self.reporter.error(e.to_string());
                        return;
                    }
                }
                self.begin_connect();
            }
            state => tracing::debug!("{} channel is {}, restart ignored", self.kind, state),
        }
    }

    fn on_connect_result(&mut self, result: Result<Link, NetworkError>) {
        match result {
            Ok(link) => {
                tracing::info!("{} channel connected", self.kind);
                self.link = Some(link);
                self.reporter.set(ConnectionState::Connected);
            }
            Err(e) => {
                self.reporter.set(ConnectionState::Error);
                self.reporter.error(e.to_string());
                if e.is_recoverable() {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Acknowledged { session_id }) => {
                tracing::info!("{} stream joined session {}", self.kind, session_id);
                let _ = self.reporter.events.send(ChannelEvent::Acknowledged {
                    channel: self.kind,
                    session_id,
                });
            }
            Some(TransportEvent::Closed { code, reason }) => {
                self.link = None;
                self.reporter.set(ConnectionState::Disconnected);
                match code {
                    Some(close_code::NORMAL) => {
                        tracing::info!("{} connection closed by server: {}", self.kind, reason);
                    }
                    Some(close_code::POLICY_VIOLATION) => {
                        self.reporter.set(ConnectionState::Error);
                        self.reporter
                            .error(NetworkError::Authentication(reason).to_string());
                    }
                    other => {
                        tracing::debug!("{} close reason: {}", self.kind, reason);
                        self.reporter.error(NetworkError::Closed(other).to_string());
                        self.schedule_reconnect();
                    }
                }
            }
            Some(TransportEvent::Failed(message)) => {
                self.link = None;
                self.reporter.set(ConnectionState::Error);
                self.reporter.error(message);
                self.schedule_reconnect();
            }
            None => {
                self.on_transport_event(Some(TransportEvent::Closed {
                    code: None,
                    reason: "transport gone".into(),
                }));
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_timer.is_some() {
            tracing::debug!("Replacing pending {} reconnect", self.kind);
        }
        self.reconnect_timer = Some(Box::pin(tokio::time::sleep(self.reconnect_delay)));
    }

    fn on_capture_event(&mut self, event: Option<CaptureEvent>) {
        match event {
            Some(CaptureEvent::Data(bytes)) => {
                self.framer.push(bytes, self.link.as_ref());
            }
            Some(CaptureEvent::Stopped(reason)) => {
                self.capture_events = None;
                tracing::warn!("{} capture stopped: {}", self.kind, reason);
                self.after_capture_stop(reason);
            }
            None => {
                self.capture_events = None;
                self.after_capture_stop("capture stream ended".into());
            }
        }
    }

    /// Restart immediately, unless the source died right after starting, in
    /// which case wait one reconnect delay to avoid a respawn loop
    fn after_capture_stop(&mut self, reason: String) {
        if self.capture_started.elapsed() < self.reconnect_delay {
            self.reporter
                .error(CaptureError::Stopped(reason).to_string());
            self.capture_retry = Some(Box::pin(tokio::time::sleep(self.reconnect_delay)));
        } else {
            self.restart_capture();
        }
    }

    fn restart_capture(&mut self) {
        let result = match self.capture.as_mut() {
            Some(source) => source.start(),
            None => return,
        };
        match result {
            Ok(events) => {
                tracing::info!("{} capture restarted", self.kind);
                self.capture_events = Some(events);
                self.capture_started = Instant::now();
            }
            Err(e) => {
                self.reporter.error(e.to_string());
                self.capture_retry = Some(Box::pin(tokio::time::sleep(self.reconnect_delay)));
            }
        }
    }

    fn shutdown(&mut self) {
        self.reconnect_timer = None;
        self.capture_retry = None;
        self.connecting = None;
        if let Some(mut source) = self.capture.take() {
            source.stop();
        }
        self.capture_events = None;
        if let Some(link) = self.link.take() {
            link.close(close_code::NORMAL);
        }
        tracing::info!(
            "{} channel stopped ({} chunks sent, {} dropped)",
            self.kind,
            self.framer.sent(),
            self.framer.dropped()
        );
        self.framer.reset();
        self.reporter.set(ConnectionState::Idle);
    }
}

async fn wait_connect(pending: &mut Option<PendingConnect>) -> Result<Link, NetworkError> {
    match pending {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn wait_link(link: &mut Option<Link>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.next_event().await,
        None => std::future::pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn wait_capture(events: &mut Option<mpsc::Receiver<CaptureEvent>>) -> Option<CaptureEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
