//! Supervisor over the audio and video channels

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::capture::CaptureBackend;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::network::Connector;
use crate::protocol::{Channel, ConnectionState};
use crate::streaming::channel::{ChannelEvent, StreamChannel};

/// Starts and stops both channels as one unit.
///
/// The controller itself is either running or not; each channel keeps its own
/// connection state and failures on one never stop the other.
pub struct StreamingController {
    config: ClientConfig,
    channels: [StreamChannel; 2],
    running: bool,
    session_id: Option<String>,
}

impl StreamingController {
    /// Create a controller and the receiver for its channel events
    pub fn new(
        config: ClientConfig,
        backend: Arc<dyn CaptureBackend>,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let delay = config.reconnect_delay();
        let channels = Channel::ALL.map(|kind| {
            StreamChannel::new(
                kind,
                delay,
                backend.clone(),
                connector.clone(),
                events_tx.clone(),
            )
        });

        let controller = Self {
            config,
            channels,
            running: false,
            session_id: None,
        };
        (controller, events_rx)
    }

    /// Open both connections and start both capture sources. No-op if
    /// already running.
    ///
    /// Configuration problems are reported before anything is started.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            tracing::debug!("Streaming already running");
            return Ok(());
        }

        let session_id = self
            .config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let urls = [
            self.config.channel_url(Channel::ALL[0], &session_id)?,
            self.config.channel_url(Channel::ALL[1], &session_id)?,
        ];

        tracing::info!("Starting streaming for session {}", session_id);
        for (channel, url) in self.channels.iter_mut().zip(urls) {
            channel.start(url);
        }

        self.session_id = Some(session_id);
        self.running = true;
        Ok(())
    }

    /// Tear down both channels regardless of their state
    pub async fn stop(&mut self) {
        let [first, second] = &mut self.channels;
        tokio::join!(first.stop(), second.stop());

        if self.running {
            tracing::info!("Streaming stopped");
        }
        self.running = false;
    }

    /// Manually reconnect one channel that is disconnected or in error
    pub fn restart_channel(&mut self, channel: Channel) {
        if !self.running {
            return;
        }
        self.channels[channel.index()].restart();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Session id used by the current (or last) run
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn state(&self, channel: Channel) -> ConnectionState {
        self.channels[channel.index()].state()
    }

    pub fn subscribe(&self, channel: Channel) -> watch::Receiver<ConnectionState> {
        self.channels[channel.index()].subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::testing::*;

    fn config() -> ClientConfig {
        ClientConfig {
            endpoint: "ws://localhost:8000".into(),
            access_token: Some("secret".into()),
            session_id: Some("session-1".into()),
            ..ClientConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_connects_both_channels() {
        let backend = Arc::new(MockBackend::default());
        let (connector, mut peers) = MockConnector::new();
        let (mut controller, _events) = StreamingController::new(config(), backend, connector);

        controller.start().unwrap();
        assert!(controller.is_running());

        let mut audio = controller.subscribe(Channel::Audio);
        let mut video = controller.subscribe(Channel::Video);
        wait_state(&mut audio, ConnectionState::Connected).await;
        wait_state(&mut video, ConnectionState::Connected).await;

        let mut urls = vec![peers.recv().await.unwrap().url, peers.recv().await.unwrap().url];
        urls.sort();
        assert_eq!(
            urls,
            vec![
                "ws://localhost:8000/ws/audio?session_id=session-1&token=secret".to_string(),
                "ws://localhost:8000/ws/video?session_id=session-1&token=secret".to_string(),
            ]
        );
        assert_eq!(controller.session_id(), Some("session-1"));

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_noop() {
        let backend = Arc::new(MockBackend::default());
        let (connector, _peers) = MockConnector::new();
        let (mut controller, _events) =
            StreamingController::new(config(), backend.clone(), connector.clone());

        controller.start().unwrap();
        let mut video = controller.subscribe(Channel::Video);
        wait_state(&mut video, ConnectionState::Connected).await;
        controller.start().unwrap();

        let mut audio = controller.subscribe(Channel::Audio);
        wait_state(&mut audio, ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(backend.starts(), 2);

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_failure_is_isolated() {
        let backend = Arc::new(MockBackend::default());
        backend.failing.lock().insert(Channel::Video);
        let (connector, _peers) = MockConnector::new();
        let (mut controller, mut events) =
            StreamingController::new(config(), backend, connector);

        controller.start().unwrap();
        let mut audio = controller.subscribe(Channel::Audio);
        let mut video = controller.subscribe(Channel::Video);
        wait_state(&mut video, ConnectionState::Error).await;
        wait_state(&mut audio, ConnectionState::Connected).await;
        assert!(controller.is_running());

        let error = std::iter::from_fn(|| events.try_recv().ok()).find_map(|e| match e {
            ChannelEvent::Error { channel, message } => Some((channel, message)),
            _ => None,
        });
        let (channel, message) = error.unwrap();
        assert_eq!(channel, Channel::Video);
        assert!(message.contains("device busy"));

        // Stopping resets both, including the one in error
        controller.stop().await;
        assert!(!controller.is_running());
        assert_eq!(controller.state(Channel::Audio), ConnectionState::Idle);
        assert_eq!(controller.state(Channel::Video), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let backend = Arc::new(MockBackend::default());
        let (connector, _peers) = MockConnector::new();
        let (mut controller, _events) =
            StreamingController::new(config(), backend, connector.clone());

        controller.start().unwrap();
        controller.stop().await;
        assert_eq!(controller.state(Channel::Audio), ConnectionState::Idle);

        controller.start().unwrap();
        let mut audio = controller.subscribe(Channel::Audio);
        wait_state(&mut audio, ConnectionState::Connected).await;
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_configuration_error_starts_nothing() {
        let backend = Arc::new(MockBackend::default());
        let (connector, _peers) = MockConnector::new();
        let mut bad = config();
        bad.endpoint = "http://localhost:8000".into();
        let (mut controller, _events) =
            StreamingController::new(bad, backend.clone(), connector.clone());

        assert!(controller.start().is_err());
        assert!(!controller.is_running());
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        assert_eq!(connector.attempts(), 0);
        assert_eq!(backend.starts(), 0);
        assert_eq!(controller.state(Channel::Video), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_session_id_is_shared() {
        let backend = Arc::new(MockBackend::default());
        let (connector, mut peers) = MockConnector::new();
        let mut cfg = config();
        cfg.session_id = None;
        let (mut controller, _events) = StreamingController::new(cfg, backend, connector);

        controller.start().unwrap();
        let session_id = controller.session_id().unwrap().to_string();
        let first = peers.recv().await.unwrap();
        let second = peers.recv().await.unwrap();
        assert!(first.url.contains(&session_id));
        assert!(second.url.contains(&session_id));

        controller.stop().await;
    }
}
