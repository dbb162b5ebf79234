//! Application configuration
//!
//! Loaded from `config.toml` (platform config directory or an explicit path),
//! then overridden by environment variables. Process-wide settings are handed
//! to the registry and controller as plain structs; nothing reads the
//! environment after startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::Channel;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub server: ServerConfig,
}

/// Streaming client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base WebSocket URL; `/ws/audio` and `/ws/video` are appended
    pub endpoint: String,
    pub access_token: Option<String>,
    /// Fixed session id; a fresh uuid is generated per start when unset
    pub session_id: Option<String>,
    pub reconnect_delay_ms: u64,
    /// How often the capture source flushes a chunk
    pub timeslice_ms: u64,
    /// Outbound frame queue per connection; a full queue drops chunks
    pub outbound_capacity: usize,
    pub ffmpeg_path: String,
    /// ffmpeg input arguments for the audio source
    pub audio_input: Vec<String>,
    /// ffmpeg input arguments for the video source
    pub video_input: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
            session_id: None,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            timeslice_ms: DEFAULT_TIMESLICE_MS,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            ffmpeg_path: "ffmpeg".to_string(),
            audio_input: ["-f", "pulse", "-i", "default"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            video_input: ["-f", "v4l2", "-framerate", "30", "-i", "/dev/video0"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms.max(1))
    }

    /// Build the connection URL for one channel of a session
    pub fn channel_url(&self, channel: Channel, session_id: &str) -> Result<String> {
        let base = self.endpoint.trim();
        if base.is_empty() {
            return Err(Error::Config("streaming endpoint is not set".into()));
        }
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "streaming endpoint must be a ws:// or wss:// URL, got {}",
                base
            )));
        }
        if let Some(token) = &self.access_token {
            if token.is_empty() {
                return Err(Error::Config("access token is configured but empty".into()));
            }
        }

        let mut url = format!(
            "{}/ws/{}?session_id={}",
            base.trim_end_matches('/'),
            channel,
            urlencoding::encode(session_id)
        );
        if let Some(token) = &self.access_token {
            url.push_str("&token=");
            url.push_str(&urlencoding::encode(token));
        }
        Ok(url)
    }
}

/// Ingest server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    /// Shared secret; no check is performed when unset
    pub access_token: Option<String>,
    pub allowed_origins: Vec<String>,
    pub retention_hours: u64,
    pub sweep_interval_secs: u64,
    pub ffmpeg_path: String,
    /// Compile in the background once the last connection of a session closes
    pub auto_compile: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_HTTP_PORT,
            storage_dir: PathBuf::from("recordings"),
            access_token: None,
            allowed_origins: vec!["*".to_string()],
            retention_hours: DEFAULT_RETENTION_HOURS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            ffmpeg_path: "ffmpeg".to_string(),
            auto_compile: true,
        }
    }
}

impl ServerConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Exact-match token check; absence of a configured secret disables it
    pub fn token_matches(&self, provided: Option<&str>) -> bool {
        match &self.access_token {
            None => true,
            Some(expected) => provided == Some(expected.as_str()),
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "av-chunk-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from an explicit file, or the default location when present,
    /// then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(&path)?;
                tracing::info!("Loading configuration from {}", path.display());
                Self::from_toml_str(&text)?
            }
            _ => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply overrides from a key lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("STREAMING_ACCESS_TOKEN").filter(|t| !t.is_empty()) {
            self.server.access_token = Some(token.clone());
            self.client.access_token = Some(token);
        }
        if let Some(origins) = lookup("CORS_ALLOW_ORIGINS") {
            let parsed: Vec<String> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
            if !parsed.is_empty() {
                self.server.allowed_origins = parsed;
            }
        }
        if let Some(dir) = lookup("RECORDINGS_DIR").filter(|d| !d.is_empty()) {
            self.server.storage_dir = PathBuf::from(dir);
        }
        if let Some(hours) = lookup("SESSION_RETENTION_HOURS") {
            match hours.parse() {
                Ok(hours) => self.server.retention_hours = hours,
                Err(_) => tracing::warn!("Ignoring invalid SESSION_RETENTION_HOURS={}", hours),
            }
        }
        if let Some(endpoint) = lookup("STREAMING_ENDPOINT").filter(|e| !e.is_empty()) {
            self.client.endpoint = endpoint;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.client.reconnect_delay(), Duration::from_millis(1000));
        assert_eq!(config.server.retention_hours, 24);
        assert_eq!(config.server.allowed_origins, vec!["*"]);
        assert!(config.server.access_token.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml_str(
            r#"
            [server]
            port = 9000
            access_token = "s3cret"

            [client]
            endpoint = "wss://example.org/stream"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.access_token.as_deref(), Some("s3cret"));
        assert_eq!(config.server.retention_hours, 24);
        assert_eq!(config.client.endpoint, "wss://example.org/stream");
        assert_eq!(config.client.reconnect_delay_ms, 1000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("STREAMING_ACCESS_TOKEN", "tok"),
            ("CORS_ALLOW_ORIGINS", "http://a.test, http://b.test ,"),
            ("SESSION_RETENTION_HOURS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.access_token.as_deref(), Some("tok"));
        assert_eq!(config.client.access_token.as_deref(), Some("tok"));
        assert_eq!(config.server.allowed_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(config.server.retention_hours, 24);
    }

    #[test]
    fn test_channel_url() {
        let mut client = ClientConfig {
            endpoint: "ws://host:8000/".into(),
            access_token: Some("a b".into()),
            ..Default::default()
        };
        let url = client.channel_url(Channel::Video, "sess-1").unwrap();
        assert_eq!(url, "ws://host:8000/ws/video?session_id=sess-1&token=a%20b");

        client.endpoint = "http://host".into();
        assert!(matches!(client.channel_url(Channel::Audio, "x"), Err(Error::Config(_))));

        client.endpoint = String::new();
        assert!(matches!(client.channel_url(Channel::Audio, "x"), Err(Error::Config(_))));
    }

    #[test]
    fn test_token_check() {
        let mut server = ServerConfig::default();
        assert!(server.token_matches(None));
        assert!(server.token_matches(Some("anything")));

        server.access_token = Some("secret".into());
        assert!(server.token_matches(Some("secret")));
        assert!(!server.token_matches(Some("Secret")));
        assert!(!server.token_matches(None));
    }
}
