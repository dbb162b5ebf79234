//! Error types for the streaming client and the ingest server

use thiserror::Error;

use crate::protocol::Channel;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Compilation error: {0}")]
    Compile(#[from] CompileError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Capture source errors
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The capture API itself is not usable on this host. Fatal for the channel.
    #[error("Capture unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to start capture: {0}")]
    StartFailed(String),

    #[error("Capture stopped unexpectedly: {0}")]
    Stopped(String),
}

/// Transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// The server refused the connection token. Never retried.
    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection closed (code {0:?})")]
    Closed(Option<u16>),
}

impl NetworkError {
    /// Whether the channel state machine should schedule a reconnect
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, NetworkError::Authentication(_))
    }
}

/// Session registry errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session {0} has no compiled file")]
    NoArtifact(String),

    #[error("Session {0} has an open connection")]
    Active(String),

    #[error("Invalid session id: {0:?}")]
    InvalidId(String),

    #[error("Invalid connection token")]
    Unauthorized,

    #[error("Payload size {actual} does not match metadata size {expected}")]
    Framing { expected: u64, actual: u64 },

    #[error("Chunk for {actual} channel received on {expected} connection")]
    ChannelMismatch { expected: Channel, actual: Channel },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Compilation pipeline errors
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("No {0} chunks recorded for this session")]
    InsufficientData(Channel),

    #[error("Muxer exited with {code:?}: {stderr}")]
    Process { code: Option<i32>, stderr: String },

    #[error("Failed to launch muxer: {0}")]
    Spawn(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
