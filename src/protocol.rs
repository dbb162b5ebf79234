//! Wire protocol and shared data types
//!
//! Every chunk travels as a pair of WebSocket frames on its channel's own
//! connection:
//!
//! ```text
//! text   {"sequence":7,"capturedAt":"2024-05-01T10:00:07Z","mimeType":"video/webm;codecs=vp8","size":48213,"channel":"video"}
//! binary <48213 bytes>
//! ```
//!
//! The server answers a fresh connection with a [`ServerMessage::ConnectionAck`]
//! and never acknowledges individual chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// WebSocket close codes used by both ends
pub mod close_code {
    /// Intentional close issued by `stop()`; never triggers a reconnect
    pub const NORMAL: u16 = 1000;
    /// Connection token rejected
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Server-side storage failure
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Media channel carried by one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Audio,
    Video,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Audio, Channel::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Audio => "audio",
            Channel::Video => "video",
        }
    }

    /// Stable slot index for per-channel arrays
    pub fn index(&self) -> usize {
        match self {
            Channel::Audio => 0,
            Channel::Video => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(Channel::Audio),
            "video" => Ok(Channel::Video),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// Metadata frame sent ahead of every binary payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Per-connection counter starting at 1; diagnostic only
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub mime_type: String,
    /// Byte length of the following binary frame
    pub size: u64,
    pub channel: Channel,
}

/// Client-side connection state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Text messages sent from the server to a streaming client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAck {
        stream_type: Channel,
        session_id: String,
        received_at: DateTime<Utc>,
    },
    ConnectionSummary {
        stream_type: Channel,
        session_id: String,
        chunks_received: u64,
        bytes_received: u64,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    },
}

/// Session listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub has_compiled_file: bool,
    pub video_chunks: u64,
    pub audio_chunks: u64,
}

/// Per-channel counters returned after a chunk is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkCounts {
    pub audio_chunks: u64,
    pub video_chunks: u64,
}

impl ChunkCounts {
    pub fn get(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Audio => self.audio_chunks,
            Channel::Video => self.video_chunks,
        }
    }
}

/// Synchronous result of a compile request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}
