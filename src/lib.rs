//! # AV Chunk Streamer
//!
//! Live audio and video capture streamed as independent chunked WebSocket
//! streams, recorded per session on a server and compiled into one MP4.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          SENDER (client)                             │
//! │                                                                      │
//! │        StreamingController (running / not running)                   │
//! │        ┌──────────────────────────┬──────────────────────────┐       │
//! │        │ StreamChannel (audio)    │ StreamChannel (video)    │       │
//! │        │  idle/connecting/...     │  idle/connecting/...     │       │
//! │        │ ┌──────────────┐         │ ┌──────────────┐         │       │
//! │        │ │CaptureSource │         │ │CaptureSource │         │       │
//! │        │ └──────┬───────┘         │ └──────┬───────┘         │       │
//! │        │        ▼                 │        ▼                 │       │
//! │        │ ┌──────────────┐         │ ┌──────────────┐         │       │
//! │        │ │ ChunkFramer  │         │ │ ChunkFramer  │         │       │
//! │        │ └──────┬───────┘         │ └──────┬───────┘         │       │
//! │        └────────┼─────────────────┴────────┼─────────────────┘       │
//! └─────────────────┼──────────────────────────┼─────────────────────────┘
//!                   │ /ws/audio                │ /ws/video
//!                   │ [meta text][binary]...   │ [meta text][binary]...
//!                   ▼                          ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         RECEIVER (server)                            │
//! │   ┌──────────────────────────────────────────────────────────────┐   │
//! │   │ SessionRegistry                                              │   │
//! │   │   session ─┬─ audio.webm  + audio.chunks.jsonl               │   │
//! │   │            └─ video.webm  + video.chunks.jsonl               │   │
//! │   └──────────────────────────────┬───────────────────────────────┘   │
//! │                                  ▼ (compile request / auto)          │
//! │   ┌──────────────────────────────────────────────────────────────┐   │
//! │   │ CompilationPipeline ── ffmpeg ──▶ <session>.mp4              │   │
//! │   └──────────────────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod capture;
pub mod compile;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;
pub mod streaming;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default WebSocket endpoint for the streaming client
    pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000";

    /// Default HTTP/WebSocket port for the ingest server
    pub const DEFAULT_HTTP_PORT: u16 = 8000;

    /// Delay before a dropped connection is retried
    pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

    /// Capture flush interval
    pub const DEFAULT_TIMESLICE_MS: u64 = 1000;

    /// Outbound frames queued per connection before chunks are dropped
    pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

    /// Sessions older than this are purged
    pub const DEFAULT_RETENTION_HOURS: u64 = 24;

    /// Interval between expiry sweeps
    pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;

    /// Header carrying the connection token when it is not in the query
    pub const TOKEN_HEADER: &str = "x-stream-token";

    /// Longest accepted client-supplied session id
    pub const MAX_SESSION_ID_LEN: usize = 64;
}
