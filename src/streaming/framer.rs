//! Chunk framing
//!
//! Turns one encoded buffer into a metadata text frame followed by the raw
//! binary frame. Nothing is buffered: a chunk that cannot be queued right now
//! is gone.

use bytes::Bytes;
use chrono::Utc;

use crate::network::Link;
use crate::protocol::{Channel, ChunkMetadata};

/// What happened to one capture buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Zero-length buffer, ignored without consuming a sequence number
    Empty,
    /// Both frames queued on the connection
    Sent { sequence: u64 },
    /// Not connected or queue full; the chunk is discarded
    Dropped { sequence: u64 },
}

/// Per-channel framer holding the sequence counter
#[derive(Debug)]
pub struct ChunkFramer {
    channel: Channel,
    mime_type: String,
    sequence: u64,
    sent: u64,
    dropped: u64,
}

impl ChunkFramer {
    pub fn new(channel: Channel, mime_type: impl Into<String>) -> Self {
        Self {
            channel,
            mime_type: mime_type.into(),
            sequence: 0,
            sent: 0,
            dropped: 0,
        }
    }

    /// Build the metadata record for the next chunk
    pub fn next_metadata(&mut self, size: usize) -> ChunkMetadata {
        self.sequence += 1;
        ChunkMetadata {
            sequence: self.sequence,
            captured_at: Utc::now(),
            mime_type: self.mime_type.clone(),
            size: size as u64,
            channel: self.channel,
        }
    }

    /// Frame `payload` onto `link`, or drop it when there is no usable link.
    ///
    /// Sequence numbers are consumed by dropped chunks too, so loss shows up
    /// as gaps on the server side.
    pub fn push(&mut self, payload: Bytes, link: Option<&Link>) -> FrameOutcome {
        if payload.is_empty() {
            return FrameOutcome::Empty;
        }

        let metadata = self.next_metadata(payload.len());
        let sequence = metadata.sequence;

        let queued = match (link, serde_json::to_string(&metadata)) {
            (Some(link), Ok(text)) => link.try_send_pair(text, payload),
            _ => false,
        };

        if queued {
            self.sent += 1;
            tracing::debug!("{} chunk {} queued ({} bytes)", self.channel, sequence, metadata.size);
            FrameOutcome::Sent { sequence }
        } else {
            self.dropped += 1;
            tracing::debug!("{} chunk {} dropped", self.channel, sequence);
            FrameOutcome::Dropped { sequence }
        }
    }

    pub fn set_mime_type(&mut self, mime_type: impl Into<String>) {
        self.mime_type = mime_type.into();
    }

    /// Reset the sequence counter (explicit stop)
    pub fn reset(&mut self) {
        self.sequence = 0;
        self.sent = 0;
        self.dropped = 0;
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
