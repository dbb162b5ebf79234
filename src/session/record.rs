//! Per-session record and on-disk layout

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::capture::codecs::extension_for;
use crate::constants::MAX_SESSION_ID_LEN;
use crate::error::SessionError;
use crate::protocol::{Channel, ChunkCounts, SessionInfo};

/// Session ids become directory names, so only a safe alphabet is accepted
pub fn validate_session_id(session_id: &str) -> Result<(), SessionError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidId(session_id.to_string()))
    }
}

/// Mutable state of one session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub counts: ChunkCounts,
    /// Container of each channel log, fixed by its first chunk
    pub mime_types: [Option<String>; 2],
    pub has_compiled_file: bool,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            counts: ChunkCounts::default(),
            mime_types: [None, None],
            has_compiled_file: false,
        }
    }

    pub fn increment(&mut self, channel: Channel) -> ChunkCounts {
        match channel {
            Channel::Audio => self.counts.audio_chunks += 1,
            Channel::Video => self.counts.video_chunks += 1,
        }
        self.counts
    }

    /// Directory holding everything recorded for this session
    pub fn dir(&self, storage_dir: &Path) -> PathBuf {
        storage_dir.join(&self.session_id)
    }

    /// Chunk log of `channel`, or `None` before its first chunk
    pub fn log_path(&self, storage_dir: &Path, channel: Channel) -> Option<PathBuf> {
        self.mime_types[channel.index()].as_ref().map(|mime| {
            self.dir(storage_dir)
                .join(format!("{}.{}", channel, extension_for(mime)))
        })
    }

    pub fn ledger_path(&self, storage_dir: &Path, channel: Channel) -> PathBuf {
        self.dir(storage_dir).join(format!("{}.chunks.jsonl", channel))
    }

    pub fn artifact_path(&self, storage_dir: &Path) -> PathBuf {
        self.dir(storage_dir).join(format!("{}.mp4", self.session_id))
    }

    pub fn info(&self, is_active: bool) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            is_active,
            has_compiled_file: self.has_compiled_file,
            video_chunks: self.counts.video_chunks,
            audio_chunks: self.counts.audio_chunks,
        }
    }
}
