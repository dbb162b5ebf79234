//! Session registry
//!
//! Tracks every known session, the open connections per channel, and appends
//! incoming chunks to the per-channel logs. Locking per session:
//!
//! * `record` (sync mutex): counters and flags, never held across `.await`
//! * `logs[channel]` (async mutex): serializes appends to one channel log
//! * `compile` (async mutex): single-flight compilation
//!
//! Deletion takes `compile`, then the audio log, then the video log, and
//! commits under the `connections` lock so that it cannot overlap an
//! `accept_connection`.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::protocol::{Channel, ChunkCounts, ChunkMetadata, SessionInfo};
use crate::session::record::{validate_session_id, SessionRecord};

/// One registered session and its locks
pub(crate) struct SessionSlot {
    record: Mutex<SessionRecord>,
    logs: [tokio::sync::Mutex<()>; 2],
    pub(crate) compile: tokio::sync::Mutex<()>,
    removed: AtomicBool,
}

impl SessionSlot {
    fn new(session_id: &str) -> Self {
        Self {
            record: Mutex::new(SessionRecord::new(session_id)),
            logs: [tokio::sync::Mutex::new(()), tokio::sync::Mutex::new(())],
            compile: tokio::sync::Mutex::new(()),
            removed: AtomicBool::new(false),
        }
    }

    pub(crate) fn snapshot(&self) -> SessionRecord {
        self.record.lock().clone()
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_compiled(&self) {
        self.record.lock().has_compiled_file = true;
    }
}

/// Open connections of one session
struct OpenConnections {
    per_channel: [u32; 2],
    since: DateTime<Utc>,
}

/// Registry of recorded sessions
pub struct SessionRegistry {
    config: Arc<ServerConfig>,
    sessions: DashMap<String, Arc<SessionSlot>>,
    /// Keyed by session id; an entry exists while any connection is open
    connections: Mutex<HashMap<String, OpenConnections>>,
}

impl SessionRegistry {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        tracing::info!(
            "Session storage at {} (retention {} h)",
            config.storage_dir.display(),
            config.retention_hours
        );
        Self {
            config,
            sessions: DashMap::new(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn storage_dir(&self) -> &Path {
        &self.config.storage_dir
    }

    /// Admit a new channel connection.
    ///
    /// Without a `session_id` the connection joins the most recently opened
    /// active session that has no connection for this channel yet, otherwise
    /// a fresh id. Returns the session id the connection belongs to. The
    /// session itself is created by its first chunk.
    pub fn accept_connection(
        &self,
        session_id: Option<&str>,
        channel: Channel,
        token: Option<&str>,
    ) -> Result<String, SessionError> {
        if !self.config.token_matches(token) {
            tracing::warn!("Rejected {} connection: bad token", channel);
            return Err(SessionError::Unauthorized);
        }

        let mut connections = self.connections.lock();
        let session_id = match session_id {
            Some(id) => {
                validate_session_id(id)?;
                id.to_string()
            }
            None => connections
                .iter()
                .filter(|(_, open)| open.per_channel[channel.index()] == 0)
                .max_by_key(|(_, open)| open.since)
                .map(|(id, _)| id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        };

        connections
            .entry(session_id.clone())
            .or_insert_with(|| OpenConnections {
                per_channel: [0, 0],
                since: Utc::now(),
            })
            .per_channel[channel.index()] += 1;
        drop(connections);

        tracing::info!("{} connection opened for session {}", channel, session_id);
        Ok(session_id)
    }

    /// Forget one closed connection. Returns true when the session has no
    /// open connection left.
    pub fn release_connection(&self, session_id: &str, channel: Channel) -> bool {
        let mut connections = self.connections.lock();
        let idle = match connections.get_mut(session_id) {
            Some(open) => {
                let count = &mut open.per_channel[channel.index()];
                *count = count.saturating_sub(1);
                open.per_channel.iter().all(|c| *c == 0)
            }
            None => true,
        };
        if idle {
            connections.remove(session_id);
        }
        idle
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.connections.lock().contains_key(session_id)
    }

    /// Append one chunk to the channel log and its ledger.
    ///
    /// A session deleted in the meantime is recreated from zero.
    pub async fn record_chunk(
        &self,
        session_id: &str,
        channel: Channel,
        metadata: &ChunkMetadata,
        payload: Bytes,
    ) -> Result<ChunkCounts, SessionError> {
        if metadata.channel != channel {
            return Err(SessionError::ChannelMismatch {
                expected: channel,
                actual: metadata.channel,
            });
        }
        if payload.len() as u64 != metadata.size {
            return Err(SessionError::Framing {
                expected: metadata.size,
                actual: payload.len() as u64,
            });
        }
        validate_session_id(session_id)?;

        loop {
            let slot = self.slot_or_create(session_id);
            let _log = slot.logs[channel.index()].lock().await;
            if slot.is_removed() {
                continue;
            }

            let (log_path, ledger_path) = {
                let mut record = slot.record.lock();
                record.mime_types[channel.index()]
                    .get_or_insert_with(|| metadata.mime_type.clone());
                let log_path = record
                    .log_path(self.storage_dir(), channel)
                    .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
                (log_path, record.ledger_path(self.storage_dir(), channel))
            };

            if let Some(dir) = log_path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            append(&log_path, &payload).await?;

            let mut line = serde_json::to_vec(metadata)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            line.push(b'\n');
            append(&ledger_path, &line).await?;

            let counts = slot.record.lock().increment(channel);
            tracing::debug!(
                "Recorded {} chunk {} for {} ({} bytes)",
                channel,
                metadata.sequence,
                session_id,
                metadata.size
            );
            return Ok(counts);
        }
    }

    /// All sessions, newest first
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let records: Vec<SessionRecord> = self
            .sessions
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        let mut sessions: Vec<SessionInfo> = records
            .into_iter()
            .map(|record| {
                let active = self.is_active(&record.session_id);
                record.info(active)
            })
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    pub fn session_info(&self, session_id: &str) -> Result<SessionInfo, SessionError> {
        let record = self.slot(session_id)?.snapshot();
        Ok(record.info(self.is_active(session_id)))
    }

    /// Metadata of every chunk accepted on `channel`, in arrival order.
    /// Sequence gaps mark chunks the client dropped.
    pub async fn ledger(
        &self,
        session_id: &str,
        channel: Channel,
    ) -> Result<Vec<ChunkMetadata>, SessionError> {
        let path = self
            .slot(session_id)?
            .snapshot()
            .ledger_path(self.storage_dir(), channel);

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    tracing::warn!("Skipping corrupt ledger line in {}: {}", path.display(), e);
                    None
                }
            })
            .collect())
    }

    /// Location of the compiled artifact
    pub fn artifact(&self, session_id: &str) -> Result<PathBuf, SessionError> {
        let record = self.slot(session_id)?.snapshot();
        if !record.has_compiled_file {
            return Err(SessionError::NoArtifact(session_id.to_string()));
        }
        Ok(record.artifact_path(self.storage_dir()))
    }

    /// Remove a session and everything stored for it.
    ///
    /// Refused while any connection of the session is open.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), SessionError> {
        let slot = self.slot(session_id)?;
        if self.is_active(session_id) {
            return Err(SessionError::Active(session_id.to_string()));
        }

        let _compile = slot.compile.lock().await;
        let _audio = slot.logs[Channel::Audio.index()].lock().await;
        let _video = slot.logs[Channel::Video.index()].lock().await;

        {
            // A connection may have been accepted while waiting on the locks
            let connections = self.connections.lock();
            if connections.contains_key(session_id) {
                return Err(SessionError::Active(session_id.to_string()));
            }
            if slot.removed.swap(true, Ordering::SeqCst) {
                return Err(SessionError::NotFound(session_id.to_string()));
            }
            self.sessions
                .remove_if(session_id, |_, current| Arc::ptr_eq(current, &slot));
        }

        let dir = slot.snapshot().dir(self.storage_dir());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!("Failed to remove {}: {}", dir.display(), e);
                return Err(e.into());
            }
        }

        tracing::info!("Deleted session {}", session_id);
        Ok(())
    }

    /// Delete every session older than the retention window. Sessions with
    /// an open connection are left for a later sweep.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let retention = self.config.retention();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| now - entry.value().snapshot().created_at > retention)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::new();
        for session_id in expired {
            match self.delete_session(&session_id).await {
                Ok(()) => removed.push(session_id),
                Err(SessionError::Active(_)) => {
                    tracing::debug!("Session {} expired but still active, deferring", session_id);
                }
                Err(SessionError::NotFound(_)) => {}
                Err(e) => tracing::error!("Failed to expire session {}: {}", session_id, e),
            }
        }
        removed
    }

    pub(crate) fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>, SessionError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    fn slot_or_create(&self, session_id: &str) -> Arc<SessionSlot> {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!("Created session {}", session_id);
                Arc::new(SessionSlot::new(session_id))
            })
            .value()
            .clone()
    }
}

async fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(token: Option<&str>) -> (SessionRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            storage_dir: dir.path().to_path_buf(),
            access_token: token.map(String::from),
            ..ServerConfig::default()
        };
        (SessionRegistry::new(Arc::new(config)), dir)
    }

    fn meta(channel: Channel, sequence: u64, payload: &[u8]) -> ChunkMetadata {
        ChunkMetadata {
            sequence,
            captured_at: Utc::now(),
            mime_type: match channel {
                Channel::Audio => "audio/webm;codecs=opus".into(),
                Channel::Video => "video/webm;codecs=vp8".into(),
            },
            size: payload.len() as u64,
            channel,
        }
    }

    async fn record(registry: &SessionRegistry, id: &str, channel: Channel, seq: u64, payload: &[u8]) -> ChunkCounts {
        registry
            .record_chunk(id, channel, &meta(channel, seq, payload), Bytes::copy_from_slice(payload))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_size_mismatch_rejected() {
        let (registry, _dir) = registry(None);
        let mut m = meta(Channel::Audio, 1, b"abcd");
        m.size = 10;

        let err = registry
            .record_chunk("s1", Channel::Audio, &m, Bytes::from_static(b"abcd"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Framing { expected: 10, actual: 4 }));
        assert!(registry.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_channel_mismatch_rejected() {
        let (registry, _dir) = registry(None);
        let m = meta(Channel::Video, 1, b"ab");
        let err = registry
            .record_chunk("s1", Channel::Audio, &m, Bytes::from_static(b"ab"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ChannelMismatch { .. }));
    }

    #[tokio::test]
    async fn test_chunks_appended_in_order() {
        let (registry, dir) = registry(None);

        record(&registry, "s1", Channel::Audio, 1, b"aa").await;
        record(&registry, "s1", Channel::Audio, 2, b"bb").await;
        // Client reconnected and restarted its counter
        let counts = record(&registry, "s1", Channel::Audio, 1, b"cc").await;
        assert_eq!(counts.audio_chunks, 3);
        assert_eq!(counts.video_chunks, 0);

        let counts = record(&registry, "s1", Channel::Video, 1, b"vv").await;
        assert_eq!(counts.audio_chunks, 3);
        assert_eq!(counts.video_chunks, 1);

        let log = std::fs::read(dir.path().join("s1").join("audio.webm")).unwrap();
        assert_eq!(log, b"aabbcc");

        let ledger = registry.ledger("s1", Channel::Audio).await.unwrap();
        let sequences: Vec<u64> = ledger.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 1]);
        assert!(registry.ledger("s1", Channel::Video).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn test_concurrent_channels() {
        let (registry, _dir) = registry(None);
        let registry = Arc::new(registry);

        let mut tasks = Vec::new();
        for channel in Channel::ALL {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for seq in 1..=20u64 {
                    let payload = vec![seq as u8; 16];
                    registry
                        .record_chunk("s1", channel, &meta(channel, seq, &payload), Bytes::from(payload))
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let info = registry.session_info("s1").unwrap();
        assert_eq!(info.audio_chunks, 20);
        assert_eq!(info.video_chunks, 20);
    }

    #[tokio::test]
    async fn test_token_check() {
        let (secured, _dir) = registry(Some("s3cret"));
        assert!(matches!(
            secured.accept_connection(Some("s1"), Channel::Audio, Some("nope")),
            Err(SessionError::Unauthorized)
        ));
        assert!(matches!(
            secured.accept_connection(Some("s1"), Channel::Audio, None),
            Err(SessionError::Unauthorized)
        ));
        assert_eq!(
            secured
                .accept_connection(Some("s1"), Channel::Audio, Some("s3cret"))
                .unwrap(),
            "s1"
        );

        let (open, _open_dir) = registry(None);
        assert!(open.accept_connection(None, Channel::Video, Some("anything")).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_session_id_rejected() {
        let (registry, _dir) = registry(None);
        assert!(matches!(
            registry.accept_connection(Some("../../etc"), Channel::Audio, None),
            Err(SessionError::InvalidId(_))
        ));
        assert!(registry.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_connections_without_id_are_paired() {
        let (registry, _dir) = registry(None);

        let first = registry.accept_connection(None, Channel::Audio, None).unwrap();
        let paired = registry.accept_connection(None, Channel::Video, None).unwrap();
        assert_eq!(first, paired);

        // Both channels taken: a new session
        let other = registry.accept_connection(None, Channel::Video, None).unwrap();
        assert_ne!(other, first);

        assert!(registry.is_active(&first));
        assert!(!registry.release_connection(&first, Channel::Audio));
        assert!(registry.release_connection(&first, Channel::Video));
        assert!(!registry.is_active(&first));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let (registry, _dir) = registry(None);
        record(&registry, "older", Channel::Audio, 1, b"a").await;
        record(&registry, "newer", Channel::Audio, 1, b"a").await;

        let base = Utc::now();
        registry.slot("older").unwrap().record.lock().created_at = base - chrono::Duration::minutes(5);
        registry.slot("newer").unwrap().record.lock().created_at = base;

        let ids: Vec<String> = registry
            .list_sessions()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["newer".to_string(), "older".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_then_record_starts_fresh() {
        let (registry, dir) = registry(None);
        for seq in 1..=5 {
            record(&registry, "s1", Channel::Video, seq, b"frame").await;
        }
        let info = registry.session_info("s1").unwrap();
        assert_eq!((info.video_chunks, info.audio_chunks), (5, 0));

        registry.delete_session("s1").await.unwrap();
        assert!(registry.list_sessions().is_empty());
        assert!(!dir.path().join("s1").exists());

        let counts = record(&registry, "s1", Channel::Audio, 1, b"a").await;
        assert_eq!(counts, ChunkCounts { audio_chunks: 1, video_chunks: 0 });
        assert!(registry.ledger("s1", Channel::Video).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_errors() {
        let (registry, _dir) = registry(None);
        assert!(matches!(
            registry.delete_session("missing").await,
            Err(SessionError::NotFound(_))
        ));

        record(&registry, "live", Channel::Audio, 1, b"a").await;
        let id = registry.accept_connection(Some("live"), Channel::Audio, None).unwrap();
        assert!(matches!(
            registry.delete_session(&id).await,
            Err(SessionError::Active(_))
        ));
        registry.release_connection(&id, Channel::Audio);
        assert!(registry.delete_session(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_artifact_lookup() {
        let (registry, _dir) = registry(None);
        assert!(matches!(registry.artifact("nope"), Err(SessionError::NotFound(_))));

        record(&registry, "s1", Channel::Audio, 1, b"a").await;
        assert!(matches!(registry.artifact("s1"), Err(SessionError::NoArtifact(_))));

        registry.slot("s1").unwrap().mark_compiled();
        assert!(registry.artifact("s1").unwrap().ends_with("s1/s1.mp4"));
        assert!(registry.session_info("s1").unwrap().has_compiled_file);
    }

    #[tokio::test]
    async fn test_sweep_defers_active_sessions() {
        let (registry, _dir) = registry(None);
        record(&registry, "idle", Channel::Audio, 1, b"a").await;
        record(&registry, "busy", Channel::Video, 1, b"v").await;
        registry.accept_connection(Some("busy"), Channel::Video, None).unwrap();
        record(&registry, "fresh", Channel::Audio, 1, b"a").await;

        let later = Utc::now() + chrono::Duration::hours(25);
        registry.slot("fresh").unwrap().record.lock().created_at = later;

        let removed = registry.sweep_expired(later).await;
        assert_eq!(removed, vec!["idle".to_string()]);

        let mut left: Vec<String> = registry
            .list_sessions()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        left.sort();
        assert_eq!(left, vec!["busy".to_string(), "fresh".to_string()]);

        registry.release_connection("busy", Channel::Video);
        assert_eq!(registry.sweep_expired(later).await, vec!["busy".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_refused_when_connected_during_lock_wait() {
        let (registry, dir) = registry(None);
        let registry = Arc::new(registry);
        record(&registry, "s1", Channel::Audio, 1, b"a").await;

        let slot = registry.slot("s1").unwrap();
        let compiling = slot.compile.lock().await;

        let deleting = tokio::spawn({
            let registry = registry.clone();
            async move { registry.delete_session("s1").await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!deleting.is_finished());

        registry.accept_connection(Some("s1"), Channel::Video, None).unwrap();
        drop(compiling);

        assert!(matches!(deleting.await.unwrap(), Err(SessionError::Active(_))));
        assert!(registry.is_active("s1"));
        assert_eq!(registry.list_sessions().len(), 1);
        assert!(dir.path().join("s1").exists());
    }

    #[tokio::test]
    async fn test_session_created_by_first_chunk() {
        let (registry, _dir) = registry(None);
        let id = registry.accept_connection(None, Channel::Audio, None).unwrap();
        assert!(registry.is_active(&id));
        assert!(registry.list_sessions().is_empty());
        assert!(matches!(registry.session_info(&id), Err(SessionError::NotFound(_))));

        record(&registry, &id, Channel::Audio, 1, b"a").await;
        let sessions = registry.list_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, id);
        assert!(sessions[0].is_active);

        // Closed without ever sending a chunk: nothing left behind
        let silent = registry.accept_connection(None, Channel::Audio, None).unwrap();
        assert_ne!(silent, id);
        assert!(registry.release_connection(&silent, Channel::Audio));
        assert_eq!(registry.list_sessions().len(), 1);
    }
}
