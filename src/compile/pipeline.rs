//! Compilation of one session into its artifact

use std::path::PathBuf;
use std::sync::Arc;

use crate::compile::muxer::Muxer;
use crate::error::{CompileError, SessionError};
use crate::protocol::{Channel, CompileResponse};
use crate::session::SessionRegistry;

/// Result of a successful compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl From<Result<CompiledArtifact, CompileError>> for CompileResponse {
    fn from(result: Result<CompiledArtifact, CompileError>) -> Self {
        match result {
            Ok(artifact) => CompileResponse {
                success: true,
                output_path: Some(artifact.path.display().to_string()),
                size_bytes: Some(artifact.size_bytes),
                error_detail: None,
            },
            Err(e) => CompileResponse {
                success: false,
                output_path: None,
                size_bytes: None,
                error_detail: Some(e.to_string()),
            },
        }
    }
}

/// Turns a session's two channel logs into one MP4
pub struct CompilationPipeline {
    registry: Arc<SessionRegistry>,
    muxer: Arc<dyn Muxer>,
}

impl CompilationPipeline {
    pub fn new(registry: Arc<SessionRegistry>, muxer: Arc<dyn Muxer>) -> Self {
        Self { registry, muxer }
    }

    /// Compile `session_id`, replacing any previous artifact.
    ///
    /// Runs one at a time per session. The muxer writes to a temporary file
    /// which only replaces the artifact on success, so a failed run leaves
    /// the previous artifact in place.
    pub async fn compile(&self, session_id: &str) -> Result<CompiledArtifact, CompileError> {
        let slot = self.registry.slot(session_id)?;
        let _guard = slot.compile.lock().await;
        if slot.is_removed() {
            return Err(SessionError::NotFound(session_id.to_string()).into());
        }

        let record = slot.snapshot();
        let storage = self.registry.storage_dir();
        for channel in [Channel::Video, Channel::Audio] {
            if record.counts.get(channel) == 0 {
                return Err(CompileError::InsufficientData(channel));
            }
        }
        let (Some(video), Some(audio)) = (
            record.log_path(storage, Channel::Video),
            record.log_path(storage, Channel::Audio),
        ) else {
            return Err(CompileError::InsufficientData(Channel::Video));
        };

        let output = record.artifact_path(storage);
        let partial = output.with_extension("mp4.partial");

        tracing::info!("Compiling session {}", session_id);
        if let Err(e) = self.muxer.mux(&video, &audio, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            tracing::error!("Compilation of {} failed: {}", session_id, e);
            return Err(e);
        }

        tokio::fs::rename(&partial, &output).await?;
        let size_bytes = tokio::fs::metadata(&output).await?.len();
        slot.mark_compiled();

        tracing::info!(
            "Compiled session {} -> {} ({} bytes)",
            session_id,
            output.display(),
            size_bytes
        );
        Ok(CompiledArtifact {
            path: output,
            size_bytes,
        })
    }
}
