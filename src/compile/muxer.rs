//! External muxer seam

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::CompileError;

/// Bytes of muxer diagnostics kept in errors
const MAX_DIAGNOSTICS: usize = 4096;

/// Merges one video input and one audio input into `output`
#[async_trait]
pub trait Muxer: Send + Sync + 'static {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), CompileError>;
}

/// ffmpeg re-encoding both inputs to H.264 / AAC in MP4
pub struct FfmpegMuxer {
    ffmpeg_path: String,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-y"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend([
            "-i".to_string(),
            video.to_string_lossy().into_owned(),
            "-i".to_string(),
            audio.to_string_lossy().into_owned(),
        ]);
        args.extend(
            [
                "-map", "0:v:0", "-map", "1:a:0", "-c:v", "libx264", "-preset", "veryfast",
                "-pix_fmt", "yuv420p", "-c:a", "aac", "-b:a", "128k", "-shortest", "-movflags",
                "+faststart", "-f", "mp4",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), CompileError> {
        tracing::info!(
            "Muxing {} + {} -> {}",
            video.display(),
            audio.display(),
            output.display()
        );

        let result = Command::new(&self.ffmpeg_path)
            .args(Self::args(video, audio, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CompileError::Spawn(format!("{}: {}", self.ffmpeg_path, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stderr = tail(stderr.trim(), MAX_DIAGNOSTICS);
            tracing::error!("ffmpeg failed ({}): {}", result.status, stderr);
            return Err(CompileError::Process {
                code: result.status.code(),
                stderr: stderr.to_string(),
            });
        }
        Ok(())
    }
}

/// Last `max` bytes of `text`, cut on a char boundary
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_output_profile() {
        let args = FfmpegMuxer::args(
            Path::new("/s/video.webm"),
            Path::new("/s/audio.ogg"),
            Path::new("/s/out.mp4.partial"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-i /s/video.webm -i /s/audio.ogg"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-shortest"));
        assert!(joined.contains("-f mp4"));
        assert_eq!(args.last().map(String::as_str), Some("/s/out.mp4.partial"));
    }

    #[test]
    fn test_tail_respects_char_boundary() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let muxer = FfmpegMuxer::new("/nonexistent/ffmpeg-binary");
        let err = muxer
            .mux(Path::new("v"), Path::new("a"), Path::new("o"))
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::Spawn(_)));
    }
}
