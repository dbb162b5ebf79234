//! ffmpeg-process capture backend
//!
//! Runs one ffmpeg process per channel that reads the configured input
//! device, encodes with the negotiated profile and writes a streamable
//! container to stdout. Stdout is cut into chunks once per timeslice; the
//! first chunk carries the container header, so concatenating all chunks of a
//! run yields a playable file.

use bytes::BytesMut;
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::capture::codecs::{fallback_mime, profile_for, CodecProfile};
use crate::capture::source::{CaptureBackend, CaptureEvent, CaptureSource};
use crate::config::ClientConfig;
use crate::error::CaptureError;
use crate::protocol::Channel;

/// Buffered capture events before the producer starts dropping
const EVENT_QUEUE: usize = 32;

/// Bytes of stderr kept for diagnostics
const STDERR_TAIL: usize = 2048;

/// Capture backend that shells out to ffmpeg
pub struct FfmpegCaptureBackend {
    ffmpeg_path: String,
    audio_input: Vec<String>,
    video_input: Vec<String>,
    timeslice: Duration,
    /// Encoders reported by `ffmpeg -encoders`; `None` if ffmpeg did not run
    encoders: Option<HashSet<String>>,
}

impl FfmpegCaptureBackend {
    /// Create the backend and probe the available encoders once
    pub fn new(config: &ClientConfig) -> Self {
        let encoders = probe_encoders(&config.ffmpeg_path);
        match &encoders {
            Some(list) => tracing::info!(
                "ffmpeg at {} reports {} encoders",
                config.ffmpeg_path,
                list.len()
            ),
            None => tracing::warn!("ffmpeg at {} is not runnable", config.ffmpeg_path),
        }

        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            audio_input: config.audio_input.clone(),
            video_input: config.video_input.clone(),
            timeslice: config.timeslice(),
            encoders,
        }
    }

    fn input_args(&self, channel: Channel) -> &[String] {
        match channel {
            Channel::Audio => &self.audio_input,
            Channel::Video => &self.video_input,
        }
    }
}

impl CaptureBackend for FfmpegCaptureBackend {
    fn is_available(&self) -> bool {
        self.encoders.is_some()
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        match (&self.encoders, profile_for(mime_type)) {
            (Some(encoders), Some(profile)) => encoders.contains(profile.encoder),
            _ => false,
        }
    }

    fn open(
        &self,
        channel: Channel,
        profile: Option<&'static CodecProfile>,
    ) -> Result<Box<dyn CaptureSource>, CaptureError> {
        if !self.is_available() {
            return Err(CaptureError::Unavailable(format!(
                "ffmpeg is not runnable at {}",
                self.ffmpeg_path
            )));
        }
        let input = self.input_args(channel);
        if input.is_empty() {
            return Err(CaptureError::Unavailable(format!(
                "no {} input configured",
                channel
            )));
        }

        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(input.iter().cloned());
        let mime_type = match profile {
            Some(profile) => {
                args.extend(profile.output_args.iter().map(|s| s.to_string()));
                profile.mime_type
            }
            None => {
                args.extend(["-f", "matroska"].iter().map(|s| s.to_string()));
                fallback_mime(channel)
            }
        };
        args.push("pipe:1".to_string());

        Ok(Box::new(FfmpegCapture {
            channel,
            program: self.ffmpeg_path.clone(),
            args,
            mime_type: mime_type.to_string(),
            timeslice: self.timeslice,
            running: Arc::new(AtomicBool::new(false)),
            kill: None,
        }))
    }
}

/// One ffmpeg capture process
struct FfmpegCapture {
    channel: Channel,
    program: String,
    args: Vec<String>,
    mime_type: String,
    timeslice: Duration,
    running: Arc<AtomicBool>,
    kill: Option<oneshot::Sender<()>>,
}

impl CaptureSource for FfmpegCapture {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn start(&mut self) -> Result<mpsc::Receiver<CaptureEvent>, CaptureError> {
        self.stop();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::StartFailed(format!("{}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::StartFailed("ffmpeg stdout not captured".into()))?;
        let stderr = child.stderr.take().map(|stderr| tokio::spawn(read_tail(stderr)));

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let (kill_tx, kill_rx) = oneshot::channel();
        self.kill = Some(kill_tx);
        self.running.store(true, Ordering::SeqCst);

        tracing::info!("Started {} capture ({})", self.channel, self.mime_type);

        tokio::spawn(pump(
            self.channel,
            child,
            stdout,
            stderr,
            tx,
            kill_rx,
            self.timeslice,
            self.running.clone(),
        ));

        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read stdout, cut it into timeslice chunks and report the process end
#[allow(clippy::too_many_arguments)]
async fn pump(
    channel: Channel,
    mut child: Child,
    mut stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    tx: mpsc::Sender<CaptureEvent>,
    mut kill_rx: oneshot::Receiver<()>,
    timeslice: Duration,
    running: Arc<AtomicBool>,
) {
    let mut buffer = BytesMut::with_capacity(64 * 1024);
    let mut ticker = tokio::time::interval(timeslice);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    let ended = loop {
        buffer.reserve(16 * 1024);
        tokio::select! {
            _ = &mut kill_rx => {
                let _ = child.kill().await;
                running.store(false, Ordering::SeqCst);
                return;
            }
            read = stdout.read_buf(&mut buffer) => match read {
                Ok(0) => break "end of stream".to_string(),
                Ok(_) => {}
                Err(e) => break e.to_string(),
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    emit(channel, &tx, &mut buffer);
                }
            }
        }
    };

    if !buffer.is_empty() {
        emit(channel, &tx, &mut buffer);
    }

    let status = child.wait().await;
    let diagnostics = match stderr {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };
    running.store(false, Ordering::SeqCst);

    let reason = match status {
        Ok(status) => format!("ffmpeg {} ({}) {}", status, ended, diagnostics.trim()),
        Err(e) => format!("ffmpeg wait failed: {} ({})", e, ended),
    };
    let _ = tx.send(CaptureEvent::Stopped(reason.trim().to_string())).await;
}

fn emit(channel: Channel, tx: &mpsc::Sender<CaptureEvent>, buffer: &mut BytesMut) {
    let chunk = buffer.split().freeze();
    if tx.try_send(CaptureEvent::Data(chunk)).is_err() {
        tracing::warn!("{} capture consumer lagging, chunk dropped", channel);
    }
}

async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut collected = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                collected.extend_from_slice(&buf[..n]);
                if collected.len() > STDERR_TAIL {
                    let excess = collected.len() - STDERR_TAIL;
                    collected.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

fn probe_encoders(ffmpeg_path: &str) -> Option<HashSet<String>> {
    let output = std::process::Command::new(ffmpeg_path)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(parse_encoder_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `ffmpeg -encoders` output: a legend, a `------` rule, then one
/// `<flags> <name> <description>` line per encoder
fn parse_encoder_list(text: &str) -> HashSet<String> {
    text.lines()
        .skip_while(|line| line.trim() != "------")
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(String::from)
        .collect()
}
