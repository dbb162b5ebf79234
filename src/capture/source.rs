//! Capture source traits

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::capture::codecs::CodecProfile;
use crate::error::CaptureError;
use crate::protocol::Channel;

/// Output of a running capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// One encoded buffer, in production order
    Data(Bytes),
    /// The source ended on its own (not through `stop()`)
    Stopped(String),
}

/// A live, restartable capture source for one channel
pub trait CaptureSource: Send {
    /// Negotiated codec string carried in every chunk's metadata
    fn mime_type(&self) -> &str;

    /// Begin producing buffers. Each call returns a fresh event stream.
    fn start(&mut self) -> Result<mpsc::Receiver<CaptureEvent>, CaptureError>;

    /// Stop producing. No `Stopped` event is emitted for an explicit stop.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Factory for capture sources
pub trait CaptureBackend: Send + Sync + 'static {
    /// Whether the capture API is usable at all on this host
    fn is_available(&self) -> bool;

    /// Whether a codec string can be produced
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Open a source for `channel`, encoding with `profile` or the backend
    /// default when no candidate was supported
    fn open(
        &self,
        channel: Channel,
        profile: Option<&'static CodecProfile>,
    ) -> Result<Box<dyn CaptureSource>, CaptureError>;
}
