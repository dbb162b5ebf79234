//! Capture subsystem
//!
//! A capture source produces already-encoded media buffers for one channel.
//! Sources are opened through a [`CaptureBackend`], which also answers codec
//! support queries used for encoder negotiation.

pub mod codecs;
pub mod ffmpeg;
pub mod source;

pub use codecs::{select_profile, CodecProfile};
pub use ffmpeg::FfmpegCaptureBackend;
pub use source::{CaptureBackend, CaptureEvent, CaptureSource};
