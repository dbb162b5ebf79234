//! Session compilation
//!
//! Merges the audio and video logs of one session into a single MP4 through
//! an external muxer.

pub mod muxer;
pub mod pipeline;

pub use muxer::{FfmpegMuxer, Muxer};
pub use pipeline::{CompilationPipeline, CompiledArtifact};
