//! Server-side session bookkeeping
//!
//! A session is the pair of per-channel chunk logs recorded from one
//! streaming run, plus the compiled artifact once one has been produced.
//!
//! ```text
//! <storage_dir>/<session_id>/
//!     audio.webm             raw payloads, appended in arrival order
//!     audio.chunks.jsonl     one metadata record per accepted chunk
//!     video.webm
//!     video.chunks.jsonl
//!     <session_id>.mp4       compiled artifact
//! ```

pub mod record;
pub mod registry;
pub mod sweeper;

pub use record::{validate_session_id, SessionRecord};
pub use registry::SessionRegistry;
pub use sweeper::spawn_expiry_sweeper;
