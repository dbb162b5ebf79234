//! Client-side streaming
//!
//! [`StreamingController`] supervises exactly two [`StreamChannel`]s (audio,
//! video). Each channel runs its own connection state machine; the controller
//! only knows whether it is running.

pub mod channel;
pub mod controller;
pub mod framer;

pub use channel::{ChannelEvent, StreamChannel};
pub use controller::StreamingController;
pub use framer::{ChunkFramer, FrameOutcome};

#[cfg(test)]
pub(crate) mod testing;
