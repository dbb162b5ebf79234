//! Network subsystem for the streaming client's per-channel connections

pub mod transport;
pub mod websocket;

pub use transport::{Connector, Link, TransportEvent, WireFrame};
pub use websocket::WsConnector;
