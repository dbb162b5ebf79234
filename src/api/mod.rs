//! Ingest server: WebSocket stream endpoints and the session HTTP API

pub mod handlers;
pub mod server;
pub mod websocket;

pub use handlers::ApiResponse;
pub use server::{AppState, WebServer};
