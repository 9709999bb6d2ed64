//! # huddle-server
//!
//! Real-time chat relay: clients join named rooms over a WebSocket, send
//! chat lines to the room, and get join/leave notices and a live roster.
//!
//! The server also renders the chat page, serves the client assets, and
//! attaches security headers to every response.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod security;

pub use config::Config;
pub use handlers::{app, run_server, AppState};
