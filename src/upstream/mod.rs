//! Upstream transport layer for the Vaiz MCP API.
//!
//! - `client` - HTTP POST transport with header composition and re-mint
//! - `session` - session id and handshake state
//! - `sse` - streaming Server-Sent-Events reader
//! - `retry` - backoff schedule and status classification

pub mod client;
pub mod retry;
pub mod session;
pub mod sse;

pub use client::UpstreamClient;
pub use session::SessionState;
