//! Vaiz MCP Proxy - Rust Implementation
//!
//! A resilient bidirectional bridge between a local MCP client speaking
//! newline-delimited JSON-RPC 2.0 over stdio and the remote Vaiz MCP API
//! reached over HTTPS (plain JSON responses or SSE streams).
//!
//! # Architecture
//!
//! The proxy is layered bottom-up:
//!
//! 1. **MCP Layer** (`mcp`) - JSON-RPC protocol types and the stdio line framer
//! 2. **Upstream Layer** (`upstream`) - HTTP transport, SSE reader, session
//!    management, retry/backoff classification
//! 3. **Proxy Layer** (`proxy`) - request coordinator, response cache, health
//!    prober
//!
//! # Resilience
//!
//! - **Session re-mint**: stale upstream sessions (400/404) trigger a fresh
//!   `initialize` handshake before the request is retried
//! - **Response cache**: `initialize` and `tools/list` are served from the
//!   last successful response when the upstream is unreachable
//! - **Health prober**: while the API is down, a background task re-probes
//!   and announces recovery via `notifications/tools/list_changed`

pub mod config;
pub mod error;
pub mod mcp;
pub mod proxy;
pub mod upstream;

pub use error::{Error, Result};

/// Proxy version reported in the initialize handshake.
pub const VERSION: &str = "1.0.0";
