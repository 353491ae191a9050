//! MCP protocol layer.
//!
//! - `protocol` - JSON-RPC 2.0 message types
//! - `transport` - newline-delimited stdio framing

pub mod protocol;
pub mod transport;
