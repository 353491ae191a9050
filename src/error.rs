//! Error types for the Vaiz MCP proxy.

use thiserror::Error;

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message substrings that identify a transient network failure.
///
/// Structured classification on the error type is checked first; this list is
/// the compatibility fallback for errors that only carry a textual cause.
const TRANSIENT_MARKERS: &[&str] = &[
    "fetch",
    "network",
    "econnrefused",
    "econnreset",
    "etimedout",
    "socket",
    "abort",
];

/// Main error type for the proxy.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Upstream Errors =====
    #[error("API error: {status} {status_text} - {message}")]
    Api {
        status: u16,
        status_text: String,
        message: String,
    },

    #[error("session re-mint failed: {0}")]
    Remint(String),

    #[error("invalid response from upstream: {0}")]
    InvalidResponse(String),

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create an API error from HTTP response details.
    pub fn api(status: u16, status_text: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            status_text: status_text.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a transient network failure.
    ///
    /// Transient failures clear the upstream session and are retried with
    /// backoff. Network-layer errors (connection refused/reset, timeouts,
    /// DNS, aborts) qualify; HTTP status errors are classified separately by
    /// [`crate::upstream::retry::classify_status`].
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.is_request()
                    || is_transient_text(&e.to_string())
            }
            Self::Io(_) => true,
            _ => is_transient_text(&self.to_string()),
        }
    }
}

/// Textual fallback for transient-error detection (case-insensitive).
pub fn is_transient_text(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}
