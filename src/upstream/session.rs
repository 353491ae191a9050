//! Upstream session state.
//!
//! The session id is minted by the upstream via the `Mcp-Session-Id`
//! response header and echoed back on every subsequent request. It is
//! cleared on transient failures so the next handshake starts clean.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::mcp::protocol::MCP_VERSION;
use crate::VERSION;

#[derive(Debug, Default)]
struct SessionInner {
    session_id: Option<String>,
    last_init_params: Option<Value>,
    initialized: bool,
}

/// Mutable session state shared between the coordinator and the prober.
///
/// Lock scope is limited to field access; the mutex is never held across an
/// HTTP call.
#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<SessionInner>,
    reinit_seq: AtomicU64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session id, if one has been minted.
    pub async fn session_id(&self) -> Option<String> {
        self.inner.lock().await.session_id.clone()
    }

    /// Overwrite the session id from a response header.
    pub async fn set_session_id(&self, id: String) {
        self.inner.lock().await.session_id = Some(id);
    }

    /// Drop the session id, keeping the initialized flag.
    ///
    /// Called when a transient failure makes the current session suspect.
    pub async fn clear_session_id(&self) {
        self.inner.lock().await.session_id = None;
    }

    /// Drop both the session id and the initialized flag ahead of a re-mint.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.session_id = None;
        inner.initialized = false;
    }

    pub async fn set_initialized(&self, initialized: bool) {
        self.inner.lock().await.initialized = initialized;
    }

    pub async fn initialized(&self) -> bool {
        self.inner.lock().await.initialized
    }

    /// Remember the params of the most recent local `initialize` so a
    /// re-mint can replay them.
    pub async fn capture_init_params(&self, params: Option<Value>) {
        self.inner.lock().await.last_init_params = params;
    }

    /// Params for a synthetic `initialize`: the last captured set, or the
    /// default handshake.
    pub async fn init_params(&self) -> Value {
        self.inner
            .lock()
            .await
            .last_init_params
            .clone()
            .unwrap_or_else(default_init_params)
    }

    /// Next synthetic request id, `_reinit_<n>` with a monotonic counter.
    pub fn next_reinit_id(&self) -> String {
        let seq = self.reinit_seq.fetch_add(1, Ordering::Relaxed);
        format!("_reinit_{}", seq)
    }
}

/// Default handshake params used when no local `initialize` was seen.
pub fn default_init_params() -> Value {
    json!({
        "protocolVersion": MCP_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "vaiz-mcp-proxy",
            "version": VERSION,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_id_lifecycle() {
        let session = SessionState::new();
        assert_eq!(session.session_id().await, None);

        session.set_session_id("abc".to_string()).await;
        assert_eq!(session.session_id().await, Some("abc".to_string()));

        session.clear_session_id().await;
        assert_eq!(session.session_id().await, None);
    }

    #[tokio::test]
    async fn test_reset_clears_initialized() {
        let session = SessionState::new();
        session.set_session_id("abc".to_string()).await;
        session.set_initialized(true).await;

        session.reset().await;
        assert_eq!(session.session_id().await, None);
        assert!(!session.initialized().await);
    }

    #[tokio::test]
    async fn test_init_params_fall_back_to_default() {
        let session = SessionState::new();
        let params = session.init_params().await;
        assert_eq!(params["protocolVersion"], MCP_VERSION);
        assert_eq!(params["clientInfo"]["name"], "vaiz-mcp-proxy");

        let captured = serde_json::json!({"protocolVersion": "2024-11-05", "custom": true});
        session.capture_init_params(Some(captured.clone())).await;
        assert_eq!(session.init_params().await, captured);
    }

    #[test]
    fn test_reinit_ids_are_monotonic() {
        let session = SessionState::new();
        let a = session.next_reinit_id();
        let b = session.next_reinit_id();
        assert!(a.starts_with("_reinit_"));
        assert_ne!(a, b);
    }
}
