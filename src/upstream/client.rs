//! HTTP client for the Vaiz MCP API.
//!
//! One POST per JSON-RPC message. The client composes the auth and session
//! headers, captures any freshly minted session id from response headers,
//! and hands the raw response back; retry policy lives in the coordinator.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mcp::protocol::{JSONRPC_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED};
use crate::upstream::session::SessionState;

/// Session id header exchanged with the upstream.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Workspace selector header.
pub const SPACE_HEADER: &str = "Current-Space-Id";

/// Connect/read ceiling; transient failures surface through it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Upstream HTTP transport plus the session it maintains.
pub struct UpstreamClient {
    http: Client,
    api_url: String,
    token: String,
    space_id: Option<String>,
    session: SessionState,
}

impl UpstreamClient {
    /// Create a new client from the proxy configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("vaiz-mcp-proxy/{}", crate::VERSION))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            token: config.token.clone(),
            space_id: config.space_id.clone(),
            session: SessionState::new(),
        })
    }

    /// Session state owned by this client.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// POST one JSON-RPC message upstream.
    ///
    /// Any `Mcp-Session-Id` on the response, success or failure, overwrites
    /// the held session id before the response is returned.
    pub async fn post(&self, message: &Value) -> Result<Response> {
        let mut req = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .header("Accept", "application/json, text/event-stream");

        if let Some(space_id) = &self.space_id {
            req = req.header(SPACE_HEADER, space_id);
        }
        if let Some(session_id) = self.session.session_id().await {
            req = req.header(SESSION_HEADER, session_id);
        }

        let response = req.json(message).send().await?;

        if let Some(minted) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session.set_session_id(minted.to_string()).await;
        }

        Ok(response)
    }

    /// Re-mint the upstream session with a fresh `initialize` handshake.
    ///
    /// Clears the held session unconditionally, replays the last captured
    /// init params (or the default handshake), and completes with a
    /// fire-and-forget `notifications/initialized`. Returns the initialize
    /// response body so the caller can cache it.
    pub async fn remint(self: Arc<Self>) -> Result<Value> {
        self.session.reset().await;

        let init = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": self.session.next_reinit_id(),
            "method": METHOD_INITIALIZE,
            "params": self.session.init_params().await,
        });

        let response = self.post(&init).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Remint(format!(
                "initialize returned HTTP {}",
                status.as_u16()
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;
        let parsed = parse_json_or_sse(&content_type, &body)?;

        debug!("Session re-minted, session_id={:?}", self.session.session_id().await);

        // Complete the handshake; failures here must not poison the caller.
        let client = Arc::clone(&self);
        tokio::spawn(async move {
            let notification = json!({
                "jsonrpc": JSONRPC_VERSION,
                "method": METHOD_INITIALIZED,
            });
            if let Err(e) = client.post(&notification).await {
                warn!("initialized notification failed after re-mint: {}", e);
            }
        });

        self.session.set_initialized(true).await;
        Ok(parsed)
    }
}

/// Parse an upstream response body that may be plain JSON or a buffered SSE
/// frame (`data:` lines). For SSE the last parsed object wins.
pub fn parse_json_or_sse(content_type: &str, body: &str) -> Result<Value> {
    if content_type.contains("text/event-stream") {
        let mut last: Option<Value> = None;
        for line in body.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                let data = data.trim();
                if data == "[DONE]" {
                    continue;
                }
                if let Ok(value) = serde_json::from_str::<Value>(data) {
                    last = Some(value);
                }
            }
        }
        return last
            .ok_or_else(|| Error::InvalidResponse("no data events in SSE body".to_string()));
    }

    serde_json::from_str(body.trim()).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json_body() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        let value = parse_json_or_sse("application/json", body).unwrap();
        assert_eq!(value["id"], 1);
    }

    #[test]
    fn test_parse_sse_body_takes_last_object() {
        let body = "data: {\"id\":1,\"result\":\"partial\"}\n\ndata: {\"id\":1,\"result\":\"final\"}\n\ndata: [DONE]\n";
        let value = parse_json_or_sse("text/event-stream; charset=utf-8", body).unwrap();
        assert_eq!(value["result"], "final");
    }

    #[test]
    fn test_parse_sse_body_without_data_is_an_error() {
        let body = "event: ping\n\n";
        assert!(parse_json_or_sse("text/event-stream", body).is_err());
    }

    #[test]
    fn test_parse_garbage_json_is_an_error() {
        assert!(parse_json_or_sse("application/json", "oops").is_err());
    }
}
