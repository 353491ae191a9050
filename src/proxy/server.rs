//! Request coordinator.
//!
//! Drives the transport loop: every inbound local line becomes either a
//! request (handled concurrently, with retries, stale-session re-mint and
//! outage fallbacks) or a notification (forwarded fire-and-forget). Shared
//! state is limited to the session, the response cache and the health flag;
//! none of it is held across an HTTP call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mcp::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_TOOLS_LIST, METHOD_TOOLS_LIST_CHANGED,
};
use crate::mcp::transport::{Message, Transport};
use crate::proxy::cache::{with_request_id, ResponseCache};
use crate::proxy::health::{prober_loop, Health};
use crate::upstream::retry::{backoff_delay, classify_status, StatusClass};
use crate::upstream::{sse, UpstreamClient};

/// The proxy's long-lived state and entry point.
pub struct ProxyServer {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    upstream: Arc<UpstreamClient>,
    cache: Arc<ResponseCache>,
    health: Arc<Health>,
    max_retries: u32,
    retry_delay_ms: u64,
    health_interval: Duration,
}

impl ProxyServer {
    /// Create a proxy from the given configuration.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(ProxyInner {
                upstream: Arc::new(UpstreamClient::new(config)?),
                cache: Arc::new(ResponseCache::new()),
                health: Arc::new(Health::new()),
                max_retries: config.max_retries,
                retry_delay_ms: config.retry_delay_ms,
                health_interval: Duration::from_millis(config.health_check_interval_ms),
            }),
        })
    }

    /// Whether the upstream is currently considered reachable.
    pub fn is_healthy(&self) -> bool {
        self.inner.health.is_healthy()
    }

    /// Run the proxy loop over the given transport until the local peer
    /// closes its end.
    ///
    /// Requests are handled in spawned tasks so a slow upstream response
    /// never blocks the line consumer; responses may therefore complete out
    /// of order, each carrying its originating id.
    pub async fn run<T: Transport>(&self, transport: T) -> Result<()> {
        self.run_until(transport, std::future::pending::<()>()).await
    }

    /// Like [`ProxyServer::run`], but also ends when `shutdown` resolves.
    ///
    /// Stdin EOF and an external shutdown signal go through the same
    /// sequence: stop the prober, stop the transport, return.
    pub async fn run_until<T, F>(&self, mut transport: T, shutdown: F) -> Result<()>
    where
        T: Transport,
        F: Future<Output = ()>,
    {
        info!("Starting Vaiz MCP proxy v{}", crate::VERSION);

        let (mut incoming, outgoing) = transport.start().await?;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                msg = incoming.recv() => match msg {
                    Some(Message::Request(req)) => {
                        let inner = Arc::clone(&self.inner);
                        let out = outgoing.clone();
                        tokio::spawn(async move {
                            handle_request(inner, req, out).await;
                        });
                    }
                    Some(Message::Notification(notif)) => {
                        let inner = Arc::clone(&self.inner);
                        tokio::spawn(async move {
                            forward_notification(inner, notif).await;
                        });
                    }
                    Some(other) => {
                        warn!("Unexpected local message: {:?}", other);
                    }
                    None => break,
                },
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.inner.health.deactivate_prober().await;
        transport.stop().await?;
        info!("Vaiz MCP proxy stopped");
        Ok(())
    }
}

/// Handle one local request end to end.
///
/// Attempts the upstream POST up to `max_retries + 1` times. Transient
/// failures clear the session and back off exponentially; 400/404 trigger a
/// synchronous re-mint; other 4xx fail immediately. Exhaustion marks the API
/// down and falls back to the cache.
async fn handle_request(inner: Arc<ProxyInner>, req: JsonRpcRequest, out: mpsc::Sender<Message>) {
    if req.method == METHOD_INITIALIZE {
        inner
            .upstream
            .session()
            .capture_init_params(req.params.clone())
            .await;
    }

    let payload = match serde_json::to_value(&req) {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to serialize request {}: {}", req.method, e);
            return;
        }
    };

    let mut retries = 0u32;
    let mut last_reason = String::from("unknown error");

    loop {
        match inner.upstream.post(&payload).await {
            Err(e) => {
                if e.is_transient() {
                    inner.upstream.session().clear_session_id().await;
                }
                last_reason = e.to_string();
                warn!(
                    "Upstream request {} failed: {} (attempt {}/{})",
                    req.method,
                    e,
                    retries + 1,
                    inner.max_retries + 1
                );
                if retries >= inner.max_retries {
                    break;
                }
                retries += 1;
                sleep(backoff_delay(inner.retry_delay_ms, retries)).await;
            }
            Ok(response) => {
                let status = response.status();
                match classify_status(status.as_u16()) {
                    StatusClass::Success => match handle_success(&inner, &req, response, &out).await
                    {
                        Ok(()) => return,
                        Err(e) => {
                            // A success status with an unreadable body is
                            // treated like a failed attempt.
                            inner.upstream.session().clear_session_id().await;
                            last_reason = e.to_string();
                            warn!(
                                "Upstream response for {} unreadable: {} (attempt {}/{})",
                                req.method,
                                e,
                                retries + 1,
                                inner.max_retries + 1
                            );
                            if retries >= inner.max_retries {
                                break;
                            }
                            retries += 1;
                            sleep(backoff_delay(inner.retry_delay_ms, retries)).await;
                        }
                    },
                    StatusClass::StaleSession => {
                        let err = api_error(response).await;
                        warn!("Upstream session stale ({}); re-minting", err);
                        match Arc::clone(&inner.upstream).remint().await {
                            Ok(body) => {
                                inner.cache.store(METHOD_INITIALIZE, &body).await;
                                last_reason = err.to_string();
                                if retries >= inner.max_retries {
                                    break;
                                }
                                // The fresh handshake is the recovery action;
                                // the retry goes out without an extra sleep.
                                retries += 1;
                            }
                            Err(e) => {
                                warn!("Re-mint failed: {}", e);
                                last_reason = e.to_string();
                                break;
                            }
                        }
                    }
                    StatusClass::Retryable => {
                        let err = api_error(response).await;
                        last_reason = err.to_string();
                        warn!(
                            "Upstream request {} failed: {} (attempt {}/{})",
                            req.method,
                            err,
                            retries + 1,
                            inner.max_retries + 1
                        );
                        if retries >= inner.max_retries {
                            break;
                        }
                        retries += 1;
                        sleep(backoff_delay(inner.retry_delay_ms, retries)).await;
                    }
                    StatusClass::Fatal => {
                        let err = api_error(response).await;
                        warn!("Upstream request {} rejected: {}", req.method, err);
                        emit_terminal_failure(&inner, &req, &err.to_string(), &out).await;
                        return;
                    }
                }
            }
        }
    }

    // Retries exhausted: the API is down.
    mark_api_down(&inner, &out).await;
    emit_terminal_failure(&inner, &req, &last_reason, &out).await;
}

/// Reify a failure status as an [`Error::Api`], draining the body for the
/// error message.
async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or("Unknown");
    let body = response.text().await.unwrap_or_default();
    Error::api(status.as_u16(), status_text, body)
}

/// Deliver a successful upstream response downstream.
async fn handle_success(
    inner: &Arc<ProxyInner>,
    req: &JsonRpcRequest,
    response: reqwest::Response,
    out: &mpsc::Sender<Message>,
) -> Result<()> {
    let is_sse = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false);

    if is_sse {
        let outcome = sse::drain(response, &req.id, out).await?;
        mark_api_up(inner, &req.method, out).await;
        if let Some(matched) = outcome.matched {
            inner.cache.store(&req.method, &matched).await;
        }
    } else {
        let body: Value = response.json().await?;
        mark_api_up(inner, &req.method, out).await;
        inner.cache.store(&req.method, &body).await;

        // The emitted id is always the originating request's id, even if the
        // upstream rewrote it.
        let mut emitted = body;
        if let Some(obj) = emitted.as_object_mut() {
            obj.insert("id".to_string(), req.id.as_value());
        }
        out.send(Message::Raw(emitted))
            .await
            .map_err(|_| Error::Internal("downstream channel closed".to_string()))?;
    }

    Ok(())
}

/// Terminal failure path: cache substitution where allowed, `-32000`
/// otherwise.
async fn emit_terminal_failure(
    inner: &Arc<ProxyInner>,
    req: &JsonRpcRequest,
    reason: &str,
    out: &mpsc::Sender<Message>,
) {
    let msg = if req.method == METHOD_TOOLS_LIST {
        match inner.cache.get(METHOD_TOOLS_LIST).await {
            Some(cached) => {
                warn!("Serving tools/list from cache: {}", reason);
                Message::Raw(with_request_id(cached, &req.id))
            }
            // tools/list never errors; an empty list keeps the peer alive.
            None => Message::Response(JsonRpcResponse::success(
                req.id.clone(),
                json!({"tools": []}),
            )),
        }
    } else if req.method == METHOD_INITIALIZE {
        match inner.cache.get(METHOD_INITIALIZE).await {
            Some(cached) => {
                warn!("Serving initialize from cache: {}", reason);
                Message::Raw(with_request_id(cached, &req.id))
            }
            None => Message::Response(JsonRpcResponse::upstream_error(
                req.id.clone(),
                format!("API unavailable: {}", reason),
            )),
        }
    } else {
        Message::Response(JsonRpcResponse::upstream_error(
            req.id.clone(),
            format!("API unavailable: {}", reason),
        ))
    };

    if out.send(msg).await.is_err() {
        debug!("Local peer gone before failure response for {}", req.method);
    }
}

/// `DOWN -> HEALTHY` transition on any successful upstream response.
///
/// The tools-list-changed push is suppressed when the recovering request is
/// itself `tools/list`, to avoid a refresh storm.
async fn mark_api_up(inner: &Arc<ProxyInner>, method: &str, out: &mpsc::Sender<Message>) {
    if !inner.health.swap_healthy(true) {
        info!("Upstream recovered");
        inner.health.deactivate_prober().await;
        if method != METHOD_TOOLS_LIST {
            let notification = JsonRpcNotification::new(METHOD_TOOLS_LIST_CHANGED);
            let _ = out.send(Message::Notification(notification)).await;
        }
    }
}

/// `HEALTHY -> DOWN` transition when a request exhausts its retries.
async fn mark_api_down(inner: &Arc<ProxyInner>, out: &mpsc::Sender<Message>) {
    inner.upstream.session().clear_session_id().await;
    if inner.health.swap_healthy(false) {
        warn!("Upstream marked down; health prober will re-probe");
    }

    let upstream = Arc::clone(&inner.upstream);
    let cache = Arc::clone(&inner.cache);
    let health = Arc::clone(&inner.health);
    let out = out.clone();
    let interval = inner.health_interval;
    inner
        .health
        .activate_prober(move || {
            tokio::spawn(prober_loop(upstream, cache, health, out, interval))
        })
        .await;
}

/// Notification path: flip the initialized flag when the local handshake
/// completes, then forward fire-and-forget.
async fn forward_notification(inner: Arc<ProxyInner>, notif: JsonRpcNotification) {
    if notif.method == METHOD_INITIALIZED {
        inner.upstream.session().set_initialized(true).await;
    }

    let payload = match serde_json::to_value(&notif) {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to serialize notification {}: {}", notif.method, e);
            return;
        }
    };

    if let Err(e) = inner.upstream.post(&payload).await {
        debug!("Notification forward failed ({}): {}", notif.method, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::RequestId;

    fn test_inner() -> Arc<ProxyInner> {
        let config = Config {
            token: "test-token".to_string(),
            space_id: None,
            api_url: "http://127.0.0.1:9".to_string(),
            debug: false,
            max_retries: 0,
            retry_delay_ms: 1,
            health_check_interval_ms: 1000,
        };
        Arc::new(ProxyInner {
            upstream: Arc::new(UpstreamClient::new(&config).unwrap()),
            cache: Arc::new(ResponseCache::new()),
            health: Arc::new(Health::new()),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            health_interval: Duration::from_millis(config.health_check_interval_ms),
        })
    }

    fn request(method: &str, id: RequestId) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params: None,
        }
    }

    #[tokio::test]
    async fn test_tools_list_failure_without_cache_is_empty_result() {
        let inner = test_inner();
        let (tx, mut rx) = mpsc::channel(8);

        let req = request(METHOD_TOOLS_LIST, RequestId::String("42".to_string()));
        emit_terminal_failure(&inner, &req, "connection refused", &tx).await;

        match rx.recv().await.unwrap() {
            Message::Response(res) => {
                assert_eq!(res.id, RequestId::String("42".to_string()));
                assert!(res.error.is_none());
                assert_eq!(res.result.unwrap(), json!({"tools": []}));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tools_list_failure_serves_cache_with_rewritten_id() {
        let inner = test_inner();
        let cached = json!({"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"search"}]}});
        inner.cache.store(METHOD_TOOLS_LIST, &cached).await;

        let (tx, mut rx) = mpsc::channel(8);
        let req = request(METHOD_TOOLS_LIST, RequestId::String("42".to_string()));
        emit_terminal_failure(&inner, &req, "connection refused", &tx).await;

        match rx.recv().await.unwrap() {
            Message::Raw(value) => {
                assert_eq!(value["id"], "42");
                assert_eq!(value["result"]["tools"][0]["name"], "search");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_methods_fail_with_upstream_error() {
        let inner = test_inner();
        let (tx, mut rx) = mpsc::channel(8);

        let req = request("tools/call", RequestId::Number(7));
        emit_terminal_failure(&inner, &req, "HTTP 503", &tx).await;

        match rx.recv().await.unwrap() {
            Message::Response(res) => {
                assert_eq!(res.id, RequestId::Number(7));
                let error = res.error.unwrap();
                assert_eq!(error.code, -32000);
                assert_eq!(error.message, "API unavailable: HTTP 503");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialize_failure_serves_cache() {
        let inner = test_inner();
        let cached = json!({"jsonrpc":"2.0","id":"_reinit_0","result":{"protocolVersion":"2024-11-05"}});
        inner.cache.store(METHOD_INITIALIZE, &cached).await;

        let (tx, mut rx) = mpsc::channel(8);
        let req = request(METHOD_INITIALIZE, RequestId::Number(1));
        emit_terminal_failure(&inner, &req, "down", &tx).await;

        match rx.recv().await.unwrap() {
            Message::Raw(value) => {
                assert_eq!(value["id"], 1);
                assert_eq!(value["result"]["protocolVersion"], "2024-11-05");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recovery_notification_suppressed_for_tools_list() {
        let inner = test_inner();
        inner.health.swap_healthy(false);

        let (tx, mut rx) = mpsc::channel(8);
        mark_api_up(&inner, METHOD_TOOLS_LIST, &tx).await;
        assert!(inner.health.is_healthy());
        assert!(rx.try_recv().is_err());

        inner.health.swap_healthy(false);
        mark_api_up(&inner, "tools/call", &tx).await;
        match rx.recv().await.unwrap() {
            Message::Notification(notif) => {
                assert_eq!(notif.method, METHOD_TOOLS_LIST_CHANGED);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mark_down_clears_session_and_starts_prober() {
        let inner = test_inner();
        inner
            .upstream
            .session()
            .set_session_id("abc".to_string())
            .await;

        let (tx, _rx) = mpsc::channel(8);
        mark_api_down(&inner, &tx).await;

        assert!(!inner.health.is_healthy());
        assert_eq!(inner.upstream.session().session_id().await, None);
        assert!(inner.health.prober_active().await);

        // A second mark-down does not spawn a second prober.
        mark_api_down(&inner, &tx).await;
        assert!(inner.health.prober_active().await);

        inner.health.deactivate_prober().await;
    }
}
