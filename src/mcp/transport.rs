//! MCP transport layer: newline-delimited JSON over stdio.
//!
//! One JSON object per line in each direction. Inbound lines are classified
//! structurally: an `id` key makes a request, its absence a notification.

use async_trait::async_trait;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::error::Result;
use crate::mcp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// A message that can be sent or received.
#[derive(Debug, Clone)]
pub enum Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
    /// Verbatim JSON object, forwarded without reshaping (SSE pass-through,
    /// upstream responses, cache substitutions).
    Raw(serde_json::Value),
}

impl Message {
    fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Message::Request(req) => serde_json::to_string(req),
            Message::Response(res) => serde_json::to_string(res),
            Message::Notification(notif) => serde_json::to_string(notif),
            Message::Raw(value) => serde_json::to_string(value),
        }
    }
}

/// Classify one inbound line.
///
/// Blank lines yield `None`. Parse failures are logged with the raw line and
/// yield `None` as well; JSON-RPC offers no id to reply against.
pub fn classify_line(line: &str) -> Option<Message> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to parse message: {} ({})", trimmed, e);
            return None;
        }
    };

    let has_id = value.get("id").is_some();
    let parsed = if has_id {
        serde_json::from_value::<JsonRpcRequest>(value).map(Message::Request)
    } else {
        serde_json::from_value::<JsonRpcNotification>(value).map(Message::Notification)
    };

    match parsed {
        Ok(msg) => Some(msg),
        Err(e) => {
            error!("Malformed JSON-RPC message: {} ({})", trimmed, e);
            None
        }
    }
}

/// Transport trait for proxy communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the transport, returning channels for messages.
    async fn start(&mut self) -> Result<(mpsc::Receiver<Message>, mpsc::Sender<Message>)>;

    /// Stop the transport.
    async fn stop(&mut self) -> Result<()>;
}

/// Stdio transport bound to the process's standard streams.
pub struct StdioTransport {
    running: bool,
}

impl StdioTransport {
    /// Create a new stdio transport.
    pub fn new() -> Self {
        Self { running: false }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&mut self) -> Result<(mpsc::Receiver<Message>, mpsc::Sender<Message>)> {
        self.running = true;

        // Channel for incoming messages (from stdin)
        let (incoming_tx, incoming_rx) = mpsc::channel::<Message>(100);
        // Channel for outgoing messages (to stdout)
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(100);

        // Spawn stdin reader task
        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let mut reader = BufReader::new(stdin);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!("EOF on stdin, stopping transport");
                        break;
                    }
                    Ok(_) => {
                        trace!("Received: {}", line.trim());
                        if let Some(msg) = classify_line(&line) {
                            if incoming_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        // Spawn stdout writer task. A single consumer owns stdout, so writes
        // never interleave; each object is flushed with its trailing newline.
        tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();

            while let Some(msg) = outgoing_rx.recv().await {
                match msg.to_json() {
                    Ok(s) => {
                        trace!("Sending: {}", s);
                        if let Err(e) = stdout.write_all(s.as_bytes()).await {
                            error!("Error writing to stdout: {}", e);
                            break;
                        }
                        if let Err(e) = stdout.write_all(b"\n").await {
                            error!("Error writing newline: {}", e);
                            break;
                        }
                        if let Err(e) = stdout.flush().await {
                            error!("Error flushing stdout: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error serializing message: {}", e);
                    }
                }
            }
        });

        Ok((incoming_rx, outgoing_tx))
    }

    async fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::RequestId;

    #[test]
    fn test_classify_blank_line() {
        assert!(classify_line("").is_none());
        assert!(classify_line("   \t  ").is_none());
    }

    #[test]
    fn test_classify_invalid_json() {
        assert!(classify_line("{not json").is_none());
        assert!(classify_line("hello world").is_none());
    }

    #[test]
    fn test_classify_request() {
        let msg = classify_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        match msg {
            Message::Request(req) => {
                assert_eq!(req.id, RequestId::Number(1));
                assert_eq!(req.method, "tools/list");
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_string_id_request() {
        let msg = classify_line(r#"{"jsonrpc":"2.0","id":"42","method":"ping"}"#).unwrap();
        match msg {
            Message::Request(req) => assert_eq!(req.id, RequestId::String("42".to_string())),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_notification() {
        let msg =
            classify_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        match msg {
            Message::Notification(notif) => {
                assert_eq!(notif.method, "notifications/initialized");
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_message_serializes_verbatim() {
        let value = serde_json::json!({"jsonrpc":"2.0","id":7,"result":{"x":1},"extra":"kept"});
        let msg = Message::Raw(value.clone());
        let json = msg.to_json().unwrap();
        let roundtrip: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip, value);
    }
}
