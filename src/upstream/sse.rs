//! Streaming Server-Sent-Events reader.
//!
//! Consumes an upstream response body chunk by chunk, reassembles `data:`
//! lines across chunk boundaries, and forwards every parsed JSON object
//! downstream as it arrives. The stream is never buffered whole: a
//! server-pushed notification interleaved mid-stream reaches the local peer
//! before the terminal response does.

use futures::StreamExt;
use reqwest::Response;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mcp::protocol::{JsonRpcResponse, RequestId};
use crate::mcp::transport::Message;

/// Error message for a stream that ended without answering the request.
pub const NO_SSE_RESPONSE: &str = "No valid response received from SSE stream";

/// What the stream produced for the originating request.
pub struct SseOutcome {
    /// The forwarded object whose id matched the request, if any.
    pub matched: Option<Value>,
}

/// Incremental `data:` line parser.
///
/// Buffers partial lines across chunks and yields one parsed JSON object per
/// complete `data: ` line. `[DONE]` sentinels, non-`data:` lines, and
/// malformed payloads are skipped silently.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning the objects completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            if let Some(value) = parse_data_line(line.trim_end_matches(['\n', '\r'])) {
                events.push(value);
            }
        }
        events
    }

    /// Flush a trailing line the stream ended without terminating.
    pub fn finish(&mut self) -> Option<Value> {
        let line = std::mem::take(&mut self.buf);
        parse_data_line(line.trim_end_matches('\r'))
    }
}

fn parse_data_line(line: &str) -> Option<Value> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Skipping malformed SSE payload: {} ({})", data, e);
            None
        }
    }
}

/// Drain an SSE response, forwarding every parsed object downstream.
///
/// Records the first forwarded object whose `id` equals the originating
/// request's id. If the stream ends without one, a synthesized `-32000`
/// error response is emitted so the request always terminates.
pub async fn drain(
    response: Response,
    request_id: &RequestId,
    out: &mpsc::Sender<Message>,
) -> Result<SseOutcome> {
    let target = serde_json::to_value(request_id)?;
    let mut stream = response.bytes_stream();
    let mut parser = SseParser::new();
    let mut matched: Option<Value> = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for event in parser.push(&chunk) {
            forward(event, &target, &mut matched, out).await?;
        }
    }
    if let Some(event) = parser.finish() {
        forward(event, &target, &mut matched, out).await?;
    }

    if matched.is_none() {
        let error = JsonRpcResponse::upstream_error(request_id.clone(), NO_SSE_RESPONSE);
        out.send(Message::Response(error))
            .await
            .map_err(|_| Error::Internal("downstream channel closed".to_string()))?;
    }

    Ok(SseOutcome { matched })
}

async fn forward(
    event: Value,
    target: &Value,
    matched: &mut Option<Value>,
    out: &mpsc::Sender<Message>,
) -> Result<()> {
    if matched.is_none() && event.get("id") == Some(target) {
        *matched = Some(event.clone());
    }
    out.send(Message::Raw(event))
        .await
        .map_err(|_| Error::Internal("downstream channel closed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parser_splits_across_chunk_boundaries() {
        let mut parser = SseParser::new();

        let first = parser.push(b"data: {\"id\":1,\"res");
        assert!(first.is_empty());

        let second = parser.push(b"ult\":{}}\ndata: {\"id\":2}\n");
        assert_eq!(second.len(), 2);
        assert_eq!(second[0]["id"], 1);
        assert_eq!(second[1]["id"], 2);
    }

    #[test]
    fn test_parser_skips_done_and_noise() {
        let mut parser = SseParser::new();
        let events = parser.push(
            b"event: message\ndata: [DONE]\ndata: not-json\n: comment\ndata: {\"ok\":true}\n",
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], json!({"ok": true}));
    }

    #[test]
    fn test_parser_handles_crlf_lines() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: {\"id\":\"a\"}\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["id"], "a");
    }

    #[test]
    fn test_parser_finish_flushes_unterminated_line() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: {\"id\":9}").is_empty());
        let last = parser.finish().unwrap();
        assert_eq!(last["id"], 9);
        assert!(parser.finish().is_none());
    }

    #[tokio::test]
    async fn test_forward_matches_request_id() {
        let (tx, mut rx) = mpsc::channel(8);
        let target = json!(7);
        let mut matched = None;

        forward(json!({"id": 3, "x": 1}), &target, &mut matched, &tx)
            .await
            .unwrap();
        assert!(matched.is_none());

        forward(json!({"id": 7, "result": {}}), &target, &mut matched, &tx)
            .await
            .unwrap();
        assert_eq!(matched.unwrap()["result"], json!({}));

        // Both objects were forwarded, in order, regardless of matching.
        match rx.recv().await.unwrap() {
            Message::Raw(v) => assert_eq!(v["id"], 3),
            other => panic!("unexpected message {:?}", other),
        }
        match rx.recv().await.unwrap() {
            Message::Raw(v) => assert_eq!(v["id"], 7),
            other => panic!("unexpected message {:?}", other),
        }
    }
}
