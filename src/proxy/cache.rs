//! Response cache for outage survival.
//!
//! Memoizes the latest successful `initialize` and `tools/list` responses so
//! the local peer never observes connection loss for either method once one
//! success has been seen. Entries live for the process lifetime and are only
//! overwritten by a fresh success.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::mcp::protocol::{RequestId, METHOD_INITIALIZE, METHOD_TOOLS_LIST};

/// Whether responses for this method are cached.
pub fn is_cacheable(method: &str) -> bool {
    matches!(method, METHOD_INITIALIZE | METHOD_TOOLS_LIST)
}

/// In-memory response memo keyed by method name.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a successful response.
    ///
    /// No-op unless the method is cacheable and the payload carries a
    /// `result`; a failed upstream never evicts a cached entry. Returns
    /// whether the entry was written.
    pub async fn store(&self, method: &str, response: &Value) -> bool {
        if !is_cacheable(method) || response.get("result").is_none() {
            return false;
        }
        self.entries
            .write()
            .await
            .insert(method.to_string(), response.clone());
        true
    }

    /// The latest cached response for a method.
    pub async fn get(&self, method: &str) -> Option<Value> {
        self.entries.read().await.get(method).cloned()
    }
}

/// Rewrite a cached response so it answers the given request.
pub fn with_request_id(mut cached: Value, id: &RequestId) -> Value {
    if let Some(obj) = cached.as_object_mut() {
        obj.insert("id".to_string(), id.as_value());
    }
    cached
}
