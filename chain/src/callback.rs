//! Callback/invocation notification (§4.7 L1 tick).
//!
//! The smart-contract runtime a callback might report back to is out of
//! scope; this models the fire-and-forget dispatch the L1 executor performs
//! per transaction that declares an `invoker`, so a caller can register
//! its own webhook without the executor knowing anything about contracts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Fired once per transaction that names an `invoker`, after that
/// transaction has been fixated into a block. Best-effort: a dispatch
/// failure never blocks or fails the L1 tick.
#[async_trait]
pub trait CallbackDispatcher: Send + Sync {
    async fn dispatch(&self, invoker: &str, txn_id: &str, block_id: u64);
}

/// Fire-and-forget HTTP callback dispatcher: posts `{txn_id, block_id}` to
/// whatever URL is registered against `invoker`, ignoring the response.
pub struct HttpCallbackDispatcher {
    client: reqwest::Client,
    registered_urls: Mutex<HashMap<String, String>>,
}

impl Default for HttpCallbackDispatcher {
    fn default() -> Self {
        Self { client: reqwest::Client::new(), registered_urls: Mutex::new(HashMap::new()) }
    }
}

impl HttpCallbackDispatcher {
    pub fn register_url(&self, invoker: &str, url: String) {
        self.registered_urls.lock().expect("lock poisoned").insert(invoker.to_string(), url);
    }
}

#[async_trait]
impl CallbackDispatcher for HttpCallbackDispatcher {
    async fn dispatch(&self, invoker: &str, txn_id: &str, block_id: u64) {
        let url = match self.registered_urls.lock().expect("lock poisoned").get(invoker).cloned() {
            Some(url) => url,
            None => return,
        };

        let body = serde_json::json!({ "txn_id": txn_id, "block_id": block_id });
        if let Err(e) = self.client.post(&url).json(&body).send().await {
            tracing::warn!(invoker, txn_id, error = %e, "callback dispatch failed");
        }
    }
}

/// Test/demo dispatcher that records every call instead of making one.
#[derive(Default)]
pub struct RecordingCallbackDispatcher {
    pub calls: Mutex<Vec<(String, String, u64)>>,
}

#[async_trait]
impl CallbackDispatcher for RecordingCallbackDispatcher {
    async fn dispatch(&self, invoker: &str, txn_id: &str, block_id: u64) {
        self.calls.lock().expect("lock poisoned").push((invoker.to_string(), txn_id.to_string(), block_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_dispatcher_captures_every_call() {
        let dispatcher = RecordingCallbackDispatcher::default();
        dispatcher.dispatch("invoker-a", "txn-1", 42).await;
        let calls = dispatcher.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("invoker-a".to_string(), "txn-1".to_string(), 42));
    }
}
