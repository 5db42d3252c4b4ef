//! Request/response bridge back into the extension.
//!
//! The core sometimes needs the extension's in-tab capabilities (caption
//! interception, thread capture). The bridge sends a correlated
//! `BRIDGE_REQUEST` envelope over the outbound channel and resolves the
//! matching `BRIDGE_RESPONSE` when the reader loop routes it back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use glance_core::adapters::twitter::{ThreadCapture, ThreadPayload};
use glance_core::adapters::youtube::{parse_caption_payload, CaptionSource, CaptionTrack};
use glance_core::error::AdapterError;

/// In-tab work is time-bounded; treat anything slower as a fatal adapter
/// error rather than waiting on a dead tab.
const BRIDGE_TIMEOUT: Duration = Duration::from_secs(18);

pub struct ExtensionBridge {
    outbound: mpsc::Sender<Value>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    next_id: AtomicU64,
}

impl ExtensionBridge {
    pub fn new(outbound: mpsc::Sender<Value>) -> Arc<Self> {
        Arc::new(Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Send a bridge request and await its response.
    pub async fn request(&self, action: &str, payload: Value) -> Result<Value, AdapterError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("bridge lock poisoned")
            .insert(id, tx);

        let mut envelope = json!({
            "type": "BRIDGE_REQUEST",
            "id": id,
            "action": action,
        });
        if let (Some(envelope), Some(payload)) = (envelope.as_object_mut(), payload.as_object()) {
            for (key, value) in payload {
                envelope.insert(key.clone(), value.clone());
            }
        }

        debug!(id, action, "Bridge request");
        if self.outbound.send(envelope).await.is_err() {
            self.pending.lock().expect("bridge lock poisoned").remove(&id);
            return Err(AdapterError::FetchFailed("host is shutting down".to_string()));
        }

        match tokio::time::timeout(BRIDGE_TIMEOUT, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(AdapterError::FetchFailed("bridge closed".to_string())),
            Err(_) => {
                self.pending.lock().expect("bridge lock poisoned").remove(&id);
                Err(AdapterError::FetchFailed("bridge request timed out".to_string()))
            }
        }
    }

    /// Route an inbound `BRIDGE_RESPONSE` to its waiter. Unknown ids are
    /// dropped silently (the waiter may have timed out).
    pub fn resolve(&self, id: u64, value: Value) {
        if let Some(tx) = self.pending.lock().expect("bridge lock poisoned").remove(&id) {
            let _ = tx.send(value);
        }
    }
}

/// Caption retrieval through the extension's in-tab interceptor.
pub struct BridgeCaptionSource(pub Arc<ExtensionBridge>);

#[async_trait]
impl CaptionSource for BridgeCaptionSource {
    async fn fetch_captions(
        &self,
        video_id: &str,
        tab_id: Option<i64>,
    ) -> Result<CaptionTrack, AdapterError> {
        let mut payload = json!({ "videoId": video_id });
        if let Some(tab_id) = tab_id {
            payload["tabId"] = tab_id.into();
        }
        let response = self.0.request("GET_YOUTUBE_CAPTIONS", payload).await?;

        if response.get("success").and_then(Value::as_bool) != Some(true) {
            let code = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN_ERROR");
            return Err(AdapterError::FetchFailed(code.to_string()));
        }
        let data = response
            .get("data")
            .cloned()
            .ok_or_else(|| AdapterError::FetchFailed("empty caption response".to_string()))?;

        match data {
            Value::String(raw) => Ok(CaptionTrack {
                captions: parse_caption_payload(&raw)?,
                text: None,
            }),
            value => serde_json::from_value(value)
                .map_err(|e| AdapterError::ParseFailed(e.to_string())),
        }
    }
}

/// Thread capture through the extension's in-page interceptor.
pub struct BridgeThreadCapture(pub Arc<ExtensionBridge>);

#[async_trait]
impl ThreadCapture for BridgeThreadCapture {
    async fn capture(
        &self,
        url: &str,
        tweet_id: Option<&str>,
    ) -> Result<ThreadPayload, AdapterError> {
        let response = self
            .0
            .request(
                "CAPTURE_TWITTER_THREAD",
                json!({ "url": url, "tweetId": tweet_id }),
            )
            .await?;

        if response.get("status").and_then(Value::as_str) != Some("ok") {
            let code = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("CAPTURE_FAILED");
            return Err(AdapterError::FetchFailed(code.to_string()));
        }
        let payload = response
            .get("payload")
            .cloned()
            .ok_or_else(|| AdapterError::ParseFailed("missing thread payload".to_string()))?;
        serde_json::from_value(payload).map_err(|e| AdapterError::ParseFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_resolves_with_matching_response() {
        let (tx, mut rx) = mpsc::channel(4);
        let bridge = ExtensionBridge::new(tx);

        let waiter = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.request("PING", json!({"k": "v"})).await })
        };

        let sent = rx.recv().await.unwrap();
        assert_eq!(sent["type"], "BRIDGE_REQUEST");
        assert_eq!(sent["action"], "PING");
        assert_eq!(sent["k"], "v");
        let id = sent["id"].as_u64().unwrap();

        bridge.resolve(id, json!({"id": id, "pong": true}));
        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response["pong"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_requests_time_out() {
        let (tx, _rx) = mpsc::channel(4);
        let bridge = ExtensionBridge::new(tx);
        let err = bridge.request("PING", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "fetch_failed");
    }

    #[tokio::test]
    async fn caption_source_parses_string_payloads() {
        let (tx, mut rx) = mpsc::channel(4);
        let bridge = ExtensionBridge::new(tx);
        let source = BridgeCaptionSource(Arc::clone(&bridge));

        let fetch = tokio::spawn(async move { source.fetch_captions("vid", None).await });
        let sent = rx.recv().await.unwrap();
        let id = sent["id"].as_u64().unwrap();
        bridge.resolve(
            id,
            json!({
                "id": id,
                "success": true,
                "data": "[{\"start\":0.0,\"duration\":1.0,\"text\":\"hello\"}]",
            }),
        );

        let track = fetch.await.unwrap().unwrap();
        assert_eq!(track.resolved_text(), "hello");
    }
}
