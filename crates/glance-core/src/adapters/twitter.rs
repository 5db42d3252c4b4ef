//! Twitter/X thread adapter.
//!
//! Thread capture happens in-page (external); this module owns the payload
//! model, the retry-then-fallback capture policy, and the thread-to-text
//! shaping for the engine. Thread content changes quickly with new replies,
//! which is why its cache TTL is the short one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AdapterError;
use crate::retry::{Backoff, RetryPolicy};

/// Primary capture retries with linearly growing delays.
pub const CAPTURE_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    backoff: Backoff::Linear(Duration::from_millis(300)),
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub kind: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// One tweet in a captured thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadNode {
    pub id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub order: usize,
}

/// A captured thread, root first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPayload {
    pub root_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub nodes: Vec<ThreadNode>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Captures a thread from a live page (the in-tab interceptor or a scripted
/// scrape).
#[async_trait]
pub trait ThreadCapture: Send + Sync {
    async fn capture(
        &self,
        url: &str,
        tweet_id: Option<&str>,
    ) -> Result<ThreadPayload, AdapterError>;
}

/// Capture with retries on the primary source, then one shot at the
/// fallback.
pub struct TwitterAdapter {
    primary: Arc<dyn ThreadCapture>,
    fallback: Option<Arc<dyn ThreadCapture>>,
}

impl TwitterAdapter {
    pub fn new(primary: Arc<dyn ThreadCapture>, fallback: Option<Arc<dyn ThreadCapture>>) -> Self {
        Self { primary, fallback }
    }

    pub async fn capture_thread(
        &self,
        url: &str,
        tweet_id: Option<&str>,
    ) -> Result<ThreadPayload, AdapterError> {
        let cancel = CancellationToken::new();
        let primary = CAPTURE_RETRY
            .run(
                &cancel,
                || AdapterError::FetchFailed("thread capture cancelled".to_string()),
                |attempt| {
                    debug!(url, attempt, "Capturing thread");
                    capture_non_empty(self.primary.as_ref(), url, tweet_id)
                },
            )
            .await;

        let error = match primary {
            Ok(mut payload) => {
                if payload.source.is_none() {
                    payload.source = Some("background".to_string());
                }
                return Ok(payload);
            }
            Err(e) => e,
        };

        if let Some(fallback) = &self.fallback {
            warn!(url, error = %error, "Primary thread capture failed, trying fallback");
            return capture_non_empty(fallback.as_ref(), url, tweet_id).await;
        }
        Err(error)
    }
}

async fn capture_non_empty(
    source: &dyn ThreadCapture,
    url: &str,
    tweet_id: Option<&str>,
) -> Result<ThreadPayload, AdapterError> {
    let payload = source.capture(url, tweet_id).await?;
    if payload.nodes.is_empty() {
        return Err(AdapterError::ParseFailed("no tweets found".to_string()));
    }
    Ok(payload)
}

/// Shape a captured thread into engine input, nodes in thread order.
pub fn build_thread_input(payload: &ThreadPayload) -> String {
    let mut nodes: Vec<&ThreadNode> = payload.nodes.iter().filter(|n| !n.text.is_empty()).collect();
    nodes.sort_by_key(|n| n.order);

    let mut sections = vec![
        "Summarize the following Twitter/X thread, keeping the author's argument and the \
         key replies."
            .to_string(),
    ];
    for node in nodes {
        let who = node
            .handle
            .as_deref()
            .or(node.author_name.as_deref())
            .unwrap_or("unknown");
        let mut line = match &node.timestamp {
            Some(timestamp) => format!("{who} ({timestamp}):\n{}", node.text),
            None => format!("{who}:\n{}", node.text),
        };
        if !node.media.is_empty() {
            line.push_str(&format!("\n[{} media attachment(s)]", node.media.len()));
        }
        sections.push(line);
    }
    sections.join("\n\n")
}
