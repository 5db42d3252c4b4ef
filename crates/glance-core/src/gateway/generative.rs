//! Generative prompt backend.
//!
//! Speaks the OpenAI-compatible streaming chat protocol of a local model
//! server (llama.cpp server, Ollama's `/v1` endpoint). "Model present but
//! not resident" maps to `Downloadable`: the server is reachable but the
//! configured model is not in its model list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Availability, BackendKind, ChunkStream, InferenceBackend, InferenceSession};
use crate::error::SummarizeError;

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Generative backend over a local OpenAI-compatible server.
pub struct PromptBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl PromptBackend {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl InferenceBackend for PromptBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Generative
    }

    async fn availability(&self) -> Availability {
        let request = self
            .client
            .get(format!("{}/models", self.base_url))
            .timeout(AVAILABILITY_TIMEOUT)
            .send();

        let response = match request.await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => return Availability::Unavailable,
            Err(_) => return Availability::Error,
        };
        if !response.status().is_success() {
            return Availability::Error;
        }

        match response.json::<ModelList>().await {
            Ok(list) if list.data.iter().any(|m| m.id == self.model) => Availability::Available,
            Ok(_) => Availability::Downloadable,
            Err(_) => Availability::Error,
        }
    }

    async fn create_session(&self) -> Result<Arc<dyn InferenceSession>, SummarizeError> {
        Ok(Arc::new(PromptSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            destroyed: CancellationToken::new(),
        }))
    }
}

struct PromptSession {
    client: reqwest::Client,
    base_url: String,
    model: String,
    destroyed: CancellationToken,
}

#[async_trait]
impl InferenceSession for PromptSession {
    async fn run_streaming(&self, input: &str) -> Result<ChunkStream, SummarizeError> {
        if self.destroyed.is_cancelled() {
            return Err(SummarizeError::Aborted);
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: input.to_string(),
            }],
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| SummarizeError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SummarizeError::Backend(format!(
                "model server returned HTTP {}",
                response.status()
            )));
        }

        let destroyed = self.destroyed.clone();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            let mut accumulated = String::new();

            loop {
                let chunk = tokio::select! {
                    _ = destroyed.cancelled() => return,
                    chunk = body.next() => chunk,
                };
                let chunk = match chunk {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(SummarizeError::Backend(e.to_string()))).await;
                        return;
                    }
                    None => return,
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        debug!("generative stream complete");
                        return;
                    }
                    let Ok(event) = serde_json::from_str::<StreamChunk>(data) else {
                        continue;
                    };
                    let Some(delta) = event
                        .choices
                        .first()
                        .and_then(|c| c.delta.content.as_deref())
                    else {
                        continue;
                    };
                    if delta.is_empty() {
                        continue;
                    }
                    accumulated.push_str(delta);

                    // Emit the full accumulated text, per the session contract.
                    let send = tokio::select! {
                        _ = destroyed.cancelled() => return,
                        sent = tx.send(Ok(accumulated.clone())) => sent,
                    };
                    if send.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    fn destroy(&self) {
        self.destroyed.cancel();
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.is_cancelled()
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
