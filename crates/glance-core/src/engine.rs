//! Runs exactly one job to completion: validates backend availability,
//! shapes the input, streams inference output, and publishes progress.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::debug;

use crate::broadcast::{BroadcastEvent, Broadcaster};
use crate::error::SummarizeError;
use crate::gateway::{require_available, BackendKind, InferenceSession, ModelGateway};
use crate::jobs::{Job, JobRegistry};
use crate::markdown;
use crate::settings::SettingsStore;

/// Character budget for the extractive backend.
pub const EXTRACTIVE_BUDGET: usize = 4000;
/// Character budget for the generative backend.
pub const GENERATIVE_BUDGET: usize = 3000;
/// Marker inserted between sampled segments of over-budget input.
pub const ELISION: &str = "[...]";
/// Minimum wall-clock gap between streaming broadcasts. The final result is
/// always broadcast regardless.
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(150);

pub fn char_budget(kind: BackendKind) -> usize {
    match kind {
        BackendKind::Extractive => EXTRACTIVE_BUDGET,
        BackendKind::Generative => GENERATIVE_BUDGET,
    }
}

/// Start+middle+end sampling. Naive head-truncation loses conclusions; this
/// keeps the first third, a middle third centered on the midpoint, and the
/// last third of the budget, separated by elision markers.
pub fn sample_text(text: &str, budget: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= budget {
        return text.to_string();
    }
    let part = budget / 3;
    let start: String = chars[..part].iter().collect();
    let mid_start = chars.len() / 2 - part / 2;
    let middle: String = chars[mid_start..mid_start + part].iter().collect();
    let end: String = chars[chars.len() - part..].iter().collect();
    format!("{start}\n\n{ELISION}\n\n{middle}\n\n{ELISION}\n\n{end}")
}

/// Executes jobs against the gateway, publishing progress on the bus.
pub struct SummarizationEngine {
    gateway: Arc<ModelGateway>,
    settings: Arc<SettingsStore>,
    registry: Arc<JobRegistry>,
    broadcaster: Broadcaster,
}

impl SummarizationEngine {
    pub fn new(
        gateway: Arc<ModelGateway>,
        settings: Arc<SettingsStore>,
        registry: Arc<JobRegistry>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            gateway,
            settings,
            registry,
            broadcaster,
        }
    }

    /// Run one job over `text` to completion.
    ///
    /// Settings are snapshotted at the start; a mid-run change does not
    /// affect this job. The session is destroyed on every exit path.
    pub async fn run(&self, job: &Arc<Job>, text: &str) -> Result<String, SummarizeError> {
        let settings = self.settings.get();
        let kind = settings.backend_choice;

        let status = self.gateway.availability(kind).await;
        require_available(kind, status)?;

        let processed = sample_text(text, char_budget(kind));
        let input = match kind {
            BackendKind::Extractive => processed,
            BackendKind::Generative => {
                format!("{}\n\nContent:\n{}", settings.custom_prompt, processed)
            }
        };

        let session = self.gateway.create_session(kind).await?;
        job.attach_session(Arc::clone(&session), kind);

        if job.is_cancelled() {
            job.destroy_session();
            return Err(SummarizeError::Aborted);
        }

        // Tear the session down the moment the token fires, without waiting
        // for the next chunk to arrive.
        let cancel_watch = tokio::spawn({
            let token = job.cancel_token();
            let handle = Arc::clone(&session);
            async move {
                token.cancelled().await;
                handle.destroy();
            }
        });

        let result = self.consume(job, session.as_ref(), &input).await;

        cancel_watch.abort();
        session.destroy();
        result
    }

    async fn consume(
        &self,
        job: &Arc<Job>,
        session: &dyn InferenceSession,
        input: &str,
    ) -> Result<String, SummarizeError> {
        let mut stream = session.run_streaming(input).await?;
        let mut summary = String::new();
        let mut last_broadcast: Option<Instant> = None;

        while let Some(item) = stream.next().await {
            if !self.registry.is_live(&job.id) || job.is_cancelled() || !job.has_session() {
                return Err(SummarizeError::Aborted);
            }
            let chunk = match item {
                Ok(chunk) => chunk,
                // A failed read right after teardown is cancellation, not a
                // backend fault.
                Err(_) if session.is_destroyed() || job.is_cancelled() => {
                    return Err(SummarizeError::Aborted)
                }
                Err(e) => return Err(e),
            };

            // Chunks carry the full accumulated text: replace, never append.
            summary = chunk;

            let now = Instant::now();
            if last_broadcast.map_or(true, |at| now.duration_since(at) >= BROADCAST_INTERVAL) {
                self.broadcast_update(job, &summary);
                last_broadcast = Some(now);
            }
        }

        // The stream ending early because the session was torn down is an
        // abort, not a (partial) result.
        if job.is_cancelled() || session.is_destroyed() || !self.registry.is_live(&job.id) {
            return Err(SummarizeError::Aborted);
        }

        debug!(job_id = %job.id, chars = summary.len(), "Summarization complete");
        self.broadcast_update(job, &summary);
        Ok(summary)
    }

    fn broadcast_update(&self, job: &Arc<Job>, raw: &str) {
        self.broadcaster.send(BroadcastEvent::StreamingUpdate {
            job_id: job.id.to_string(),
            url: job.url.clone(),
            content: markdown::format_summary(raw),
            raw_content: raw.to_string(),
        });
    }
}
