//! The orchestration service: owns the settings store, caches, job
//! registry, gateway and engine, and implements the message contract the
//! extension surfaces speak.
//!
//! Constructed explicitly once per process; tests build fresh instances.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::twitter::{ThreadPayload, TwitterAdapter};
use crate::adapters::youtube::{
    build_summarization_input, retrieve_captions, CaptionSource, InputMetadata, YoutubeAdapter,
};
use crate::adapters::SourceContent;
use crate::broadcast::{BroadcastEvent, Broadcaster, ProcessingStatus};
use crate::cache::{ResultCache, SummaryKey};
use crate::engine::SummarizationEngine;
use crate::gateway::{Availability, BackendKind, ModelGateway};
use crate::jobs::{Decision, Feature, Job, JobRegistry, SlotRequest};
use crate::settings::{Settings, SettingsPatch, SettingsStore};

/// Availability probes answer within this bound; a stalled check reads as
/// unavailable rather than hanging the caller.
const API_STATUS_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Message contract
// ============================================================================

/// Requests from adapters and UI surfaces.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "SUMMARIZE_CONTENT", rename_all = "camelCase")]
    SummarizeContent {
        url: String,
        title: String,
        text: String,
        #[serde(default)]
        tab_id: Option<i64>,
    },
    #[serde(rename = "SUMMARIZE_REDDIT_POST", rename_all = "camelCase")]
    SummarizeRedditPost {
        url: String,
        #[serde(default)]
        tab_id: Option<i64>,
    },
    #[serde(rename = "GET_YOUTUBE_SUMMARY", rename_all = "camelCase")]
    GetYoutubeSummary {
        video_id: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        tab_id: Option<i64>,
    },
    #[serde(rename = "ABORT_YOUTUBE_SUMMARY", rename_all = "camelCase")]
    AbortYoutubeSummary {
        #[serde(default)]
        video_id: Option<String>,
    },
    #[serde(rename = "SCRAPE_TWITTER_THREAD", rename_all = "camelCase")]
    ScrapeTwitterThread {
        url: String,
        #[serde(default)]
        tweet_id: Option<String>,
        #[serde(default)]
        request_url: Option<String>,
    },
    #[serde(rename = "GET_API_STATUS")]
    GetApiStatus,
    #[serde(rename = "GET_SETTINGS")]
    GetSettings,
    #[serde(rename = "UPDATE_SETTINGS", rename_all = "camelCase")]
    UpdateSettings {
        #[serde(flatten)]
        patch: SettingsPatch,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizeStatus {
    Complete,
    Duplicate,
    Aborted,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeResponse {
    pub status: SummarizeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SummarizeResponse {
    fn complete(title: String, summary: String, cached: bool) -> Self {
        Self {
            status: SummarizeStatus::Complete,
            title: Some(title),
            summary: Some(summary),
            cached: Some(cached),
            error: None,
            message: None,
        }
    }

    fn duplicate() -> Self {
        Self {
            status: SummarizeStatus::Duplicate,
            title: None,
            summary: None,
            cached: None,
            error: None,
            message: None,
        }
    }

    fn aborted() -> Self {
        Self {
            status: SummarizeStatus::Aborted,
            title: None,
            summary: None,
            cached: None,
            error: None,
            message: None,
        }
    }

    fn failed(code: &str, message: String) -> Self {
        Self {
            status: SummarizeStatus::Error,
            title: None,
            summary: None,
            cached: None,
            error: Some(code.to_string()),
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum YoutubeStatus {
    Complete,
    Streaming,
    Aborted,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeSummaryResponse {
    pub status: YoutubeStatus,
    pub video_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<InputMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl YoutubeSummaryResponse {
    fn streaming(video_id: String) -> Self {
        Self {
            status: YoutubeStatus::Streaming,
            video_id,
            summary: None,
            cached: None,
            caption_count: None,
            compression: None,
            error: None,
            message: None,
        }
    }

    fn cached(video_id: String, summary: String) -> Self {
        Self {
            status: YoutubeStatus::Complete,
            video_id,
            summary: Some(summary),
            cached: Some(true),
            caption_count: None,
            compression: None,
            error: None,
            message: None,
        }
    }

    fn aborted(video_id: String, message: &str) -> Self {
        Self {
            status: YoutubeStatus::Aborted,
            video_id,
            summary: None,
            cached: None,
            caption_count: None,
            compression: None,
            error: None,
            message: Some(message.to_string()),
        }
    }

    fn failed(video_id: String, code: &str, message: String) -> Self {
        Self {
            status: YoutubeStatus::Error,
            video_id,
            summary: None,
            cached: None,
            caption_count: None,
            compression: None,
            error: Some(code.to_string()),
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AbortStatus {
    Aborted,
    Idle,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortResponse {
    pub status: AbortStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwitterScrapeResponse {
    pub status: ScrapeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ThreadPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ApiStatusResponse {
    pub extractive: Availability,
    pub generative: Availability,
}

/// All responses the orchestrator can produce, serialized flat.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Summarize(SummarizeResponse),
    Youtube(YoutubeSummaryResponse),
    Abort(AbortResponse),
    Twitter(TwitterScrapeResponse),
    ApiStatus(ApiStatusResponse),
    Settings(Settings),
}

// ============================================================================
// Service
// ============================================================================

/// Everything the orchestrator needs wired in at construction.
pub struct Orchestrator {
    settings: Arc<SettingsStore>,
    cache: Arc<ResultCache>,
    registry: Arc<JobRegistry>,
    gateway: Arc<ModelGateway>,
    engine: SummarizationEngine,
    broadcaster: Broadcaster,
    reddit: crate::adapters::reddit::RedditAdapter,
    youtube: YoutubeAdapter,
    captions: Arc<dyn CaptionSource>,
    twitter: TwitterAdapter,
    sweeper: JoinHandle<()>,
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

impl Orchestrator {
    pub fn new(
        settings: Arc<SettingsStore>,
        gateway: Arc<ModelGateway>,
        captions: Arc<dyn CaptionSource>,
        twitter: TwitterAdapter,
    ) -> Self {
        let cache = Arc::new(ResultCache::new());
        let registry = Arc::new(JobRegistry::new());
        let broadcaster = Broadcaster::default();
        let engine = SummarizationEngine::new(
            Arc::clone(&gateway),
            Arc::clone(&settings),
            Arc::clone(&registry),
            broadcaster.clone(),
        );
        let sweeper = cache.spawn_sweeper();

        Self {
            settings,
            cache,
            registry,
            gateway,
            engine,
            broadcaster,
            reddit: crate::adapters::reddit::RedditAdapter::new(),
            youtube: YoutubeAdapter::new(),
            captions,
            twitter,
            sweeper,
        }
    }

    /// Subscribe to the streaming/status event bus.
    pub fn subscribe_events(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.broadcaster.subscribe()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Handle one request envelope.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::SummarizeContent {
                url,
                title,
                text,
                tab_id,
            } => Response::Summarize(
                self.summarize(Feature::Page, url, title, text, tab_id).await,
            ),
            Request::SummarizeRedditPost { url, tab_id } => {
                Response::Summarize(self.summarize_reddit(url, tab_id).await)
            }
            Request::GetYoutubeSummary {
                video_id,
                url,
                tab_id,
            } => Response::Youtube(self.youtube_summary(video_id, url, tab_id).await),
            Request::AbortYoutubeSummary { video_id } => {
                Response::Abort(self.abort_youtube(video_id.as_deref()))
            }
            Request::ScrapeTwitterThread {
                url,
                tweet_id,
                request_url,
            } => Response::Twitter(self.scrape_twitter(url, tweet_id, request_url).await),
            Request::GetApiStatus => Response::ApiStatus(self.api_status().await),
            Request::GetSettings => Response::Settings(self.settings.get()),
            Request::UpdateSettings { patch } => Response::Settings(self.settings.update(patch)),
        }
    }

    fn summary_key(&self, source: &str, settings: &Settings) -> SummaryKey {
        SummaryKey {
            source: source.to_string(),
            backend: settings.backend_choice,
            prompt: settings.custom_prompt.clone(),
        }
    }

    /// Shared page/Reddit path: slot decision, engine run, cache fill.
    async fn summarize(
        &self,
        feature: Feature,
        url: String,
        title: String,
        text: String,
        tab_id: Option<i64>,
    ) -> SummarizeResponse {
        let settings = self.settings.get();
        let key = self.summary_key(&url, &settings);

        let request = SlotRequest {
            feature,
            url: url.clone(),
            tab_id,
            metadata: Default::default(),
        };
        let decision = self
            .registry
            .request_slot(request, || self.cache.summary(&key));

        let job = match decision {
            Decision::Cached(summary) => {
                return SummarizeResponse::complete(title, summary, true)
            }
            Decision::Duplicate => return SummarizeResponse::duplicate(),
            Decision::Start(job) => job,
        };

        self.broadcaster.send(BroadcastEvent::ProcessingStatus {
            status: ProcessingStatus::Started,
            url: Some(url.clone()),
            title: title.clone(),
        });

        let response = match self.engine.run(&job, &text).await {
            Ok(_) if job.is_cancelled() => SummarizeResponse::aborted(),
            Ok(summary) => {
                // An aborted job must never populate the cache; only this
                // clean-completion path writes.
                self.cache.put_summary(key, summary.clone());
                SummarizeResponse::complete(title, summary, false)
            }
            Err(e) if e.is_aborted() => SummarizeResponse::aborted(),
            Err(e) => {
                error!(url = %url, error = %e, "Summarization error");
                SummarizeResponse::failed(e.code(), e.to_string())
            }
        };
        self.registry.finalize(&job.id);
        response
    }

    async fn summarize_reddit(&self, url: String, tab_id: Option<i64>) -> SummarizeResponse {
        let SourceContent { title, text } = match self.reddit.fetch(&url).await {
            Ok(content) => content,
            Err(e) => {
                warn!(url = %url, error = %e, "Reddit fetch failed");
                return SummarizeResponse::failed(e.code(), e.to_string());
            }
        };
        self.summarize(Feature::Reddit, url, title, text, tab_id).await
    }

    async fn youtube_summary(
        &self,
        video_id: String,
        url: Option<String>,
        tab_id: Option<i64>,
    ) -> YoutubeSummaryResponse {
        let watch_url = url
            .clone()
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={video_id}"));
        let settings = self.settings.get();
        let key = self.summary_key(&video_id, &settings);

        let decision = self.registry.request_slot(
            SlotRequest::youtube(&video_id, watch_url.clone(), tab_id),
            || self.cache.youtube_summary(&key),
        );
        let job = match decision {
            Decision::Duplicate => return YoutubeSummaryResponse::streaming(video_id),
            Decision::Cached(summary) => return YoutubeSummaryResponse::cached(video_id, summary),
            Decision::Start(job) => job,
        };

        let response = self.run_youtube_job(&job, &video_id, &watch_url, tab_id, key).await;
        self.registry.finalize(&job.id);
        response
    }

    async fn run_youtube_job(
        &self,
        job: &Arc<Job>,
        video_id: &str,
        watch_url: &str,
        tab_id: Option<i64>,
        key: SummaryKey,
    ) -> YoutubeSummaryResponse {
        // Description is best-effort; a miss only narrows the input.
        let description = match self.cache.description(video_id) {
            Some(description) => Some(description),
            None => match self.youtube.fetch_description(video_id, Some(watch_url)).await {
                Ok(Some(description)) => {
                    self.cache.put_description(video_id, description.clone());
                    Some(description)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(video_id, error = %e, "Description fetch failed");
                    None
                }
            },
        };

        let track = match self.cache.caption_track(video_id) {
            Some(track) => Some(track),
            None => {
                let cancel = job.cancel_token();
                match retrieve_captions(self.captions.as_ref(), video_id, tab_id, &cancel).await {
                    Ok(track) => {
                        self.cache.put_caption_track(video_id, track.clone());
                        Some(track)
                    }
                    Err(e) => {
                        warn!(video_id, error = %e, "Caption retrieval failed");
                        None
                    }
                }
            }
        };

        if job.is_cancelled() {
            return YoutubeSummaryResponse::aborted(
                video_id.to_string(),
                "Summary cancelled (switched to different video)",
            );
        }

        let description_text = description.unwrap_or_default();
        if track.is_none() && description_text.is_empty() {
            return YoutubeSummaryResponse::failed(
                video_id.to_string(),
                "NO_CAPTIONS",
                "Could not retrieve captions for this video".to_string(),
            );
        }

        let caption_text = track
            .as_ref()
            .map(|t| t.resolved_text())
            .unwrap_or_default();
        if caption_text.chars().count() < 10 && description_text.chars().count() < 20 {
            return YoutubeSummaryResponse::failed(
                video_id.to_string(),
                "NO_CAPTIONS",
                "No captions or description available for this video".to_string(),
            );
        }

        let (input, compression) =
            build_summarization_input(&caption_text, &description_text, video_id);
        if input.chars().count() < 20 {
            return YoutubeSummaryResponse::failed(
                video_id.to_string(),
                "NO_CAPTIONS",
                "Not enough content to summarize".to_string(),
            );
        }
        let caption_count = track.map(|t| t.captions.len()).unwrap_or(0);

        match self.engine.run(job, &input).await {
            Ok(_) if job.is_cancelled() => YoutubeSummaryResponse::aborted(
                video_id.to_string(),
                "Summary cancelled (switched to different video)",
            ),
            Ok(summary) => {
                self.cache.put_youtube_summary(key, summary.clone());
                YoutubeSummaryResponse {
                    status: YoutubeStatus::Complete,
                    video_id: video_id.to_string(),
                    summary: Some(summary),
                    cached: Some(false),
                    caption_count: Some(caption_count),
                    compression: Some(compression),
                    error: None,
                    message: None,
                }
            }
            Err(e) if e.is_aborted() => YoutubeSummaryResponse::aborted(
                video_id.to_string(),
                "Summary cancelled (switched to different video)",
            ),
            Err(e) => {
                error!(video_id, error = %e, "YouTube summary failed");
                YoutubeSummaryResponse::failed(
                    video_id.to_string(),
                    "SUMMARY_FAILED",
                    e.to_string(),
                )
            }
        }
    }

    fn abort_youtube(&self, video_id: Option<&str>) -> AbortResponse {
        let job = video_id
            .and_then(|vid| self.registry.youtube_job_for_video(vid))
            .or_else(|| self.registry.active_youtube_job());

        match job {
            Some(job) => {
                self.registry.abort(&job.id, "content_abort_request");
                AbortResponse {
                    status: AbortStatus::Aborted,
                    message: "YouTube summary aborted".to_string(),
                }
            }
            None => AbortResponse {
                status: AbortStatus::Idle,
                message: "No active YouTube summary".to_string(),
            },
        }
    }

    async fn scrape_twitter(
        &self,
        url: String,
        tweet_id: Option<String>,
        request_url: Option<String>,
    ) -> TwitterScrapeResponse {
        let cache_key = tweet_id.clone().unwrap_or_else(|| url.clone());
        if let Some(payload) = self.cache.twitter_thread(&cache_key) {
            return TwitterScrapeResponse {
                status: ScrapeStatus::Ok,
                payload: Some(payload),
                error: None,
            };
        }

        let capture_url = request_url.as_deref().unwrap_or(&url);
        match self
            .twitter
            .capture_thread(capture_url, tweet_id.as_deref())
            .await
        {
            Ok(payload) => {
                self.cache.put_twitter_thread(&cache_key, payload.clone());
                info!(url = %url, nodes = payload.nodes.len(), "Captured thread");
                TwitterScrapeResponse {
                    status: ScrapeStatus::Ok,
                    payload: Some(payload),
                    error: None,
                }
            }
            Err(e) => {
                error!(url = %url, error = %e, "Thread capture failed");
                TwitterScrapeResponse {
                    status: ScrapeStatus::Error,
                    payload: None,
                    error: Some("BACKGROUND_CAPTURE_FAILED".to_string()),
                }
            }
        }
    }

    async fn api_status(&self) -> ApiStatusResponse {
        let extractive = tokio::time::timeout(
            API_STATUS_TIMEOUT,
            self.gateway.availability(BackendKind::Extractive),
        )
        .await
        .unwrap_or(Availability::Unavailable);
        let generative = tokio::time::timeout(
            API_STATUS_TIMEOUT,
            self.gateway.availability(BackendKind::Generative),
        )
        .await
        .unwrap_or(Availability::Unavailable);

        ApiStatusResponse {
            extractive,
            generative,
        }
    }
}
