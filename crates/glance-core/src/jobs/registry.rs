//! The concurrency-control core.
//!
//! Decides whether an incoming request returns a cached result, joins an
//! already-running job, supersedes a prior job, or starts fresh. All
//! operations are synchronous and side-effect-only; the lock is never held
//! across a suspension point, so registry mutations are atomic with respect
//! to each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use super::types::{Feature, Job, JobId, VIDEO_ID_KEY};

/// What the caller should do with an incoming request.
#[derive(Debug)]
pub enum Decision {
    /// A fresh cache entry exists; no job was created.
    Cached(String),
    /// An equivalent job is already in flight. The caller must not start
    /// new work; the existing job's broadcasts are the system of record.
    Duplicate,
    /// A new job was registered; the caller must run it.
    Start(Arc<Job>),
}

/// An incoming summarization request.
#[derive(Debug, Clone)]
pub struct SlotRequest {
    pub feature: Feature,
    pub url: String,
    pub tab_id: Option<i64>,
    pub metadata: HashMap<String, String>,
}

impl SlotRequest {
    pub fn page(url: impl Into<String>, tab_id: Option<i64>) -> Self {
        Self {
            feature: Feature::Page,
            url: url.into(),
            tab_id,
            metadata: HashMap::new(),
        }
    }

    pub fn reddit(url: impl Into<String>, tab_id: Option<i64>) -> Self {
        Self {
            feature: Feature::Reddit,
            url: url.into(),
            tab_id,
            metadata: HashMap::new(),
        }
    }

    pub fn youtube(video_id: &str, url: impl Into<String>, tab_id: Option<i64>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(VIDEO_ID_KEY.to_string(), video_id.to_string());
        Self {
            feature: Feature::Youtube,
            url: url.into(),
            tab_id,
            metadata,
        }
    }
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Arc<Job>>,
    page_slot: Option<JobId>,
    youtube_slot: Option<JobId>,
    video_index: HashMap<String, JobId>,
}

/// Owns the set of live jobs and the per-feature slot pointers.
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("registry lock poisoned")
    }

    /// Decide what to do with an incoming request.
    ///
    /// Supersession runs before the cache probe (a prior job for a
    /// different URL is aborted even when the new request is served from
    /// cache), matching the user's intent of switching targets.
    /// `cache_probe` must be synchronous; it is called under the registry
    /// lock.
    pub fn request_slot(
        &self,
        request: SlotRequest,
        cache_probe: impl FnOnce() -> Option<String>,
    ) -> Decision {
        let mut inner = self.lock();

        match request.feature {
            Feature::Page => {
                if let Some(active_id) = inner.page_slot.clone() {
                    match inner.jobs.get(&active_id).cloned() {
                        Some(job) if job.url == request.url => return Decision::Duplicate,
                        Some(_) => {
                            Self::abort_locked(&mut inner, &active_id, "replaced_by_new_page_request")
                        }
                        None => inner.page_slot = None,
                    }
                }
            }
            Feature::Youtube => {
                let video_id = request.metadata.get(VIDEO_ID_KEY).cloned();
                if let Some(video_id) = &video_id {
                    if let Some(existing) = inner.video_index.get(video_id).cloned() {
                        if inner.jobs.contains_key(&existing) {
                            return Decision::Duplicate;
                        }
                        // Dangling entry; self-heal.
                        inner.video_index.remove(video_id);
                    }
                }
                if let Some(active_id) = inner.youtube_slot.clone() {
                    match inner.jobs.get(&active_id).cloned() {
                        Some(job) => {
                            let active_video = job.video_id().map(str::to_string);
                            if active_video.is_some() && active_video != video_id {
                                Self::abort_locked(&mut inner, &active_id, "youtube_video_switch");
                            }
                        }
                        None => inner.youtube_slot = None,
                    }
                }
            }
            // Request-scoped features: independent, short-lived, no slot.
            Feature::Reddit | Feature::Twitter | Feature::Simplify => {}
        }

        if let Some(value) = cache_probe() {
            return Decision::Cached(value);
        }

        let job = Arc::new(Job::new(
            request.feature,
            request.url,
            request.tab_id,
            request.metadata,
        ));
        inner.jobs.insert(job.id.clone(), Arc::clone(&job));
        match request.feature {
            Feature::Page => inner.page_slot = Some(job.id.clone()),
            Feature::Youtube => {
                inner.youtube_slot = Some(job.id.clone());
                if let Some(video_id) = job.video_id() {
                    inner.video_index.insert(video_id.to_string(), job.id.clone());
                }
            }
            _ => {}
        }
        Decision::Start(job)
    }

    /// Destroy the job's session, remove it, and clear any slot or video
    /// index entry pointing at it. No-op for unknown ids.
    pub fn finalize(&self, id: &JobId) {
        Self::finalize_locked(&mut self.lock(), id);
    }

    /// Trigger the job's cancellation token, then finalize it. Safe to call
    /// on an already-finalized or unknown id.
    pub fn abort(&self, id: &JobId, reason: &str) {
        Self::abort_locked(&mut self.lock(), id, reason);
    }

    pub fn lookup(&self, id: &JobId) -> Option<Arc<Job>> {
        self.lock().jobs.get(id).cloned()
    }

    pub fn is_live(&self, id: &JobId) -> bool {
        self.lock().jobs.contains_key(id)
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn active_page_job(&self) -> Option<Arc<Job>> {
        let inner = self.lock();
        inner
            .page_slot
            .as_ref()
            .and_then(|id| inner.jobs.get(id).cloned())
    }

    pub fn active_youtube_job(&self) -> Option<Arc<Job>> {
        let inner = self.lock();
        inner
            .youtube_slot
            .as_ref()
            .and_then(|id| inner.jobs.get(id).cloned())
    }

    /// Job currently processing `video_id`, if any. Dangling index entries
    /// are discarded lazily.
    pub fn youtube_job_for_video(&self, video_id: &str) -> Option<Arc<Job>> {
        let mut inner = self.lock();
        let id = inner.video_index.get(video_id).cloned()?;
        match inner.jobs.get(&id).cloned() {
            Some(job) => Some(job),
            None => {
                inner.video_index.remove(video_id);
                None
            }
        }
    }

    fn abort_locked(inner: &mut Inner, id: &JobId, reason: &str) {
        let Some(job) = inner.jobs.get(id).cloned() else {
            return;
        };
        if !job.is_cancelled() {
            job.trigger_cancel();
        }
        info!(
            job_id = %job.id,
            feature = ?job.feature,
            url = %job.url,
            reason,
            "Aborting job"
        );
        Self::finalize_locked(inner, id);
    }

    fn finalize_locked(inner: &mut Inner, id: &JobId) {
        let Some(job) = inner.jobs.remove(id) else {
            return;
        };
        job.destroy_session();

        if job.feature == Feature::Page && inner.page_slot.as_ref() == Some(id) {
            inner.page_slot = None;
        }
        if job.feature == Feature::Youtube {
            if inner.youtube_slot.as_ref() == Some(id) {
                inner.youtube_slot = None;
            }
            if let Some(video_id) = job.video_id() {
                if inner.video_index.get(video_id) == Some(id) {
                    inner.video_index.remove(video_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedSession;
    use crate::gateway::BackendKind;

    fn start(registry: &JobRegistry, request: SlotRequest) -> Arc<Job> {
        match registry.request_slot(request, || None) {
            Decision::Start(job) => job,
            other => panic!("expected Start, got {other:?}"),
        }
    }

    #[test]
    fn page_slot_holds_at_most_one_job() {
        let registry = JobRegistry::new();

        let job_a = start(&registry, SlotRequest::page("https://a.test", None));
        let session_a = ScriptedSession::idle();
        job_a.attach_session(session_a.clone(), BackendKind::Extractive);

        let job_b = start(&registry, SlotRequest::page("https://b.test", None));
        let session_b = ScriptedSession::idle();
        job_b.attach_session(session_b.clone(), BackendKind::Extractive);

        let job_c = start(&registry, SlotRequest::page("https://c.test", None));

        assert_eq!(registry.job_count(), 1);
        let active = registry.active_page_job().unwrap();
        assert_eq!(active.id, job_c.id);
        assert_eq!(active.url, "https://c.test");

        // Superseded jobs were aborted and their sessions destroyed.
        assert!(job_a.is_cancelled());
        assert!(job_b.is_cancelled());
        assert!(session_a.is_destroyed());
        assert!(session_b.is_destroyed());
    }

    #[test]
    fn same_url_is_duplicate_not_supersession() {
        let registry = JobRegistry::new();
        let job = start(&registry, SlotRequest::page("https://a.test", None));

        let decision = registry.request_slot(SlotRequest::page("https://a.test", None), || None);
        assert!(matches!(decision, Decision::Duplicate));
        assert!(!job.is_cancelled());
        assert_eq!(registry.job_count(), 1);
    }

    #[test]
    fn supersession_happens_even_on_cache_hit() {
        let registry = JobRegistry::new();
        let job_a = start(&registry, SlotRequest::page("https://a.test", None));

        let decision = registry.request_slot(SlotRequest::page("https://b.test", None), || {
            Some("cached summary".to_string())
        });
        assert!(matches!(decision, Decision::Cached(_)));
        assert!(job_a.is_cancelled());
        assert_eq!(registry.job_count(), 0);
        assert!(registry.active_page_job().is_none());
    }

    #[test]
    fn youtube_dedupes_by_video_id() {
        let registry = JobRegistry::new();
        let job = start(
            &registry,
            SlotRequest::youtube("abc123XYZ_q", "https://youtube.test/w", None),
        );

        let decision = registry.request_slot(
            SlotRequest::youtube("abc123XYZ_q", "https://youtube.test/w", None),
            || None,
        );
        assert!(matches!(decision, Decision::Duplicate));
        assert!(!job.is_cancelled());
        assert_eq!(registry.job_count(), 1);
    }

    #[test]
    fn switching_videos_aborts_the_previous_job() {
        let registry = JobRegistry::new();
        let first = start(
            &registry,
            SlotRequest::youtube("video-one", "https://youtube.test/1", None),
        );
        let second = start(
            &registry,
            SlotRequest::youtube("video-two", "https://youtube.test/2", None),
        );

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.job_count(), 1);
        assert!(registry.youtube_job_for_video("video-one").is_none());
        assert_eq!(
            registry.youtube_job_for_video("video-two").unwrap().id,
            second.id
        );
    }

    #[test]
    fn reddit_jobs_are_not_slot_governed() {
        let registry = JobRegistry::new();
        let first = start(&registry, SlotRequest::reddit("https://reddit.test/1", None));
        let second = start(&registry, SlotRequest::reddit("https://reddit.test/2", None));

        assert!(!first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.job_count(), 2);

        registry.finalize(&first.id);
        registry.finalize(&second.id);
    }

    #[test]
    fn finalize_clears_slot_and_video_index() {
        let registry = JobRegistry::new();
        let job = start(
            &registry,
            SlotRequest::youtube("vid", "https://youtube.test/w", None),
        );
        let session = ScriptedSession::idle();
        job.attach_session(session.clone(), BackendKind::Extractive);

        registry.finalize(&job.id);

        assert_eq!(registry.job_count(), 0);
        assert!(registry.active_youtube_job().is_none());
        assert!(registry.youtube_job_for_video("vid").is_none());
        assert!(session.is_destroyed());
        assert!(!job.has_session());
    }

    #[test]
    fn abort_is_a_no_op_for_unknown_or_finalized_jobs() {
        let registry = JobRegistry::new();
        let job = start(&registry, SlotRequest::page("https://a.test", None));
        registry.finalize(&job.id);

        // Both calls must be harmless.
        registry.abort(&job.id, "late");
        registry.abort(&JobId::generate(), "unknown");
        assert_eq!(registry.job_count(), 0);
    }
}
