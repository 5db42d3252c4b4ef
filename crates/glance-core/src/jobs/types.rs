//! Job data structures.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::gateway::{BackendKind, InferenceSession};

/// Metadata key carrying the YouTube video id.
pub const VIDEO_ID_KEY: &str = "videoId";

/// Unique id of one summarization job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub(crate) fn generate() -> Self {
        Self(format!("job-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The feature surface a job belongs to. Page and YouTube are governed by
/// an exclusive slot; Reddit, Twitter and simplify requests are
/// request-scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Page,
    Youtube,
    Reddit,
    Twitter,
    Simplify,
}

struct AttachedSession {
    handle: Arc<dyn InferenceSession>,
    kind: BackendKind,
}

/// One unit of in-flight summarization work.
///
/// The cancellation token is terminal: once triggered it is never reset. A
/// job holds at most one live inference session; finalizing always destroys
/// whatever session is currently attached.
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub tab_id: Option<i64>,
    pub feature: Feature,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    cancel: CancellationToken,
    session: Mutex<Option<AttachedSession>>,
}

impl Job {
    pub(crate) fn new(
        feature: Feature,
        url: String,
        tab_id: Option<i64>,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id: JobId::generate(),
            url,
            tab_id,
            feature,
            metadata,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            session: Mutex::new(None),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn trigger_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn video_id(&self) -> Option<&str> {
        self.metadata.get(VIDEO_ID_KEY).map(String::as_str)
    }

    /// Attach a session so cancellation can reach it. Does not destroy a
    /// previously attached session; that is the caller's responsibility.
    pub fn attach_session(&self, handle: Arc<dyn InferenceSession>, kind: BackendKind) {
        let mut slot = self.session.lock().expect("session lock poisoned");
        *slot = Some(AttachedSession { handle, kind });
    }

    pub fn has_session(&self) -> bool {
        self.session.lock().expect("session lock poisoned").is_some()
    }

    pub fn session_kind(&self) -> Option<BackendKind> {
        self.session
            .lock()
            .expect("session lock poisoned")
            .as_ref()
            .map(|s| s.kind)
    }

    /// Destroy and detach the current session, if any. Idempotent.
    pub fn destroy_session(&self) {
        let attached = self.session.lock().expect("session lock poisoned").take();
        if let Some(attached) = attached {
            attached.handle.destroy();
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("feature", &self.feature)
            .field("cancelled", &self.is_cancelled())
            .field("has_session", &self.has_session())
            .finish()
    }
}
