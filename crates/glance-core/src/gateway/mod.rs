//! Model Gateway: capability detection and session creation over the
//! available on-device inference backends.
//!
//! Two backends exist: an extractive key-point summarizer (pure Rust,
//! always resident) and a generative prompt model served by a local
//! OpenAI-compatible endpoint. The gateway hides which of them are wired
//! behind a uniform availability/session contract.
//!
//! Streaming contract: every chunk yielded by a session is the **full
//! accumulated text so far** - consumers replace their running value, they
//! never append. Both backends and any test double must follow this.

pub mod extractive;
pub mod generative;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::SummarizeError;

pub use extractive::ExtractiveBackend;
pub use generative::PromptBackend;

/// The two inference backends the gateway can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Extractive,
    Generative,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extractive => write!(f, "extractive"),
            Self::Generative => write!(f, "generative"),
        }
    }
}

/// Availability of one backend.
///
/// `Downloadable`/`Downloading` mean the backend exists but its model asset
/// is not resident; callers treat that as retryable-later, not broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Available,
    Downloadable,
    Downloading,
    Unavailable,
    Error,
}

/// Which backends were wired at construction, resolved once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    None,
    Extractive,
    Generative,
    Both,
}

impl Capability {
    pub fn has(&self, kind: BackendKind) -> bool {
        matches!(
            (self, kind),
            (Capability::Both, _)
                | (Capability::Extractive, BackendKind::Extractive)
                | (Capability::Generative, BackendKind::Generative)
        )
    }
}

/// Stream of accumulated-text chunks from one inference run.
pub type ChunkStream = ReceiverStream<Result<String, SummarizeError>>;

/// One inference backend (summarizer or prompt model).
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Probe current availability. Never fails; absence is a normal state.
    /// Re-queried for every job - downloads may complete mid-process.
    async fn availability(&self) -> Availability;

    /// Create a fresh session. Sessions are never reused across jobs.
    async fn create_session(&self) -> Result<Arc<dyn InferenceSession>, SummarizeError>;
}

/// A live inference session.
///
/// `destroy` is idempotent: safe to call repeatedly, safe to call while a
/// streaming read is suspended (the stream then simply ends), safe to call
/// after the stream finished.
#[async_trait]
pub trait InferenceSession: Send + Sync {
    /// Start streaming inference over `input`. Each item is the full
    /// accumulated output so far (replace, never append).
    async fn run_streaming(&self, input: &str) -> Result<ChunkStream, SummarizeError>;

    fn destroy(&self);

    fn is_destroyed(&self) -> bool;
}

/// Map a non-ready availability to the documented failure kind.
pub fn require_available(kind: BackendKind, status: Availability) -> Result<(), SummarizeError> {
    match status {
        Availability::Available => Ok(()),
        Availability::Downloadable | Availability::Downloading => {
            Err(SummarizeError::ModelDownloadRequired(kind))
        }
        Availability::Unavailable => Err(SummarizeError::BackendUnavailable(format!(
            "{kind} backend is unavailable on this device"
        ))),
        Availability::Error => Err(SummarizeError::Backend(format!(
            "{kind} backend failed its availability check"
        ))),
    }
}

/// Capability detection and session factory over the wired backends.
pub struct ModelGateway {
    extractive: Option<Arc<dyn InferenceBackend>>,
    generative: Option<Arc<dyn InferenceBackend>>,
}

impl ModelGateway {
    pub fn new(
        extractive: Option<Arc<dyn InferenceBackend>>,
        generative: Option<Arc<dyn InferenceBackend>>,
    ) -> Self {
        Self {
            extractive,
            generative,
        }
    }

    /// Default wiring: the native extractive summarizer plus a generative
    /// prompt backend pointed at a local model server.
    pub fn with_local_defaults(prompt_base_url: &str, prompt_model: &str) -> Self {
        Self::new(
            Some(Arc::new(ExtractiveBackend::default())),
            Some(Arc::new(PromptBackend::new(prompt_base_url, prompt_model))),
        )
    }

    fn backend(&self, kind: BackendKind) -> Option<&Arc<dyn InferenceBackend>> {
        match kind {
            BackendKind::Extractive => self.extractive.as_ref(),
            BackendKind::Generative => self.generative.as_ref(),
        }
    }

    /// Which backends are present. Never fails; absence is expected.
    pub fn detect_capabilities(&self) -> Capability {
        match (&self.extractive, &self.generative) {
            (Some(_), Some(_)) => Capability::Both,
            (Some(_), None) => Capability::Extractive,
            (None, Some(_)) => Capability::Generative,
            (None, None) => Capability::None,
        }
    }

    /// Current availability of one backend; `Unavailable` if it is not wired.
    pub async fn availability(&self, kind: BackendKind) -> Availability {
        match self.backend(kind) {
            Some(backend) => backend.availability().await,
            None => Availability::Unavailable,
        }
    }

    /// Create a fresh session on the given backend.
    pub async fn create_session(
        &self,
        kind: BackendKind,
    ) -> Result<Arc<dyn InferenceSession>, SummarizeError> {
        let backend = self.backend(kind).ok_or_else(|| {
            SummarizeError::BackendUnavailable(format!("no {kind} backend is registered"))
        })?;
        backend.create_session().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_resolution() {
        let both = ModelGateway::with_local_defaults("http://127.0.0.1:11434/v1", "m");
        assert_eq!(both.detect_capabilities(), Capability::Both);
        assert!(both.detect_capabilities().has(BackendKind::Extractive));

        let none = ModelGateway::new(None, None);
        assert_eq!(none.detect_capabilities(), Capability::None);
        assert!(!none.detect_capabilities().has(BackendKind::Generative));
    }

    #[tokio::test]
    async fn missing_backend_is_unavailable_not_error() {
        let gateway = ModelGateway::new(None, None);
        assert_eq!(
            gateway.availability(BackendKind::Generative).await,
            Availability::Unavailable
        );
        let err = gateway
            .create_session(BackendKind::Generative)
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "backend_unavailable");
    }

    #[test]
    fn availability_maps_to_failure_kinds() {
        let kind = BackendKind::Generative;
        assert!(require_available(kind, Availability::Available).is_ok());
        assert_eq!(
            require_available(kind, Availability::Downloadable)
                .unwrap_err()
                .code(),
            "model_download_required"
        );
        assert_eq!(
            require_available(kind, Availability::Downloading)
                .unwrap_err()
                .code(),
            "model_download_required"
        );
        assert_eq!(
            require_available(kind, Availability::Unavailable)
                .unwrap_err()
                .code(),
            "backend_unavailable"
        );
        assert_eq!(
            require_available(kind, Availability::Error)
                .unwrap_err()
                .code(),
            "backend_error"
        );
    }
}
