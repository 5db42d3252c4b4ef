//! Error taxonomy for the summarization core.
//!
//! Two families: `SummarizeError` for everything the engine/gateway can
//! produce, `AdapterError` for content-retrieval failures in the source
//! adapters. Both carry a stable snake_case code for the message layer.

use thiserror::Error;

use crate::gateway::BackendKind;

/// Errors produced by the Model Gateway and the Summarization Engine.
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// No usable inference backend for the request.
    #[error("no usable inference backend: {0}")]
    BackendUnavailable(String),

    /// The backend exists but its model asset is not resident yet.
    /// Retryable later; distinct from a hard failure.
    #[error("model download required for the {0} backend")]
    ModelDownloadRequired(BackendKind),

    /// Cooperative cancellation. Expected and silent; never surfaced to the
    /// user as an error.
    #[error("summarization aborted")]
    Aborted,

    /// Opaque inference-backend failure.
    #[error("inference backend error: {0}")]
    Backend(String),
}

impl SummarizeError {
    /// Stable machine-readable code for message responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::ModelDownloadRequired(_) => "model_download_required",
            Self::Aborted => "aborted",
            Self::Backend(_) => "backend_error",
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Content-retrieval failures in source adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The requested content does not exist or the URL is not of the
    /// expected shape.
    #[error("{0}")]
    NotFound(String),

    /// Network-level retrieval failure.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The content was retrieved but could not be interpreted.
    #[error("parse failed: {0}")]
    ParseFailed(String),
}

impl AdapterError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::FetchFailed(_) => "fetch_failed",
            Self::ParseFailed(_) => "parse_failed",
        }
    }
}
