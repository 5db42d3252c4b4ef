//! Glance Core - on-hover web content summarization orchestration
//!
//! This crate contains the transport-agnostic core of Glance, including:
//! - Model gateway over the on-device inference backends
//! - TTL result caches for summaries and fetched artifacts
//! - Job registry with per-feature slot exclusivity and cancellation
//! - The streaming summarization engine
//! - Reddit/Twitter/YouTube source adapters
//! - The message contract spoken by extension surfaces

pub mod adapters;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod markdown;
pub mod orchestrator;
pub mod retry;
pub mod settings;

#[cfg(test)]
pub(crate) mod test_support;

pub use broadcast::{BroadcastEvent, Broadcaster};
pub use cache::{ResultCache, SummaryKey};
pub use config::Config;
pub use engine::SummarizationEngine;
pub use error::{AdapterError, SummarizeError};
pub use gateway::{Availability, BackendKind, Capability, ModelGateway};
pub use jobs::{Decision, Feature, Job, JobId, JobRegistry};
pub use orchestrator::{Orchestrator, Request, Response};
pub use settings::{Settings, SettingsPatch, SettingsStore};
