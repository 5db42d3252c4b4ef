//! In-flight summarization jobs and the registry that owns them.

mod registry;
mod types;

pub use registry::{Decision, JobRegistry, SlotRequest};
pub use types::{Feature, Job, JobId, VIDEO_ID_KEY};
