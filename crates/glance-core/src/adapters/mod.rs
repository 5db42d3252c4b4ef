//! Source adapters: fetch and shape raw content into plain text for the
//! engine. The registry and engine only ever see the `{title, text}`
//! contract; how each source works internally stays in here.

pub mod reddit;
pub mod twitter;
pub mod youtube;

/// What every adapter produces for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceContent {
    pub title: String,
    pub text: String,
}
