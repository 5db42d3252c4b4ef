//! Extractive key-point backend.
//!
//! A frequency-based sentence ranker that runs entirely in-process, so it
//! is always `Available` - no model asset to download. Output is a
//! markdown bullet list of the highest-scoring sentences in document
//! order, streamed one bullet at a time as accumulated text.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::{Availability, BackendKind, ChunkStream, InferenceBackend, InferenceSession};
use crate::error::SummarizeError;

/// Words too common to carry signal when scoring sentences.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "while", "of", "to", "in",
    "on", "at", "by", "for", "with", "from", "into", "about", "as", "is", "are", "was", "were",
    "be", "been", "being", "it", "its", "this", "that", "these", "those", "he", "she", "they",
    "them", "his", "her", "their", "we", "you", "your", "our", "i", "me", "my", "not", "no", "so",
    "do", "does", "did", "have", "has", "had", "will", "would", "can", "could", "should", "there",
    "here", "what", "which", "who", "how", "all", "more", "most", "some", "such", "than", "too",
    "very", "just", "also", "up", "out", "over", "under", "again",
];

#[derive(Debug, Clone)]
pub struct ExtractiveOptions {
    /// How many sentences make up the summary.
    pub max_points: usize,
    /// Sentences shorter than this (in chars) are never selected.
    pub min_sentence_len: usize,
}

impl Default for ExtractiveOptions {
    fn default() -> Self {
        Self {
            max_points: 5,
            min_sentence_len: 25,
        }
    }
}

/// The always-resident extractive summarizer backend.
#[derive(Default)]
pub struct ExtractiveBackend {
    options: ExtractiveOptions,
}

impl ExtractiveBackend {
    pub fn new(options: ExtractiveOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl InferenceBackend for ExtractiveBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Extractive
    }

    async fn availability(&self) -> Availability {
        Availability::Available
    }

    async fn create_session(&self) -> Result<Arc<dyn InferenceSession>, SummarizeError> {
        Ok(Arc::new(ExtractiveSession {
            options: self.options.clone(),
            destroyed: CancellationToken::new(),
        }))
    }
}

struct ExtractiveSession {
    options: ExtractiveOptions,
    destroyed: CancellationToken,
}

#[async_trait]
impl InferenceSession for ExtractiveSession {
    async fn run_streaming(&self, input: &str) -> Result<ChunkStream, SummarizeError> {
        if self.destroyed.is_cancelled() {
            return Err(SummarizeError::Aborted);
        }

        let points = key_points(input, &self.options);
        let destroyed = self.destroyed.clone();
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            let mut accumulated = String::new();
            for point in points {
                if !accumulated.is_empty() {
                    accumulated.push('\n');
                }
                accumulated.push_str("- ");
                accumulated.push_str(&point);

                tokio::select! {
                    _ = destroyed.cancelled() => return,
                    sent = tx.send(Ok(accumulated.clone())) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
                // Yield between bullets so cancellation is observed promptly
                // even on large inputs.
                tokio::task::yield_now().await;
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

/// Rank sentences by mean content-word frequency and return the top
/// `max_points` in document order.
fn key_points(text: &str, options: &ExtractiveOptions) -> Vec<String> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut frequencies: HashMap<String, f64> = HashMap::new();
    for sentence in &sentences {
        for word in content_words(sentence) {
            *frequencies.entry(word).or_insert(0.0) += 1.0;
        }
    }
    let max_freq = frequencies.values().copied().fold(1.0_f64, f64::max);
    for value in frequencies.values_mut() {
        *value /= max_freq;
    }

    let mut scored: Vec<(usize, f64)> = sentences
        .iter()
        .enumerate()
        .filter(|(_, s)| s.chars().count() >= options.min_sentence_len)
        .map(|(index, sentence)| {
            let words = content_words(sentence);
            let score = if words.is_empty() {
                0.0
            } else {
                words.iter().filter_map(|w| frequencies.get(w)).sum::<f64>()
                    / words.len() as f64
            };
            (index, score)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut selected: Vec<usize> = scored
        .into_iter()
        .take(options.max_points)
        .map(|(index, _)| index)
        .collect();
    selected.sort_unstable();

    selected
        .into_iter()
        .map(|index| sentences[index].clone())
        .collect()
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

fn content_words(sentence: &str) -> Vec<String> {
    sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    const ARTICLE: &str = "Rust is a systems programming language focused on safety. \
        The borrow checker enforces memory safety at compile time. \
        Cats are nice. \
        Many large projects now adopt Rust for systems programming work because the \
        compiler catches memory bugs early. \
        The weather was mild on Tuesday. \
        Safety without garbage collection is the main selling point of Rust.";

    #[test]
    fn picks_topical_sentences_in_document_order() {
        let points = key_points(ARTICLE, &ExtractiveOptions::default());
        assert!(!points.is_empty());
        assert!(points.len() <= 5);
        // Short filler never qualifies.
        assert!(points.iter().all(|p| p != "Cats are nice."));
        // Document order is preserved.
        let positions: Vec<usize> = points
            .iter()
            .map(|p| ARTICLE.find(p.as_str()).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[tokio::test]
    async fn streams_accumulated_bullets() {
        let backend = ExtractiveBackend::default();
        let session = backend.create_session().await.unwrap();
        let mut stream = session.run_streaming(ARTICLE).await.unwrap();

        let mut last = String::new();
        let mut count = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            // Full-accumulated-text convention: each chunk extends the last.
            assert!(chunk.starts_with(&last));
            last = chunk;
            count += 1;
        }
        assert!(count >= 1);
        assert!(last.starts_with("- "));
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_ends_the_stream() {
        let backend = ExtractiveBackend::default();
        let session = backend.create_session().await.unwrap();
        let mut stream = session.run_streaming(ARTICLE).await.unwrap();
        let _ = stream.next().await;

        session.destroy();
        session.destroy();
        assert!(session.is_destroyed());

        // Drains without hanging; producer stops once the token fires.
        while stream.next().await.is_some() {}
    }

    #[tokio::test]
    async fn empty_input_yields_empty_stream() {
        let backend = ExtractiveBackend::default();
        let session = backend.create_session().await.unwrap();
        let mut stream = session.run_streaming("").await.unwrap();
        assert!(stream.next().await.is_none());
    }
}
