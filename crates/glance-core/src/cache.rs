//! TTL-based result caches for completed summaries and fetched artifacts.
//!
//! Entries expire on read once older than their sub-cache's TTL, and a
//! sweeper evicts them on a fixed interval regardless of read pressure to
//! bound memory. Caches are best-effort: a miss or eviction degrades to a
//! recompute, never to an error.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::adapters::twitter::ThreadPayload;
use crate::adapters::youtube::CaptionTrack;
use crate::gateway::BackendKind;

/// TTL for summaries, captions and descriptions.
pub const SUMMARY_TTL: Duration = Duration::from_secs(30 * 60);
/// Twitter thread payloads go stale quickly as replies arrive.
pub const TWITTER_THREAD_TTL: Duration = Duration::from_secs(5 * 60);
/// Fixed sweep interval, independent of access pattern.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Key for a rendered summary. Backend and prompt are part of the key so
/// changing either invalidates prior cached summaries for the same source.
/// `source` is the page URL for page/Reddit summaries and the video id for
/// YouTube summaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryKey {
    pub source: String,
    pub backend: BackendKind,
    pub prompt: String,
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// A single TTL'd key-value map.
struct TtlCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).and_then(|entry| {
            if entry.stored_at.elapsed() > self.ttl {
                None
            } else {
                Some(entry.value.clone())
            }
        })
    }

    fn put(&mut self, key: K, value: V) {
        self.entries.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    fn sweep(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.stored_at.elapsed() <= ttl);
        before - self.entries.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct Caches {
    /// Page and Reddit summaries, keyed by URL + backend + prompt.
    summaries: TtlCache<SummaryKey, String>,
    /// Parsed caption tracks by video id.
    youtube_captions: TtlCache<String, CaptionTrack>,
    /// Rendered video summaries, keyed by video id + backend + prompt.
    youtube_summaries: TtlCache<SummaryKey, String>,
    /// Video descriptions by video id.
    youtube_descriptions: TtlCache<String, String>,
    /// Captured thread payloads by tweet id (or URL when no id is known).
    twitter_threads: TtlCache<String, ThreadPayload>,
}

/// The process-wide result cache. All operations are synchronous; the lock
/// is never held across a suspension point.
pub struct ResultCache {
    inner: Mutex<Caches>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Caches {
                summaries: TtlCache::new(SUMMARY_TTL),
                youtube_captions: TtlCache::new(SUMMARY_TTL),
                youtube_summaries: TtlCache::new(SUMMARY_TTL),
                youtube_descriptions: TtlCache::new(SUMMARY_TTL),
                twitter_threads: TtlCache::new(TWITTER_THREAD_TTL),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Caches> {
        self.inner.lock().expect("cache lock poisoned")
    }

    pub fn summary(&self, key: &SummaryKey) -> Option<String> {
        self.lock().summaries.get(key)
    }

    pub fn put_summary(&self, key: SummaryKey, summary: String) {
        self.lock().summaries.put(key, summary);
    }

    pub fn caption_track(&self, video_id: &str) -> Option<CaptionTrack> {
        self.lock().youtube_captions.get(&video_id.to_string())
    }

    pub fn put_caption_track(&self, video_id: &str, track: CaptionTrack) {
        self.lock().youtube_captions.put(video_id.to_string(), track);
    }

    pub fn youtube_summary(&self, key: &SummaryKey) -> Option<String> {
        self.lock().youtube_summaries.get(key)
    }

    pub fn put_youtube_summary(&self, key: SummaryKey, summary: String) {
        self.lock().youtube_summaries.put(key, summary);
    }

    pub fn description(&self, video_id: &str) -> Option<String> {
        self.lock().youtube_descriptions.get(&video_id.to_string())
    }

    pub fn put_description(&self, video_id: &str, description: String) {
        self.lock()
            .youtube_descriptions
            .put(video_id.to_string(), description);
    }

    pub fn twitter_thread(&self, key: &str) -> Option<ThreadPayload> {
        self.lock().twitter_threads.get(&key.to_string())
    }

    pub fn put_twitter_thread(&self, key: &str, payload: ThreadPayload) {
        self.lock().twitter_threads.put(key.to_string(), payload);
    }

    /// Evict expired entries from every sub-cache. Returns the eviction count.
    pub fn sweep(&self) -> usize {
        let mut caches = self.lock();
        let evicted = caches.summaries.sweep()
            + caches.youtube_captions.sweep()
            + caches.youtube_summaries.sweep()
            + caches.youtube_descriptions.sweep()
            + caches.twitter_threads.sweep();
        if evicted > 0 {
            debug!(evicted, "Swept expired cache entries");
        }
        evicted
    }

    /// Total live entries across sub-caches (expired-but-unswept included).
    pub fn entry_count(&self) -> usize {
        let caches = self.lock();
        caches.summaries.len()
            + caches.youtube_captions.len()
            + caches.youtube_summaries.len()
            + caches.youtube_descriptions.len()
            + caches.twitter_threads.len()
    }

    /// Run `sweep` every [`SWEEP_INTERVAL`] until the handle is dropped or
    /// aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }
}
