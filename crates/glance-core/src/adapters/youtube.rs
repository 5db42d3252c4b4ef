//! YouTube adapter: caption track parsing, watch-page description
//! extraction, and the combined description+transcript input builder.
//!
//! Caption payloads arrive from an in-tab bridge (external); the formats
//! are the json3 `events` form, the legacy XML `<transcript>` form, and a
//! pre-parsed caption array.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AdapterError;
use crate::retry::{Backoff, RetryPolicy};

/// Combined character budget for description + transcript.
const MAX_TOTAL: usize = 4000;
/// Description cap within the combined budget.
const DESCRIPTION_LIMIT: usize = 1000;
/// Reserve for the section headers.
const HEADER_OVERHEAD: usize = 160;
/// The transcript never shrinks below this.
const MIN_CAPTION_LIMIT: usize = 600;

/// Caption fetches are flaky while the player boots; retry with a fixed
/// delay.
pub const CAPTION_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 6,
    backoff: Backoff::Fixed(Duration::from_millis(500)),
};

/// One timed caption line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub text: String,
}

/// A parsed caption track, optionally with pre-flattened text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptionTrack {
    #[serde(default)]
    pub captions: Vec<Caption>,
    #[serde(default)]
    pub text: Option<String>,
}

impl CaptionTrack {
    pub fn resolved_text(&self) -> String {
        match &self.text {
            Some(text) if !text.trim().is_empty() => text.clone(),
            _ => captions_to_text(&self.captions),
        }
    }
}

/// Supplies raw caption data for a video (the in-tab bridge).
#[async_trait]
pub trait CaptionSource: Send + Sync {
    async fn fetch_captions(
        &self,
        video_id: &str,
        tab_id: Option<i64>,
    ) -> Result<CaptionTrack, AdapterError>;
}

/// Fetch captions through `source` under [`CAPTION_RETRY`], bailing out
/// when `cancel` fires.
pub async fn retrieve_captions(
    source: &dyn CaptionSource,
    video_id: &str,
    tab_id: Option<i64>,
    cancel: &CancellationToken,
) -> Result<CaptionTrack, AdapterError> {
    CAPTION_RETRY
        .run(
            cancel,
            || AdapterError::FetchFailed("caption retrieval cancelled".to_string()),
            |attempt| {
                debug!(video_id, attempt, "Fetching captions");
                source.fetch_captions(video_id, tab_id)
            },
        )
        .await
}

/// Parse a raw caption payload in any of the supported formats.
pub fn parse_caption_payload(data: &str) -> Result<Vec<Caption>, AdapterError> {
    if data.contains("\"events\"") || data.contains("\"wireMagic\"") {
        return parse_json3(data);
    }
    if data.contains("<?xml") || data.contains("<transcript>") {
        return parse_transcript_xml(data);
    }
    let trimmed = data.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(data)
            .map_err(|e| AdapterError::ParseFailed(format!("caption array: {e}")));
    }
    Err(AdapterError::ParseFailed(
        "unrecognized caption payload".to_string(),
    ))
}

fn parse_json3(data: &str) -> Result<Vec<Caption>, AdapterError> {
    #[derive(Deserialize)]
    struct Json3 {
        #[serde(default)]
        events: Vec<Json3Event>,
    }
    #[derive(Deserialize)]
    struct Json3Event {
        #[serde(default, rename = "tStartMs")]
        t_start_ms: f64,
        #[serde(default, rename = "dDurationMs")]
        d_duration_ms: f64,
        segs: Option<Vec<Json3Seg>>,
    }
    #[derive(Deserialize)]
    struct Json3Seg {
        #[serde(default)]
        utf8: String,
    }

    let parsed: Json3 = serde_json::from_str(data)
        .map_err(|e| AdapterError::ParseFailed(format!("json3 captions: {e}")))?;
    Ok(parsed
        .events
        .into_iter()
        .filter_map(|event| {
            let segs = event.segs?;
            let text: String = segs.into_iter().map(|s| s.utf8).collect();
            Some(Caption {
                start: event.t_start_ms / 1000.0,
                duration: event.d_duration_ms / 1000.0,
                text,
            })
        })
        .collect())
}

fn parse_transcript_xml(data: &str) -> Result<Vec<Caption>, AdapterError> {
    let mut reader = Reader::from_str(data);

    let mut captions = Vec::new();
    let mut current: Option<Caption> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) if element.name().as_ref() == b"text" => {
                let mut caption = Caption {
                    start: 0.0,
                    duration: 0.0,
                    text: String::new(),
                };
                for attribute in element.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attribute.value).to_string();
                    match attribute.key.as_ref() {
                        b"start" => caption.start = value.parse().unwrap_or(0.0),
                        b"dur" => caption.duration = value.parse().unwrap_or(0.0),
                        _ => {}
                    }
                }
                current = Some(caption);
            }
            Ok(Event::Text(text)) => {
                if let Some(caption) = current.as_mut() {
                    caption.text.push_str(
                        &text
                            .unescape()
                            .map_err(|e| AdapterError::ParseFailed(e.to_string()))?,
                    );
                }
            }
            Ok(Event::End(element)) if element.name().as_ref() == b"text" => {
                if let Some(mut caption) = current.take() {
                    caption.text = caption.text.trim().to_string();
                    captions.push(caption);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(AdapterError::ParseFailed(format!("caption xml: {e}"))),
        }
    }
    Ok(captions)
}

/// Flatten a caption list to one whitespace-normalized line of text.
pub fn captions_to_text(captions: &[Caption]) -> String {
    static SPACE_RUNS: OnceLock<Regex> = OnceLock::new();
    let joined = captions
        .iter()
        .map(|c| c.text.as_str())
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    SPACE_RUNS
        .get_or_init(|| Regex::new(r"\s+").expect("static regex"))
        .replace_all(&joined, " ")
        .trim()
        .to_string()
}

pub fn decode_html_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&#x2F;", "/")
        .replace("&nbsp;", " ")
        .replace("&#10;", "\n")
        .replace("&#13;", "\r")
        .replace('\u{a0}', " ")
}

pub fn normalize_whitespace(text: &str) -> String {
    static SPACE_RUNS: OnceLock<Regex> = OnceLock::new();
    static LINE_RUNS: OnceLock<Regex> = OnceLock::new();

    let text = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\t', " ")
        .replace('\u{200b}', "");
    let text = SPACE_RUNS
        .get_or_init(|| Regex::new(r"[ \x0C\x0B]+").expect("static regex"))
        .replace_all(&text, " ");
    LINE_RUNS
        .get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
        .replace_all(&text, "\n\n")
        .trim()
        .to_string()
}

/// Start+middle+end clip of a transcript to `limit` characters, hard-cut
/// with an ellipsis when the seams still overflow.
pub fn clip_transcript(text: &str, limit: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return text.to_string();
    }

    let part = (limit / 3).max(200);
    let start: String = chars[..part.min(chars.len())].iter().collect();
    let mid_start = (chars.len() / 2).saturating_sub(part / 2);
    let mid_end = (mid_start + part).min(chars.len());
    let middle: String = chars[mid_start..mid_end].iter().collect();
    let end: String = chars[chars.len().saturating_sub(part)..].iter().collect();

    let clipped = format!(
        "{}\n\n[...]\n\n{}\n\n[...]\n\n{}",
        start.trim_end(),
        middle.trim(),
        end.trim_start()
    );
    let clipped_chars: Vec<char> = clipped.chars().collect();
    if clipped_chars.len() > limit {
        let cut: String = clipped_chars[..limit - 1].iter().collect();
        format!("{}\u{2026}", cut.trim_end())
    } else {
        clipped
    }
}

/// What got included/cut while building the combined input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMetadata {
    pub caption_included: bool,
    pub description_included: bool,
    pub caption_truncated: bool,
    pub description_truncated: bool,
    pub hard_truncated: bool,
}

/// Combine description and transcript under the shared budget. The
/// description is capped first; the transcript takes the remainder but
/// never less than [`MIN_CAPTION_LIMIT`].
pub fn build_summarization_input(
    caption_text: &str,
    description_text: &str,
    video_id: &str,
) -> (String, InputMetadata) {
    let mut metadata = InputMetadata {
        caption_included: !caption_text.trim().is_empty(),
        description_included: !description_text.trim().is_empty(),
        ..InputMetadata::default()
    };

    let header = format!("Video ID: {video_id}");
    let mut sections = vec![header.clone()];

    let mut description_section = String::new();
    if metadata.description_included {
        let normalized = normalize_whitespace(description_text);
        if normalized.chars().count() > DESCRIPTION_LIMIT {
            let cut: String = normalized.chars().take(DESCRIPTION_LIMIT - 1).collect();
            description_section = format!("{}\u{2026}", cut.trim_end());
            metadata.description_truncated = true;
        } else {
            description_section = normalized;
        }
        sections.push(format!("Description:\n{description_section}"));
    }

    let normalized_caption = if metadata.caption_included {
        normalize_whitespace(caption_text)
    } else {
        String::new()
    };
    let mut caption_section = String::new();
    if metadata.caption_included {
        let budget = MAX_TOTAL as i64
            - HEADER_OVERHEAD as i64
            - description_section.chars().count() as i64;
        let caption_limit = (budget.max(MIN_CAPTION_LIMIT as i64) as usize)
            .min(MAX_TOTAL - HEADER_OVERHEAD);
        caption_section = clip_transcript(&normalized_caption, caption_limit);
        metadata.caption_truncated =
            normalized_caption.chars().count() > caption_section.chars().count();
        sections.push(format!("Transcript:\n{caption_section}"));
    }

    let mut combined = sections.join("\n\n").trim().to_string();

    if combined.chars().count() > MAX_TOTAL && !caption_section.is_empty() {
        let non_caption = combined.chars().count() as i64 - caption_section.chars().count() as i64;
        let available = MAX_TOTAL as i64 - non_caption - HEADER_OVERHEAD as i64;
        let next_limit = available
            .min(caption_section.chars().count() as i64)
            .max(MIN_CAPTION_LIMIT as i64) as usize;
        caption_section = clip_transcript(&normalized_caption, next_limit);
        metadata.caption_truncated = true;

        let mut rebuilt = vec![header];
        if !description_section.is_empty() {
            rebuilt.push(format!("Description:\n{description_section}"));
        }
        rebuilt.push(format!("Transcript:\n{caption_section}"));
        combined = rebuilt.join("\n\n").trim().to_string();
    }

    if combined.chars().count() > MAX_TOTAL {
        let cut: String = combined.chars().take(MAX_TOTAL - 1).collect();
        combined = format!("{}\u{2026}", cut.trim_end());
        metadata.hard_truncated = true;
    }

    (combined, metadata)
}

/// Pull the video description out of a watch-page HTML document.
pub fn extract_description_from_html(html: &str) -> Option<String> {
    static PLAYER: OnceLock<Regex> = OnceLock::new();
    static META: OnceLock<Regex> = OnceLock::new();
    static OG: OnceLock<Regex> = OnceLock::new();

    if let Some(captures) = PLAYER
        .get_or_init(|| {
            Regex::new(r"(?s)ytInitialPlayerResponse\s*=\s*(\{.*?\})\s*;").expect("static regex")
        })
        .captures(html)
    {
        if let Ok(player) = serde_json::from_str::<Value>(&captures[1]) {
            if let Some(description) = player
                .pointer("/videoDetails/shortDescription")
                .and_then(Value::as_str)
            {
                let description = description.trim();
                if !description.is_empty() {
                    return Some(description.to_string());
                }
            }
        }
    }

    if let Some(captures) = META
        .get_or_init(|| {
            Regex::new(
                r#"(?i)<meta\s+(?:itemprop|name|property)=["']description["']\s+content=["']([^"']*)["']"#,
            )
            .expect("static regex")
        })
        .captures(html)
    {
        return Some(decode_html_entities(&captures[1]));
    }

    OG.get_or_init(|| {
        Regex::new(r#"(?i)<meta\s+property=["']og:description["']\s+content=["']([^"']*)["']"#)
            .expect("static regex")
    })
    .captures(html)
    .map(|captures| decode_html_entities(&captures[1]))
}

/// Fetches watch pages for descriptions.
#[derive(Clone, Default)]
pub struct YoutubeAdapter {
    client: reqwest::Client,
}

impl YoutubeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the description for a video, preferring the caller's watch URL
    /// when it points at YouTube.
    pub async fn fetch_description(
        &self,
        video_id: &str,
        url: Option<&str>,
    ) -> Result<Option<String>, AdapterError> {
        let fallback = format!("https://www.youtube.com/watch?v={video_id}");
        let target = url
            .and_then(|u| reqwest::Url::parse(u).ok())
            .filter(|u| {
                u.host_str()
                    .map(|h| h.contains("youtube.com"))
                    .unwrap_or(false)
            })
            .map(|u| u.to_string())
            .unwrap_or(fallback);

        let response = self
            .client
            .get(&target)
            .send()
            .await
            .map_err(|e| AdapterError::FetchFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AdapterError::FetchFailed(format!(
                "HTTP {} fetching description",
                response.status()
            )));
        }
        let html = response
            .text()
            .await
            .map_err(|e| AdapterError::FetchFailed(e.to_string()))?;
        Ok(extract_description_from_html(&html).map(|d| d.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn parses_json3_events() {
        let data = r#"{"wireMagic":"pb3","events":[
            {"tStartMs":0,"dDurationMs":2000,"segs":[{"utf8":"Hello "},{"utf8":"world"}]},
            {"tStartMs":2500,"aAppend":1},
            {"tStartMs":3000,"dDurationMs":1500,"segs":[{"utf8":"again"}]}
        ]}"#;
        let captions = parse_caption_payload(data).unwrap();
        assert_eq!(captions.len(), 2);
        assert_eq!(captions[0].text, "Hello world");
        assert_eq!(captions[0].start, 0.0);
        assert_eq!(captions[1].start, 3.0);
        assert_eq!(captions[1].duration, 1.5);
    }

    #[test]
    fn parses_transcript_xml() {
        let data = r#"<?xml version="1.0"?><transcript>
            <text start="0.5" dur="2.1">First line</text>
            <text start="2.6" dur="1.0">Second &amp; third</text>
        </transcript>"#;
        let captions = parse_caption_payload(data).unwrap();
        assert_eq!(captions.len(), 2);
        assert_eq!(captions[0].start, 0.5);
        assert_eq!(captions[1].text, "Second & third");
    }

    #[test]
    fn parses_plain_caption_array() {
        let data = r#"[{"start":1.0,"duration":2.0,"text":"hi"}]"#;
        let captions = parse_caption_payload(data).unwrap();
        assert_eq!(captions[0].text, "hi");
    }

    #[test]
    fn rejects_unknown_payloads() {
        assert!(parse_caption_payload("<html>nope</html>").is_err());
    }

    #[test]
    fn flattens_captions_to_text() {
        let captions = vec![
            Caption { start: 0.0, duration: 1.0, text: "one  two".to_string() },
            Caption { start: 1.0, duration: 1.0, text: "   ".to_string() },
            Caption { start: 2.0, duration: 1.0, text: "three".to_string() },
        ];
        assert_eq!(captions_to_text(&captions), "one two three");
    }

    #[test]
    fn clip_preserves_head_and_tail() {
        let text: String = "abcdefghij".chars().cycle().take(9000).collect();
        let clipped = clip_transcript(&text, 3000);
        assert!(clipped.chars().count() <= 3000);
        assert_eq!(clipped.matches("[...]").count(), 2);
        let head: String = text.chars().take(100).collect();
        assert!(clipped.starts_with(&head));
    }

    #[test]
    fn combined_input_respects_total_budget() {
        let caption = "caption word ".repeat(1000);
        let description = "description line\n".repeat(200);
        let (input, metadata) = build_summarization_input(&caption, &description, "vid123");

        assert!(input.starts_with("Video ID: vid123"));
        assert!(input.contains("Description:\n"));
        assert!(input.contains("Transcript:\n"));
        assert!(input.chars().count() <= MAX_TOTAL);
        assert!(metadata.caption_included);
        assert!(metadata.description_included);
        assert!(metadata.caption_truncated);
        assert!(metadata.description_truncated);
    }

    #[test]
    fn short_content_passes_through_untruncated() {
        let (input, metadata) =
            build_summarization_input("a short transcript", "a short description", "v");
        assert!(input.contains("a short transcript"));
        assert!(input.contains("a short description"));
        assert!(!metadata.caption_truncated);
        assert!(!metadata.description_truncated);
        assert!(!metadata.hard_truncated);
    }

    #[test]
    fn caption_only_input_skips_description_section() {
        let (input, metadata) = build_summarization_input("words", "", "v");
        assert!(!input.contains("Description:"));
        assert!(metadata.caption_included);
        assert!(!metadata.description_included);
    }

    #[test]
    fn extracts_description_from_player_response() {
        let html = r#"<script>var ytInitialPlayerResponse = {"videoDetails":
            {"videoId":"v","shortDescription":"A video about things."}};</script>"#;
        assert_eq!(
            extract_description_from_html(html).as_deref(),
            Some("A video about things.")
        );
    }

    #[test]
    fn falls_back_to_meta_description() {
        let html = r#"<meta name="description" content="Fallback &amp; more">"#;
        assert_eq!(
            extract_description_from_html(html).as_deref(),
            Some("Fallback & more")
        );
        assert!(extract_description_from_html("<html></html>").is_none());
    }

    struct FlakyCaptions {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl CaptionSource for FlakyCaptions {
        async fn fetch_captions(
            &self,
            _video_id: &str,
            _tab_id: Option<i64>,
        ) -> Result<CaptionTrack, AdapterError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(CaptionTrack {
                    captions: vec![Caption {
                        start: 0.0,
                        duration: 1.0,
                        text: "ok".to_string(),
                    }],
                    text: None,
                })
            } else {
                Err(AdapterError::FetchFailed("player not ready".to_string()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn caption_retrieval_retries_until_success() {
        let source = FlakyCaptions {
            calls: AtomicU32::new(0),
            succeed_on: 4,
        };
        let track = retrieve_captions(&source, "vid", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(track.resolved_text(), "ok");
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn caption_retrieval_gives_up_after_six_attempts() {
        let source = FlakyCaptions {
            calls: AtomicU32::new(0),
            succeed_on: 100,
        };
        let err = retrieve_captions(&source, "vid", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "fetch_failed");
        assert_eq!(source.calls.load(Ordering::SeqCst), 6);
    }
}
