//! Reddit thread adapter.
//!
//! Turns a post URL into the public listing-API URL, pulls the thread, and
//! shapes the post plus its top community comments into a summarization
//! prompt.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

use super::SourceContent;
use crate::error::AdapterError;

/// How many top comments go into the prompt.
const COMMENT_LIMIT: usize = 5;
/// Character cap on the post body.
const POST_CHAR_LIMIT: usize = 1500;
/// Character cap on each comment.
const COMMENT_CHAR_LIMIT: usize = 600;

/// A resolved listing-API target.
#[derive(Debug, Clone, PartialEq)]
pub struct RedditApiTarget {
    pub api_url: String,
    pub thread_id: Option<String>,
}

/// Build the listing-API URL for a post link. Accepts `reddit.com/...` post
/// paths (trailing slash and `.json` tolerated) and `redd.it` short links.
/// Returns `None` for anything that is not a post link.
pub fn build_api_url(raw_url: &str) -> Option<RedditApiTarget> {
    let parsed = Url::parse(raw_url).ok()?;
    let hostname = parsed.host_str()?.to_lowercase();

    if hostname == "redd.it" || hostname.ends_with(".redd.it") {
        let slug: String = parsed.path().replace('/', "").trim().to_string();
        if slug.is_empty() {
            return None;
        }
        let api_url = listing_url(&format!("/comments/{slug}"))?;
        return Some(RedditApiTarget {
            api_url,
            thread_id: Some(slug),
        });
    }

    if !hostname.ends_with("reddit.com") {
        return None;
    }

    let mut path = parsed.path().to_string();
    if path.ends_with('/') {
        path.pop();
    }
    if let Some(stripped) = path.strip_suffix(".json") {
        path = stripped.to_string();
    }

    let thread_id = thread_id_from_path(&path)?;
    let api_url = listing_url(&path)?;
    Some(RedditApiTarget {
        api_url,
        thread_id: Some(thread_id),
    })
}

fn listing_url(path: &str) -> Option<String> {
    let mut api = Url::parse("https://www.reddit.com").ok()?;
    api.set_path(&format!("{path}.json"));
    api.query_pairs_mut()
        .append_pair("limit", "40")
        .append_pair("depth", "2")
        .append_pair("raw_json", "1");
    Some(api.to_string())
}

fn thread_id_from_path(path: &str) -> Option<String> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if segment == "comments" {
            let id = segments.next()?;
            if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Some(id.to_string());
            }
            return None;
        }
    }
    None
}

/// A parsed thread: the post plus its strongest comments.
#[derive(Debug, Clone)]
pub struct RedditThread {
    pub title: String,
    pub subreddit: String,
    pub author: String,
    pub score: i64,
    pub selftext: String,
    pub is_self: bool,
    pub post_url: String,
    pub comment_count: usize,
    pub comments: Vec<RedditComment>,
}

#[derive(Debug, Clone)]
pub struct RedditComment {
    pub author: String,
    pub score: i64,
    pub body: String,
}

/// Collapse listing markup into plain prompt text.
fn normalize_text(text: &str) -> String {
    static LINKS: OnceLock<Regex> = OnceLock::new();
    static RUNS: OnceLock<Regex> = OnceLock::new();

    let text = text.replace("\r\n", "\n");
    let text = RUNS
        .get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
        .replace_all(&text, "\n\n");
    let text = LINKS
        .get_or_init(|| Regex::new(r"\[(.*?)\]\((https?://[^\s)]+)\)").expect("static regex"))
        .replace_all(&text, "$1 ($2)");
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .trim()
        .to_string()
}

fn truncate(text: &str, max_len: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return text.to_string();
    }
    let cut: String = chars[..max_len - 1].iter().collect();
    format!("{}\u{2026}", cut.trim_end())
}

/// Extract the thread from a listing response (`[post listing, comment
/// listing]`). `None` when the shape is not a post thread.
pub fn extract_thread(json: &Value) -> Option<RedditThread> {
    let listing = json.as_array()?;
    let post = listing
        .first()?
        .pointer("/data/children")?
        .as_array()?
        .iter()
        .find(|child| child.get("kind").and_then(Value::as_str) == Some("t3"))?;
    let data = post.get("data")?;

    let selftext = truncate(
        &normalize_text(data.get("selftext").and_then(Value::as_str).unwrap_or("")),
        POST_CHAR_LIMIT,
    );
    let comment_children = listing
        .get(1)
        .and_then(|l| l.pointer("/data/children"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let comments = select_top_comments(&comment_children, COMMENT_LIMIT);

    let title = data
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled Reddit Post")
        .to_string();
    let post_url = data
        .get("url_overridden_by_dest")
        .or_else(|| data.get("url"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    Some(RedditThread {
        title,
        subreddit: data
            .get("subreddit")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        author: data
            .get("author")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        score: data.get("score").and_then(Value::as_i64).unwrap_or(0),
        selftext,
        is_self: data.get("is_self").and_then(Value::as_bool).unwrap_or(false),
        post_url,
        comment_count: data
            .get("num_comments")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(comment_children.len()),
        comments,
    })
}

/// Highest-scoring readable comments, deleted/removed skipped.
fn select_top_comments(children: &[Value], limit: usize) -> Vec<RedditComment> {
    let mut comments: Vec<RedditComment> = children
        .iter()
        .filter(|child| child.get("kind").and_then(Value::as_str) == Some("t1"))
        .filter_map(|child| {
            let data = child.get("data")?;
            let body = data.get("body").and_then(Value::as_str)?;
            if body.is_empty() || body == "[deleted]" || body == "[removed]" {
                return None;
            }
            let body = truncate(&normalize_text(body), COMMENT_CHAR_LIMIT);
            if body.is_empty() {
                return None;
            }
            Some(RedditComment {
                author: data
                    .get("author")
                    .and_then(Value::as_str)
                    .filter(|a| !a.is_empty())
                    .unwrap_or("unknown")
                    .to_string(),
                score: data.get("score").and_then(Value::as_i64).unwrap_or(0),
                body,
            })
        })
        .collect();

    comments.sort_by(|a, b| b.score.cmp(&a.score));
    comments.truncate(limit);
    comments
}

/// Assemble the prompt handed to the engine.
pub fn build_summary_input(thread: &RedditThread) -> String {
    let mut sections = Vec::new();
    sections.push(
        "Summarize the following Reddit thread, focusing on the main viewpoints, consensus, \
         and disagreements voiced in the top community comments."
            .to_string(),
    );
    sections.push(format!("Thread title: {}", thread.title));

    let mut meta = Vec::new();
    if !thread.subreddit.is_empty() {
        meta.push(format!("Subreddit: r/{}", thread.subreddit));
    }
    if !thread.author.is_empty() {
        meta.push(format!("Author: u/{}", thread.author));
    }
    meta.push(format!("Upvotes: {}", thread.score));
    meta.push(format!(
        "Comments analyzed: {}/{}",
        thread.comments.len(),
        thread.comment_count
    ));
    sections.push(meta.join(" | "));

    if !thread.selftext.is_empty() {
        sections.push("Original post:".to_string());
        sections.push(thread.selftext.clone());
    } else if !thread.is_self && !thread.post_url.is_empty() {
        sections.push(format!("Original post links to: {}", thread.post_url));
    }

    if thread.comments.is_empty() {
        sections.push("Top community comments: None available.".to_string());
    } else {
        sections.push("Top community comments:".to_string());
        for (index, comment) in thread.comments.iter().enumerate() {
            sections.push(format!(
                "{}. u/{} ({} upvotes)\n{}",
                index + 1,
                comment.author,
                comment.score,
                comment.body
            ));
        }
    }

    sections.join("\n\n")
}

/// Fetches and shapes Reddit threads.
#[derive(Clone, Default)]
pub struct RedditAdapter {
    client: reqwest::Client,
}

impl RedditAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a post thread as engine input.
    pub async fn fetch(&self, url: &str) -> Result<SourceContent, AdapterError> {
        let target = build_api_url(url)
            .ok_or_else(|| AdapterError::NotFound("Not a Reddit post link.".to_string()))?;
        debug!(api_url = %target.api_url, "Fetching Reddit thread");

        let response = self
            .client
            .get(&target.api_url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AdapterError::FetchFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AdapterError::FetchFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let json: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::FetchFailed(e.to_string()))?;

        let thread = extract_thread(&json).ok_or_else(|| {
            AdapterError::ParseFailed("Unable to parse Reddit discussion.".to_string())
        })?;

        Ok(SourceContent {
            title: format!("Reddit: {}", thread.title),
            text: build_summary_input(&thread),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builds_api_url_for_post_links() {
        let target =
            build_api_url("https://www.reddit.com/r/rust/comments/abc123/some_title/").unwrap();
        assert_eq!(
            target.api_url,
            "https://www.reddit.com/r/rust/comments/abc123/some_title.json?limit=40&depth=2&raw_json=1"
        );
        assert_eq!(target.thread_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn tolerates_json_suffix_and_short_links() {
        let target =
            build_api_url("https://old.reddit.com/r/rust/comments/abc123/some_title.json").unwrap();
        assert!(target.api_url.ends_with("some_title.json?limit=40&depth=2&raw_json=1"));

        let short = build_api_url("https://redd.it/abc123").unwrap();
        assert_eq!(
            short.api_url,
            "https://www.reddit.com/comments/abc123.json?limit=40&depth=2&raw_json=1"
        );
        assert_eq!(short.thread_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn rejects_non_post_links() {
        assert!(build_api_url("https://www.reddit.com/r/rust/").is_none());
        assert!(build_api_url("https://example.com/comments/abc123").is_none());
        assert!(build_api_url("not a url").is_none());
    }

    fn listing_fixture() -> Value {
        json!([
            {"data": {"children": [
                {"kind": "t3", "data": {
                    "title": "Is Rust worth learning?",
                    "subreddit": "rust",
                    "author": "ferris",
                    "score": 420,
                    "selftext": "I keep hearing about it.\n\n\n\nShould I bother? [docs](https://doc.rust-lang.org/book)",
                    "is_self": true,
                    "num_comments": 3
                }}
            ]}},
            {"data": {"children": [
                {"kind": "t1", "data": {"author": "a", "score": 5, "body": "Yes, absolutely."}},
                {"kind": "t1", "data": {"author": "b", "score": 50, "body": "[deleted]"}},
                {"kind": "t1", "data": {"author": "c", "score": 12, "body": "The borrow checker takes time &amp; patience."}},
                {"kind": "more", "data": {}}
            ]}}
        ])
    }

    #[test]
    fn extracts_thread_and_ranks_comments() {
        let thread = extract_thread(&listing_fixture()).unwrap();
        assert_eq!(thread.title, "Is Rust worth learning?");
        assert_eq!(thread.comment_count, 3);
        // Deleted comment dropped, remainder sorted by score.
        assert_eq!(thread.comments.len(), 2);
        assert_eq!(thread.comments[0].author, "c");
        assert_eq!(
            thread.comments[0].body,
            "The borrow checker takes time & patience."
        );
        assert_eq!(thread.comments[1].author, "a");
        // Markdown link flattened, blank-line runs collapsed.
        assert!(thread.selftext.contains("docs (https://doc.rust-lang.org/book)"));
        assert!(!thread.selftext.contains("\n\n\n"));
    }

    #[test]
    fn builds_prompt_sections() {
        let thread = extract_thread(&listing_fixture()).unwrap();
        let input = build_summary_input(&thread);
        assert!(input.starts_with("Summarize the following Reddit thread"));
        assert!(input.contains("Thread title: Is Rust worth learning?"));
        assert!(input.contains("Subreddit: r/rust | Author: u/ferris | Upvotes: 420"));
        assert!(input.contains("Comments analyzed: 2/3"));
        assert!(input.contains("1. u/c (12 upvotes)"));
    }

    #[test]
    fn link_post_without_body_points_at_target() {
        let json = json!([
            {"data": {"children": [
                {"kind": "t3", "data": {
                    "title": "Neat article",
                    "score": 1,
                    "is_self": false,
                    "url": "https://example.com/article"
                }}
            ]}},
            {"data": {"children": []}}
        ]);
        let thread = extract_thread(&json).unwrap();
        let input = build_summary_input(&thread);
        assert!(input.contains("Original post links to: https://example.com/article"));
        assert!(input.contains("Top community comments: None available."));
    }

    #[test]
    fn truncates_long_bodies_with_ellipsis() {
        let long = "x".repeat(2000);
        let cut = truncate(&long, POST_CHAR_LIMIT);
        assert_eq!(cut.chars().count(), POST_CHAR_LIMIT);
        assert!(cut.ends_with('\u{2026}'));
    }
}
