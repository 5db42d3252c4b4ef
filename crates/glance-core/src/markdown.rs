//! Display formatting for streamed summaries.
//!
//! Model output is lightweight markdown; surfaces render HTML. This is the
//! subset the backends actually emit: headings, bold, italic, flat lists,
//! paragraphs. Applied to every broadcast, so it must tolerate partial
//! (mid-stream) markdown without panicking.

use std::sync::OnceLock;

use regex::Regex;

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// Format summary markdown as display HTML.
pub fn format_summary(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    static H3: OnceLock<Regex> = OnceLock::new();
    static H2: OnceLock<Regex> = OnceLock::new();
    static H1: OnceLock<Regex> = OnceLock::new();
    static BOLD_STAR: OnceLock<Regex> = OnceLock::new();
    static BOLD_UNDER: OnceLock<Regex> = OnceLock::new();
    static ITALIC_STAR: OnceLock<Regex> = OnceLock::new();
    static ITALIC_UNDER: OnceLock<Regex> = OnceLock::new();
    static UL_ITEM: OnceLock<Regex> = OnceLock::new();
    static OL_ITEM: OnceLock<Regex> = OnceLock::new();
    static LI_RUN: OnceLock<Regex> = OnceLock::new();
    static P_HEAD: OnceLock<Regex> = OnceLock::new();
    static HEAD_P: OnceLock<Regex> = OnceLock::new();

    let mut html = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");

    html = re(&H3, r"(?m)^### (.+)$").replace_all(&html, "<h4>$1</h4>").into_owned();
    html = re(&H2, r"(?m)^## (.+)$").replace_all(&html, "<h3>$1</h3>").into_owned();
    html = re(&H1, r"(?m)^# (.+)$").replace_all(&html, "<h2>$1</h2>").into_owned();

    html = re(&BOLD_STAR, r"\*\*(.+?)\*\*")
        .replace_all(&html, "<strong>$1</strong>")
        .into_owned();
    html = re(&BOLD_UNDER, r"__(.+?)__")
        .replace_all(&html, "<strong>$1</strong>")
        .into_owned();

    // Italic text must not start or end with whitespace.
    html = re(&ITALIC_STAR, r"\*(\S.*?\S|\S)\*")
        .replace_all(&html, "<em>$1</em>")
        .into_owned();
    html = re(&ITALIC_UNDER, r"_(\S.*?\S|\S)_")
        .replace_all(&html, "<em>$1</em>")
        .into_owned();

    html = re(&UL_ITEM, r"(?m)^[*\-•] (.+)$")
        .replace_all(&html, "<li>$1</li>")
        .into_owned();
    html = re(&OL_ITEM, r"(?m)^\d+\. (.+)$")
        .replace_all(&html, "<li>$1</li>")
        .into_owned();
    html = re(&LI_RUN, r"((?:<li>.*?</li>\n?)+)")
        .replace_all(&html, "<ul>$1</ul>")
        .into_owned();

    html = html.replace("\n\n", "</p><p>");
    html = html.replace('\n', "<br>");

    if !(html.starts_with("<p>") || html.starts_with("<h") || html.starts_with("<ul>")) {
        html.insert_str(0, "<p>");
    }
    if !(html.ends_with("</p>")
        || html.ends_with("</h2>")
        || html.ends_with("</h3>")
        || html.ends_with("</h4>")
        || html.ends_with("</ul>"))
    {
        html.push_str("</p>");
    }

    html = html.replace("<p></p>", "");
    html = re(&P_HEAD, r"<p>(<h[234]>)").replace_all(&html, "$1").into_owned();
    html = re(&HEAD_P, r"(</h[234]>)</p>").replace_all(&html, "$1").into_owned();
    html = html.replace("<p><ul>", "<ul>");
    html = html.replace("</ul></p>", "</ul>");

    html
}
