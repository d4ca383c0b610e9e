//! Cleanup of model replies before they reach Telegram.
//!
//! Two strengths: [`strip_headings`] keeps Markdown emphasis and only drops
//! heading marks, [`strip_markdown`] produces plain text and is used when
//! Telegram rejects a reply's Markdown.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Marker a model appends when a reply needs no "full answer" button.
pub const NO_BUTTON_MARKER: &str = "[NO_BUTTON]";

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]*").unwrap());
static BLOCKQUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*>[ \t]?").unwrap());
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*[-*+][ \t]+").unwrap());
static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*\d+[.)][ \t]+").unwrap());
static RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*[-*_]{3,}[ \t]*$").unwrap());
static ROLE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^[ \t]*(assistant|user|system)[ \t]*[:\-][ \t]*").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").unwrap());
static BOLD_STARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\*\*(.+?)\*\*").unwrap());
static BOLD_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)__(.+?)__").unwrap());
static ITALIC_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\*(.+?)\*").unwrap());
static ITALIC_UNDERSCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)_(.+?)_").unwrap());
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static LINE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+").unwrap());
static LOOSE_BOLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*[ \t]*([^*\n]*?)[ \t]*\*\*").unwrap());

/// Reduce Markdown to plain text.
///
/// Fenced code blocks survive untouched. Everything else loses headings,
/// quotes, list marks, rules, `role:` prefixes, inline code ticks and
/// emphasis; runs of blank lines collapse to one.
pub fn strip_markdown(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    // NUL-delimited keys cannot collide with text or emphasis rules.
    let mut blocks: Vec<String> = Vec::new();
    let protected = CODE_FENCE.replace_all(&text, |caps: &Captures| {
        let key = format!("\u{0}CODEBLOCK{}\u{0}", blocks.len());
        blocks.push(caps[0].to_string());
        key
    });

    let mut out = protected.into_owned();
    for (re, rep) in [
        (&*HEADING, ""),
        (&*BLOCKQUOTE, ""),
        (&*BULLET, ""),
        (&*NUMBERED, ""),
        (&*RULE, ""),
        (&*ROLE_PREFIX, ""),
        (&*INLINE_CODE, "$1"),
        (&*BOLD_STARS, "$1"),
        (&*BOLD_UNDERSCORES, "$1"),
        (&*ITALIC_STAR, "$1"),
        (&*ITALIC_UNDERSCORE, "$1"),
    ] {
        out = re.replace_all(&out, rep).into_owned();
    }

    out = out.replace("\\*", "*").replace("\\_", "_").replace("\\`", "`");
    out = BLANK_RUNS.replace_all(&out, "\n\n").into_owned();

    let mut cleaned = out
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    for (i, block) in blocks.iter().enumerate() {
        cleaned = cleaned.replace(&format!("\u{0}CODEBLOCK{}\u{0}", i), block);
    }
    cleaned
}

/// Drop heading marks while keeping the rest of the Markdown.
///
/// `### 1. Kirish` becomes `1. Kirish`; `#hashtag` stays because a heading
/// mark must be followed by whitespace. `** qalin **` is tightened to
/// `**qalin**` so Telegram still renders it.
pub fn strip_headings(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let out = LINE_HEADING.replace_all(text, "");
    let out = out.replace("### ", "").replace("## ", "");
    let out = LOOSE_BOLD.replace_all(&out, "**$1**");
    out.trim().to_string()
}

/// Remove the [`NO_BUTTON_MARKER`]; the flag says whether it was present.
pub fn strip_no_button_marker(text: &str) -> (String, bool) {
    if text.contains(NO_BUTTON_MARKER) {
        (text.replace(NO_BUTTON_MARKER, "").trim().to_string(), true)
    } else {
        (text.to_string(), false)
    }
}
