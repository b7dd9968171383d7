//! Strips lightweight markup from model replies before they are spoken.

use regex::Regex;
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(```|~~~)[^\n]*$").expect("valid regex"));
static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s{0,3}#{1,6}\s*").expect("valid regex"));
static BLOCK_QUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*>+\s?").expect("valid regex"));
static LIST_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*+]|\d+[.)])\s+").expect("valid regex"));
static HORIZONTAL_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*_]\s*){3,}$").expect("valid regex"));
static TABLE_DIVIDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\|?(?:\s*:?-+:?\s*\|)+\s*:?-*:?\s*$").expect("valid regex"));
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\*\*|__|~~)(.+?)(\*\*|__|~~)|\*([^*\n]+)\*|\b_([^_\n]+)_\b").expect("valid regex")
});
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]*)`").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{2,}").expect("valid regex"));

/// Returns `text` with Markdown syntax removed and visible labels kept.
pub fn clean_markdown(text: &str) -> String {
    let text = CODE_FENCE.replace_all(text, "");
    let text = IMAGE.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = HORIZONTAL_RULE.replace_all(&text, "");
    let text = TABLE_DIVIDER.replace_all(&text, "");
    let text = HEADING.replace_all(&text, "");
    let text = BLOCK_QUOTE.replace_all(&text, "");
    let text = LIST_BULLET.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "$2$4$5");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = text.replace('|', " ");
    let text = WHITESPACE.replace_all(&text, " ");

    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    BLANK_LINES
        .replace_all(lines.join("\n").trim(), "\n")
        .into_owned()
}
