//! Readable-text extraction from scraped HTML pages.
//!
//! Keeps the main article body, turns headings into markdown `#` markers
//! (so the heading chunker can split on them), renders table rows as
//! pipe-separated lines and drops navigation chrome. This is a heuristic
//! cleaner, not an HTML parser: malformed markup degrades to "all text".

use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Elements whose content is never useful as training text.
const DROPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "svg", "form", "aside", "iframe",
];

static DROPPED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DROPPED_ELEMENTS
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).unwrap())
        .collect()
});

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static MAIN_BODY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["article", "main"]
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*)</{tag}\s*>")).unwrap())
        .collect()
});
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]\s*>").unwrap());
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<li\b[^>]*>").unwrap());
static CELL_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</t[dh]\s*>").unwrap());
static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</?(p|div|li|ul|ol|section|pre|blockquote|table|tr|thead|tbody|dl|dt|dd)\b[^>]*>")
        .unwrap()
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#([xX][0-9a-fA-F]+|[0-9]+)|(nbsp|lt|gt|quot|apos|amp));").unwrap()
});
static INLINE_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Extract readable text from an HTML document. Returns `None` when the
/// page has no visible text.
pub fn html_to_text(html: &str) -> Option<String> {
    let mut doc = COMMENT.replace_all(html, "").into_owned();
    for re in DROPPED.iter() {
        doc = re.replace_all(&doc, "").into_owned();
    }

    if let Some(body) = MAIN_BODY
        .iter()
        .find_map(|re| re.captures(&doc).map(|c| c[1].to_string()))
    {
        doc = body;
    }

    let doc = HEADING.replace_all(&doc, |caps: &Captures| {
        let level: usize = caps[1].parse().unwrap_or(2);
        let inner = TAG.replace_all(&caps[2], "");
        format!("\n\n{} {}\n\n", "#".repeat(level), inner.trim())
    });
    let doc = LIST_ITEM.replace_all(&doc, "\n- ");
    let doc = CELL_END.replace_all(&doc, " | ");
    let doc = LINE_BREAK.replace_all(&doc, "\n");
    let doc = TAG.replace_all(&doc, "");
    let doc = decode_entities(&doc);

    let lines: Vec<String> = doc
        .lines()
        .map(|line| {
            INLINE_SPACE
                .replace_all(line, " ")
                .trim()
                .trim_end_matches(['|', ' '])
                .to_string()
        })
        .collect();
    let text = BLANK_RUN.replace_all(&lines.join("\n"), "\n\n").trim().to_string();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Single pass, so decoded text is never decoded again.
fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            if let Some(raw) = caps.get(1) {
                let raw = raw.as_str();
                let code = match raw.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => raw.parse::<u32>().ok(),
                };
                return code
                    .and_then(char::from_u32)
                    .map(|c| c.to_string())
                    .unwrap_or_default();
            }
            match &caps[2] {
                "nbsp" => " ",
                "lt" => "<",
                "gt" => ">",
                "quot" => "\"",
                "apos" => "'",
                _ => "&",
            }
            .to_string()
        })
        .into_owned()
}
