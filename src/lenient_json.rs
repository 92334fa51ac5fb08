//! Best-effort extraction of conversation records from model output.
//!
//! Models asked for JSONL rarely comply exactly: they wrap output in
//! markdown fences, add prose, split one object over several lines, or get
//! cut off mid-object. This parser is deliberately **lossy**. It finds
//! every balanced top-level `{ ... }` span, tries to read each as a
//! [`ConversationRecord`], and reports a [`SkipReason`] for each span it
//! rejects. A span that is not valid JSON is rescanned past its opening
//! brace, so a stray `{` in prose does not hide the records after it.
//! Broken JSON is never repaired, and text outside braces is ignored.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{ConversationRecord, Outcome, SkipReason};

/// Instruction line that ends the generation prompt. Backends that echo the
/// prompt return it in front of the completion.
pub const RESPONSE_MARKER: &str = "Output ONLY valid JSONL";

static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```(?:jsonl|json)?").unwrap());

/// Parse every candidate object in `response`.
pub fn extract_records(response: &str) -> Vec<Outcome<ConversationRecord>> {
    let tail = response.rsplit(RESPONSE_MARKER).next().unwrap_or(response);
    let cleaned = FENCE.replace_all(tail, "");
    scan(&cleaned)
}

fn scan(text: &str) -> Vec<Outcome<ConversationRecord>> {
    let mut outcomes = Vec::new();
    for span in object_spans(text) {
        let outcome = parse_candidate(span);
        if matches!(outcome, Outcome::Skipped(SkipReason::InvalidJson(_))) {
            // A stray `{` in prose swallows every object after it. Keep what
            // a scan past that brace recovers, if it recovers anything.
            let inner = scan(&span[1..]);
            if inner.iter().any(|o| o.is_done()) {
                outcomes.extend(inner);
                continue;
            }
        }
        outcomes.push(outcome);
    }
    outcomes
}

/// Byte spans of top-level JSON objects. Quotes and escapes are honoured
/// inside objects only, since surrounding prose may contain stray quotes.
/// An object left open at end of input is returned as-is so the caller can
/// count it as malformed.
pub fn object_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if depth > 0 && in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&text[start..=i]);
                }
            }
            '"' if depth > 0 => in_string = true,
            _ => {}
        }
    }
    if depth > 0 {
        spans.push(&text[start..]);
    }
    spans
}

/// Shallow shape check of one candidate.
pub fn parse_candidate(span: &str) -> Outcome<ConversationRecord> {
    let value: serde_json::Value = match serde_json::from_str(span.trim()) {
        Ok(v) => v,
        Err(e) => return Outcome::Skipped(SkipReason::InvalidJson(e.to_string())),
    };
    let Some(turns) = value.get("conversations").and_then(|c| c.as_array()) else {
        return Outcome::Skipped(SkipReason::MissingConversations);
    };
    if turns.len() < ConversationRecord::MIN_TURNS {
        return Outcome::Skipped(SkipReason::TooFewTurns(turns.len()));
    }
    let record: ConversationRecord = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => return Outcome::Skipped(SkipReason::InvalidTurn(e.to_string())),
    };
    // Echoed prompt templates carry "..." placeholders.
    if record
        .conversations
        .iter()
        .any(|t| matches!(t.value.trim(), "" | "..."))
    {
        return Outcome::Skipped(SkipReason::InvalidTurn(
            "empty or placeholder text".to_string(),
        ));
    }
    Outcome::Done(record)
}
