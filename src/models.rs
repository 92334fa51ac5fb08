//! Core data models shared by the pipeline stages.
//!
//! Conversation records use the ShareGPT layout
//! (`{"conversations": [{"from": "user", "value": "..."}]}`), which is what
//! downstream fine-tuning tooling consumes directly.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Speaker of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[serde(alias = "human")]
    User,
    #[serde(alias = "gpt")]
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub from: Role,
    pub value: String,
}

impl Turn {
    pub fn new(from: Role, value: impl Into<String>) -> Self {
        Self {
            from,
            value: value.into(),
        }
    }
}

/// A synthesized multi-turn exchange, the unit of training data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversations: Vec<Turn>,
}

impl ConversationRecord {
    /// Minimum number of turns for a record to be usable.
    pub const MIN_TURNS: usize = 2;

    /// SHA-256 over the canonical JSON of the turn sequence.
    ///
    /// Two records with the same turns in the same order hash equal.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_string(&self.conversations).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Why an item was dropped instead of written.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkipReason {
    #[error("download failed: {0}")]
    Download(String),
    #[error("clone failed: {0}")]
    Clone(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("unreadable file: {0}")]
    Unreadable(String),
    #[error("output name already taken by {0}")]
    OutputCollision(String),
    #[error("chunk shorter than {min} chars ({len})")]
    TooShort { len: usize, min: usize },
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("missing conversations array")]
    MissingConversations,
    #[error("too few turns ({0})")]
    TooFewTurns(usize),
    #[error("invalid turn: {0}")]
    InvalidTurn(String),
    #[error("duplicate record")]
    Duplicate,
}

impl SkipReason {
    /// Stable label used to tally skips in a [`StageReport`].
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::Download(_) => "download failed",
            SkipReason::Clone(_) => "clone failed",
            SkipReason::Extraction(_) => "extraction failed",
            SkipReason::Unreadable(_) => "unreadable file",
            SkipReason::OutputCollision(_) => "output collision",
            SkipReason::TooShort { .. } => "too short",
            SkipReason::Generation(_) => "generation failed",
            SkipReason::InvalidJson(_) => "invalid json",
            SkipReason::MissingConversations => "missing conversations",
            SkipReason::TooFewTurns(_) => "too few turns",
            SkipReason::InvalidTurn(_) => "invalid turn",
            SkipReason::Duplicate => "duplicate",
        }
    }
}

/// Result of processing one item: either it produced a value or it was
/// skipped for a stated reason.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            Outcome::Skipped(_) => None,
        }
    }
}

/// Counters reported at the end of a stage.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub stage: String,
    /// Outputs produced in this run.
    pub written: u64,
    /// Outputs left untouched because they already existed.
    pub existing: u64,
    /// Skip tally keyed by [`SkipReason::kind`].
    pub skipped: BTreeMap<&'static str, u64>,
    /// Extra stage-specific lines (e.g. split sizes).
    pub details: Vec<(String, String)>,
}

impl StageReport {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            ..Default::default()
        }
    }

    pub fn record_skip(&mut self, reason: &SkipReason) {
        *self.skipped.entry(reason.kind()).or_insert(0) += 1;
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn skipped_of(&self, kind: &str) -> u64 {
        self.skipped.get(kind).copied().unwrap_or(0)
    }

    pub fn detail(&mut self, key: impl Into<String>, value: impl ToString) {
        self.details.push((key.into(), value.to_string()));
    }

    pub fn detail_value(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Print the summary block on stdout.
    pub fn print(&self) {
        println!("{}", self.stage);
        println!("  written: {}", self.written);
        println!("  existing: {}", self.existing);
        println!("  skipped: {}", self.skipped_total());
        for (kind, count) in &self.skipped {
            println!("    {}: {}", kind, count);
        }
        for (key, value) in &self.details {
            println!("  {}: {}", key, value);
        }
        println!("ok");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(turns: &[(Role, &str)]) -> ConversationRecord {
        ConversationRecord {
            conversations: turns.iter().map(|(r, v)| Turn::new(*r, *v)).collect(),
        }
    }

    #[test]
    fn roles_accept_sharegpt_aliases() {
        let json = r#"{"conversations":[{"from":"human","value":"hi"},{"from":"gpt","value":"hello"}]}"#;
        let rec: ConversationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.conversations[0].from, Role::User);
        assert_eq!(rec.conversations[1].from, Role::Assistant);
        let line = rec.to_json_line().unwrap();
        assert!(line.contains(r#""from":"user""#));
        assert!(line.contains(r#""from":"assistant""#));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let json = r#"{"conversations":[{"from":"robot","value":"beep"}]}"#;
        assert!(serde_json::from_str::<ConversationRecord>(json).is_err());
    }

    #[test]
    fn content_hash_depends_on_order_and_text() {
        let a = record(&[(Role::User, "q"), (Role::Assistant, "a")]);
        let b = record(&[(Role::User, "q"), (Role::Assistant, "a")]);
        let c = record(&[(Role::Assistant, "a"), (Role::User, "q")]);
        let d = record(&[(Role::User, "q"), (Role::Assistant, "b")]);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        assert_ne!(a.content_hash(), d.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn report_tallies_skips_by_kind() {
        let mut report = StageReport::new("generate");
        report.record_skip(&SkipReason::InvalidJson("eof".into()));
        report.record_skip(&SkipReason::InvalidJson("trailing".into()));
        report.record_skip(&SkipReason::TooFewTurns(1));
        assert_eq!(report.skipped_total(), 3);
        assert_eq!(report.skipped_of("invalid json"), 2);
        assert_eq!(report.skipped_of("too few turns"), 1);
        assert_eq!(report.skipped_of("duplicate"), 0);
    }

    #[test]
    fn outcome_done_extracts_value() {
        let ok: Outcome<u8> = Outcome::Done(3);
        let skipped: Outcome<u8> = Outcome::Skipped(SkipReason::Duplicate);
        assert!(ok.is_done());
        assert_eq!(ok.done(), Some(3));
        assert_eq!(skipped.done(), None);
    }
}
