//! Stage 5: deduplicate, shuffle and split records into the final dataset.
//!
//! Reads every `generated_pairs/*.jsonl`, drops malformed lines and
//! duplicate records (by [`ConversationRecord::content_hash`], first
//! occurrence wins), shuffles, and writes three disjoint JSONL files:
//! `<prefix>_train.jsonl`, `<prefix>_val.jsonl`, `<prefix>_test.jsonl`.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::path::Path;

use crate::config::Config;
use crate::files;
use crate::lenient_json::parse_candidate;
use crate::models::{ConversationRecord, Outcome, SkipReason, StageReport};
use crate::pipeline::StageOptions;
use crate::progress::{ProgressEvent, ProgressReporter};

/// The three output partitions.
#[derive(Debug, Default)]
pub struct Splits {
    pub train: Vec<ConversationRecord>,
    pub val: Vec<ConversationRecord>,
    pub test: Vec<ConversationRecord>,
}

/// Parse every non-empty line of every `*.jsonl` file in `dir`, in file
/// name order.
pub fn load_records(dir: &Path) -> Result<Vec<Outcome<ConversationRecord>>> {
    let mut out = Vec::new();
    for path in files::list_files_with_ext(dir, "jsonl")? {
        let text = files::read_lossy(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            out.push(parse_candidate(line));
        }
    }
    Ok(out)
}

/// Keep the first record of every content hash. Returns the unique records
/// and the number of duplicates removed.
pub fn dedup_records(records: Vec<ConversationRecord>) -> (Vec<ConversationRecord>, usize) {
    let mut seen = HashSet::new();
    let before = records.len();
    let unique: Vec<_> = records
        .into_iter()
        .filter(|r| seen.insert(r.content_hash()))
        .collect();
    let dropped = before - unique.len();
    (unique, dropped)
}

/// Shuffle and cut at `floor(n × train_ratio)` and
/// `floor(n × (train_ratio + val_ratio))`; the remainder is the test split.
pub fn split_records<R: Rng + ?Sized>(
    mut records: Vec<ConversationRecord>,
    train_ratio: f64,
    val_ratio: f64,
    rng: &mut R,
) -> Splits {
    records.shuffle(rng);
    let n = records.len();
    let train_end = ((n as f64 * train_ratio).floor() as usize).min(n);
    let val_end = ((n as f64 * (train_ratio + val_ratio)).floor() as usize).clamp(train_end, n);

    let test = records.split_off(val_end);
    let val = records.split_off(train_end);
    Splits {
        train: records,
        val,
        test,
    }
}

/// Write one JSON record per line.
pub fn write_jsonl(path: &Path, records: &[ConversationRecord]) -> Result<()> {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.to_json_line()?);
        out.push('\n');
    }
    files::write_atomic(path, out.as_bytes())
}

pub fn split_file_name(prefix: &str, split: &str) -> String {
    format!("{}_{}.jsonl", prefix, split)
}

pub fn run_finalize(
    config: &Config,
    _opts: &StageOptions,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    let final_dir = config.paths.final_dir();
    files::ensure_dir(&final_dir)?;
    progress.report(ProgressEvent::Starting {
        stage: "finalize".to_string(),
    });

    let mut report = StageReport::new("finalize");

    let mut records = Vec::new();
    for outcome in load_records(&config.paths.generated_dir())? {
        match outcome {
            Outcome::Done(r) => records.push(r),
            Outcome::Skipped(reason) => {
                tracing::debug!(%reason, "dropped line");
                report.record_skip(&reason);
            }
        }
    }

    let (unique, duplicates) = dedup_records(records);
    for _ in 0..duplicates {
        report.record_skip(&SkipReason::Duplicate);
    }

    let mut rng = match config.finalize.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let splits = split_records(
        unique,
        config.finalize.train_ratio,
        config.finalize.val_ratio,
        &mut rng,
    );

    let prefix = &config.finalize.prefix;
    let outputs = [
        ("train", &splits.train),
        ("val", &splits.val),
        ("test", &splits.test),
    ];
    let total = outputs.len() as u64;
    for (i, (name, records)) in outputs.iter().enumerate() {
        let path = final_dir.join(split_file_name(prefix, name));
        progress.report(ProgressEvent::Processing {
            stage: "finalize".to_string(),
            n: i as u64 + 1,
            total,
            item: files::file_name(&path),
        });
        write_jsonl(&path, records)?;
        tracing::info!(split = name, records = records.len(), path = %path.display(), "wrote split");
        report.written += records.len() as u64;
        report.detail(*name, records.len());
    }

    report.detail("output", final_dir.display());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, Turn};
    use tempfile::TempDir;

    fn record(i: usize) -> ConversationRecord {
        ConversationRecord {
            conversations: vec![
                Turn::new(Role::User, format!("question {}", i)),
                Turn::new(Role::Assistant, format!("answer {}", i)),
            ],
        }
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let records = vec![record(1), record(2), record(1), record(3), record(2)];
        let (unique, dropped) = dedup_records(records);
        assert_eq!(dropped, 2);
        assert_eq!(unique, vec![record(1), record(2), record(3)]);
    }

    #[test]
    fn split_sizes_follow_ratios() {
        let records: Vec<_> = (0..100).map(record).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let splits = split_records(records, 0.90, 0.05, &mut rng);
        assert_eq!(splits.train.len(), 90);
        assert_eq!(splits.val.len(), 5);
        assert_eq!(splits.test.len(), 5);
    }

    #[test]
    fn splits_are_disjoint_and_complete() {
        let records: Vec<_> = (0..37).map(record).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let splits = split_records(records, 0.9, 0.05, &mut rng);
        let mut hashes = HashSet::new();
        for r in splits.train.iter().chain(&splits.val).chain(&splits.test) {
            assert!(hashes.insert(r.content_hash()));
        }
        assert_eq!(hashes.len(), 37);
        assert_eq!(splits.train.len(), 33);
        assert_eq!(splits.val.len(), 1);
        assert_eq!(splits.test.len(), 3);
    }

    #[test]
    fn same_seed_same_order() {
        let a = split_records((0..20).map(record).collect(), 0.5, 0.25, &mut StdRng::seed_from_u64(42));
        let b = split_records((0..20).map(record).collect(), 0.5, 0.25, &mut StdRng::seed_from_u64(42));
        assert_eq!(a.train, b.train);
        assert_eq!(a.test, b.test);
    }

    #[test]
    fn empty_input_gives_empty_splits() {
        let splits = split_records(Vec::new(), 0.9, 0.05, &mut StdRng::seed_from_u64(0));
        assert!(splits.train.is_empty() && splits.val.is_empty() && splits.test.is_empty());
    }

    #[test]
    fn load_skips_blank_and_malformed_lines() {
        let tmp = TempDir::new().unwrap();
        let good = record(1).to_json_line().unwrap();
        std::fs::write(
            tmp.path().join("a_pairs_000.jsonl"),
            format!("{}\n\n   \nnot json\n", good),
        )
        .unwrap();
        std::fs::write(tmp.path().join("ignored.txt"), "x").unwrap();

        let outcomes = load_records(tmp.path()).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_done());
        assert!(!outcomes[1].is_done());
    }

    #[test]
    fn write_jsonl_one_record_per_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(split_file_name("stm32_f405", "train"));
        write_jsonl(&path, &[record(1), record(2)]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let back: ConversationRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(back, record(2));
        assert!(path.ends_with("stm32_f405_train.jsonl"));
    }
}
