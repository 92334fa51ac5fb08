//! Stage 4: synthesize conversation records from chunks with a language model.
//!
//! For each chunk file (sorted, optionally limited by `--max-chunks`), the
//! board-aware prompt is sent to the configured [`Generator`], the response
//! is run through the lenient parser, and every accepted record is written
//! to `generated_pairs/<chunk stem>_pairs_<NNN>.jsonl`.
//!
//! A chunk that already has records is skipped unless `force` is set, and
//! its records count toward the stop threshold
//! (`target_pairs × overshoot`), so an interrupted run resumes where it
//! stopped.

use anyhow::Result;
use std::path::Path;

use crate::config::{BoardConfig, Config};
use crate::files;
use crate::lenient_json::{extract_records, RESPONSE_MARKER};
use crate::llm::{GenerationRequest, Generator};
use crate::models::{Outcome, SkipReason, StageReport};
use crate::pipeline::StageOptions;
use crate::progress::{ProgressEvent, ProgressReporter};

pub fn system_prompt(board: &BoardConfig) -> String {
    format!(
        "You are an expert embedded C/C++ engineer specializing in the {name} ({mcu}).\n\
         You know HAL, LL, CMSIS, register-level details, {notes}, common pitfalls, debugging, and best practices.\n\
         Always respond with complete, commented, production-ready code when asked. Include board-specific notes.",
        name = board.name,
        mcu = board.mcu,
        notes = board.notes,
    )
}

/// The per-chunk instruction. The chunk is cut to `max_chunk_chars` chars.
pub fn user_prompt(chunk_text: &str, config: &Config) -> String {
    let excerpt = truncate_chars(chunk_text, config.generation.max_chunk_chars);
    let board = &config.board.name;
    let n = config.generation.pairs_per_chunk;
    format!(
        r#"Here is a document chunk from {board} documentation or examples:

{excerpt}

Generate exactly {n} diverse, realistic multi-turn ShareGPT conversations a developer would have with a coding assistant in their editor while working on this board.
Each conversation must:
- Start with a realistic user question (code generation, explanation, debugging, refactoring, HAL vs LL, board-specific pinout, etc.)
- Have 2-6 turns (user/assistant)
- Include full working code with comments when relevant
- Mention {board} specifics when appropriate
- Cover edge cases, errors, optimizations

{RESPONSE_MARKER}. Each line must be a complete JSON object:
{{"conversations": [{{"from": "system", "value": "..."}}, {{"from": "user", "value": "..."}}, {{"from": "assistant", "value": "..."}}]}}
No extra text, no markdown.
"#
    )
}

/// Longest prefix of `s` with at most `max` chars.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Record file name: `<chunk stem>_pairs_<NNN>.jsonl`.
pub fn pairs_file_name(chunk_stem: &str, index: usize) -> String {
    format!("{}_pairs_{:03}.jsonl", chunk_stem, index)
}

fn pair_files_for(generated_dir: &Path, chunk_stem: &str) -> Result<Vec<std::path::PathBuf>> {
    let prefix = format!("{}_pairs_", chunk_stem);
    Ok(files::list_files_with_ext(generated_dir, "jsonl")?
        .into_iter()
        .filter(|p| files::file_name(p).starts_with(&prefix))
        .collect())
}

pub async fn run_generate(
    config: &Config,
    opts: &StageOptions,
    generator: &dyn Generator,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    let generated_dir = config.paths.generated_dir();
    files::ensure_dir(&generated_dir)?;
    progress.report(ProgressEvent::Starting {
        stage: "generate".to_string(),
    });

    let mut chunk_files = files::list_files_with_ext(&config.paths.chunks_dir(), "txt")?;
    if let Some(max) = opts.max_chunks {
        chunk_files.truncate(max);
    }
    if chunk_files.is_empty() {
        tracing::warn!("no chunk files found; run the chunk stage first");
    }

    let system = system_prompt(&config.board);
    let stop_after = config.generation.stop_after();
    let mut report = StageReport::new("generate");
    let mut total_records = 0usize;
    let total = chunk_files.len() as u64;

    for (i, chunk_file) in chunk_files.iter().enumerate() {
        if total_records >= stop_after {
            tracing::info!(total_records, stop_after, "target reached, stopping");
            break;
        }

        let stem = files::file_stem(chunk_file);
        progress.report(ProgressEvent::Processing {
            stage: "generate".to_string(),
            n: i as u64 + 1,
            total,
            item: stem.clone(),
        });

        let previous = pair_files_for(&generated_dir, &stem)?;
        if !previous.is_empty() {
            if !opts.force {
                tracing::debug!(chunk = %stem, records = previous.len(), "already generated");
                report.existing += previous.len() as u64;
                total_records += previous.len();
                continue;
            }
            for path in &previous {
                std::fs::remove_file(path)?;
            }
        }

        let chunk_text = match files::read_lossy(chunk_file) {
            Ok(t) => t,
            Err(e) => {
                let reason = SkipReason::Unreadable(e.to_string());
                tracing::warn!(chunk = %stem, %reason, "skipping");
                report.record_skip(&reason);
                continue;
            }
        };

        let request = GenerationRequest {
            system: system.clone(),
            prompt: user_prompt(&chunk_text, config),
        };
        let response = match generator.generate(&request).await {
            Ok(r) => r,
            Err(e) => {
                let reason = SkipReason::Generation(e.to_string());
                tracing::warn!(chunk = %stem, %reason, "skipping");
                report.record_skip(&reason);
                continue;
            }
        };

        let mut index = 0usize;
        for outcome in extract_records(&response) {
            match outcome {
                Outcome::Done(record) => {
                    let path = generated_dir.join(pairs_file_name(&stem, index));
                    std::fs::write(&path, format!("{}\n", record.to_json_line()?))?;
                    index += 1;
                }
                Outcome::Skipped(reason) => {
                    tracing::debug!(chunk = %stem, %reason, "dropped candidate");
                    report.record_skip(&reason);
                }
            }
        }

        tracing::info!(chunk = %stem, records = index, "generated");
        report.written += index as u64;
        total_records += index;
    }

    report.detail("generator", generator.name());
    report.detail("chunks", chunk_files.len());
    report.detail("total records", total_records);
    Ok(report)
}
