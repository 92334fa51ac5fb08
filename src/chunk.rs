//! Stage 3: split extracted documents into bounded-size chunks.
//!
//! Two strategies are available (see [`ChunkStrategy`]):
//!
//! - **heading**: cut on level-2 markdown headings (`\n## `) and restore the
//!   marker on every section after the first. Sections longer than
//!   `max_chars` fall through to the recursive splitter.
//! - **recursive**: find the highest-priority separator present in the text,
//!   greedily pack the pieces up to `max_chars`, and recurse into any piece
//!   that is still too large with the remaining separators. With no
//!   separator left the text is hard-split on char boundaries.
//!
//! Sizes are measured in chars, not bytes. Every emitted chunk is trimmed,
//! non-empty and at most `max_chars` long. Chunks shorter than `min_chars`
//! are dropped by the stage.

use anyhow::Result;

use crate::config::{ChunkStrategy, ChunkingConfig, Config};
use crate::files;
use crate::models::{Outcome, SkipReason, StageReport};
use crate::pipeline::StageOptions;
use crate::progress::{ProgressEvent, ProgressReporter};

const HEADING_MARKER: &str = "\n## ";

/// Split a document into trimmed, non-empty pieces of at most
/// `max_chars` chars. No minimum size is applied.
pub fn split_document(text: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let raw: Vec<String> = match cfg.strategy {
        ChunkStrategy::Heading => text
            .split(HEADING_MARKER)
            .enumerate()
            .flat_map(|(i, section)| {
                let section = if i > 0 {
                    format!("## {}", section)
                } else {
                    section.to_string()
                };
                split_recursive(&section, &cfg.separators, cfg.max_chars)
            })
            .collect(),
        ChunkStrategy::Recursive => split_recursive(text, &cfg.separators, cfg.max_chars),
    };

    raw.into_iter()
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

/// [`split_document`] with chunks below `min_chars` marked as skipped.
pub fn chunk_document(text: &str, cfg: &ChunkingConfig) -> Vec<Outcome<String>> {
    split_document(text, cfg)
        .into_iter()
        .map(|piece| {
            let len = char_len(&piece);
            if len < cfg.min_chars {
                Outcome::Skipped(SkipReason::TooShort {
                    len,
                    min: cfg.min_chars,
                })
            } else {
                Outcome::Done(piece)
            }
        })
        .collect()
}

/// Recursive separator splitter. Pieces are untrimmed.
pub fn split_recursive(text: &str, separators: &[String], max_chars: usize) -> Vec<String> {
    if char_len(text) <= max_chars {
        return vec![text.to_string()];
    }

    let Some(pos) = separators.iter().position(|sep| text.contains(sep.as_str())) else {
        return hard_split(text, max_chars);
    };
    let sep = &separators[pos];
    let rest = &separators[pos + 1..];

    let mut out = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for piece in split_keeping(text, sep) {
        let piece_len = char_len(piece);
        if buf_len + piece_len <= max_chars {
            buf.push_str(piece);
            buf_len += piece_len;
            continue;
        }
        if !buf.is_empty() {
            out.push(std::mem::take(&mut buf));
            buf_len = 0;
        }
        if piece_len > max_chars {
            out.extend(split_recursive(piece, rest, max_chars));
        } else {
            buf.push_str(piece);
            buf_len = piece_len;
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }

    out
}

/// Split `text` at every occurrence of `sep`, keeping the separator.
///
/// Line-leading separators (headings, blank lines) stay with the piece they
/// introduce; inline ones (". ", " ") stay with the piece they terminate.
fn split_keeping<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    if !sep.starts_with('\n') {
        return text.split_inclusive(sep).collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        if idx > start {
            pieces.push(&text[start..idx]);
            start = idx;
        }
    }
    pieces.push(&text[start..]);
    pieces
}

fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Chunk file name: `<stem>_chunk<NNN>.txt`.
pub fn chunk_file_name(stem: &str, index: usize) -> String {
    format!("{}_chunk{:03}.txt", stem, index)
}

pub fn run_chunk(
    config: &Config,
    _opts: &StageOptions,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    let chunks_dir = config.paths.chunks_dir();
    files::ensure_dir(&chunks_dir)?;
    progress.report(ProgressEvent::Starting {
        stage: "chunk".to_string(),
    });

    // Chunks are derived data: drop the previous run's set entirely.
    let mut removed = 0u64;
    for stale in files::list_files_with_ext(&chunks_dir, "txt")? {
        std::fs::remove_file(&stale)?;
        removed += 1;
    }
    if removed > 0 {
        tracing::debug!(removed, "removed stale chunk files");
    }

    let sources = files::list_files_with_ext(&config.paths.extracted_dir(), "md")?;
    let mut report = StageReport::new("chunk");
    let total = sources.len() as u64;

    for (i, source) in sources.iter().enumerate() {
        let stem = files::file_stem(source);
        progress.report(ProgressEvent::Processing {
            stage: "chunk".to_string(),
            n: i as u64 + 1,
            total,
            item: stem.clone(),
        });

        let text = match files::read_lossy(source) {
            Ok(t) => t,
            Err(e) => {
                let reason = SkipReason::Unreadable(e.to_string());
                tracing::warn!(source = %source.display(), %reason, "skipping");
                report.record_skip(&reason);
                continue;
            }
        };

        let mut index = 0usize;
        for outcome in chunk_document(&text, &config.chunking) {
            let piece = match outcome {
                Outcome::Done(piece) => piece,
                Outcome::Skipped(reason) => {
                    report.record_skip(&reason);
                    continue;
                }
            };
            let path = chunks_dir.join(chunk_file_name(&stem, index));
            std::fs::write(&path, piece.as_bytes())?;
            index += 1;
        }

        tracing::info!(source = %stem, chunks = index, "chunked");
        report.written += index as u64;
    }

    report.detail("sources", sources.len());
    Ok(report)
}
