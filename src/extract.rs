//! Stage 2: convert every raw source into a markdown/text file.
//!
//! | Input | Output |
//! |-------|--------|
//! | `raw_downloads/pdfs/<stem>.pdf` | `extracted/<stem>.md` |
//! | `raw_downloads/repos/<name>/` | `extracted/<name>_code.md` |
//! | `raw_downloads/web/**` | `extracted/web_<stem>.md` |
//! | `local.code_dir/**` | `extracted/mycode_<stem>.md` |
//! | `local.extra_dir/**` | `extracted/extra_<stem>.md` |
//!
//! Existing outputs are kept unless the stage runs with `force`.

use anyhow::Result;
use globset::GlobSet;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::files;
use crate::models::{Outcome, SkipReason, StageReport};
use crate::pipeline::StageOptions;
use crate::progress::{ProgressEvent, ProgressReporter};

/// Loose-file suffixes picked up from the web and local folders.
const TEXT_EXTENSIONS: &[&str] = &["md", "txt", "c", "h"];

/// Extraction error for a single binary document.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("PDF contains no extractable text")]
    EmptyPdf,
}

/// Extract plain text from PDF bytes. Pages are separated by blank lines.
pub fn pdf_to_text(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs instead of returning Err.
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    }))
    .map_err(|_| ExtractError::Pdf("parser panicked".to_string()))?;

    let text = result.map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let text = text.replace('\u{c}', "\n\n");
    let text = text.trim();
    if text.is_empty() {
        return Err(ExtractError::EmptyPdf);
    }
    Ok(text.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Pdf,
    Repo,
    Text,
}

#[derive(Debug, Clone)]
struct ExtractJob {
    input: PathBuf,
    output: PathBuf,
    kind: JobKind,
}

pub fn run_extract(
    config: &Config,
    opts: &StageOptions,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    let out_dir = config.paths.extracted_dir();
    files::ensure_dir(&out_dir)?;
    progress.report(ProgressEvent::Starting {
        stage: "extract".to_string(),
    });

    let (jobs, collisions) = collect_jobs(config, &out_dir)?;
    let include = files::build_globset(&config.extract.repo_include_globs)?;
    let exclude = files::build_globset(&config.extract.repo_exclude_globs)?;

    let mut report = StageReport::new("extract");
    for (job, winner) in &collisions {
        let reason = SkipReason::OutputCollision(winner.display().to_string());
        tracing::warn!(input = %job.input.display(), %reason, "skipping");
        report.record_skip(&reason);
    }
    let total = jobs.len() as u64;

    for (i, job) in jobs.iter().enumerate() {
        progress.report(ProgressEvent::Processing {
            stage: "extract".to_string(),
            n: i as u64 + 1,
            total,
            item: files::file_name(&job.input),
        });

        if job.output.exists() && !opts.force {
            tracing::debug!(output = %job.output.display(), "already extracted");
            report.existing += 1;
            continue;
        }

        let outcome = match job.kind {
            JobKind::Pdf => extract_pdf_file(&job.input),
            JobKind::Repo => Outcome::Done(repo_to_markdown(&job.input, &include, &exclude)),
            JobKind::Text => text_file_to_markdown(&job.input),
        };

        match outcome {
            Outcome::Done(text) => {
                files::write_atomic(&job.output, text.as_bytes())?;
                tracing::info!(
                    input = %job.input.display(),
                    chars = text.len(),
                    "extracted"
                );
                report.written += 1;
            }
            Outcome::Skipped(reason) => {
                tracing::warn!(input = %job.input.display(), %reason, "skipping");
                report.record_skip(&reason);
            }
        }
    }

    Ok(report)
}

/// Jobs in processing order, plus the jobs whose output name was already
/// claimed by an earlier input (paired with that input).
fn collect_jobs(
    config: &Config,
    out_dir: &Path,
) -> Result<(Vec<ExtractJob>, Vec<(ExtractJob, PathBuf)>)> {
    let mut jobs = Vec::new();

    for pdf in files::list_files_with_ext(&config.paths.raw_pdfs_dir(), "pdf")? {
        let output = out_dir.join(format!("{}.md", files::file_stem(&pdf)));
        jobs.push(ExtractJob {
            input: pdf,
            output,
            kind: JobKind::Pdf,
        });
    }

    for repo in files::list_subdirs(&config.paths.raw_repos_dir())? {
        let output = out_dir.join(format!("{}_code.md", files::file_name(&repo)));
        jobs.push(ExtractJob {
            input: repo,
            output,
            kind: JobKind::Repo,
        });
    }

    let loose_dirs: [(Option<PathBuf>, &str); 3] = [
        (Some(config.paths.raw_web_dir()), "web_"),
        (config.local.code_dir.clone(), "mycode_"),
        (config.local.extra_dir.clone(), "extra_"),
    ];
    for (dir, prefix) in loose_dirs {
        let Some(dir) = dir else { continue };
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let kind = if files::has_ext(path, "pdf") {
                JobKind::Pdf
            } else if TEXT_EXTENSIONS.iter().any(|ext| files::has_ext(path, ext)) {
                JobKind::Text
            } else {
                continue;
            };
            let output = out_dir.join(format!("{}{}.md", prefix, files::file_stem(path)));
            jobs.push(ExtractJob {
                input: path.to_path_buf(),
                output,
                kind,
            });
        }
    }

    // Two inputs with the same stem map to one output; the first one wins.
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut kept = Vec::new();
    let mut collisions = Vec::new();
    for job in jobs {
        match claimed.get(&job.output) {
            Some(winner) => {
                let winner = winner.clone();
                collisions.push((job, winner));
            }
            None => {
                claimed.insert(job.output.clone(), job.input.clone());
                kept.push(job);
            }
        }
    }

    Ok((kept, collisions))
}

fn extract_pdf_file(path: &Path) -> Outcome<String> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => return Outcome::Skipped(SkipReason::Unreadable(e.to_string())),
    };
    match pdf_to_text(&bytes) {
        Ok(text) => Outcome::Done(text),
        Err(e) => Outcome::Skipped(SkipReason::Extraction(e.to_string())),
    }
}

fn text_file_to_markdown(path: &Path) -> Outcome<String> {
    let text = match files::read_lossy(path) {
        Ok(t) => t,
        Err(e) => return Outcome::Skipped(SkipReason::Unreadable(e.to_string())),
    };
    if files::has_ext(path, "c") || files::has_ext(path, "h") {
        Outcome::Done(format!(
            "### File: {}\n```c\n{}\n```",
            files::file_name(path),
            text
        ))
    } else {
        Outcome::Done(text)
    }
}

/// Flatten the matching files of a repository into one markdown document:
/// one `### File: <relative path>` section with a fenced block per file.
pub fn repo_to_markdown(repo: &Path, include: &GlobSet, exclude: &GlobSet) -> String {
    let mut sections = Vec::new();

    let walker = WalkDir::new(repo)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "walk error");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(repo).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }

        let content = match files::read_lossy(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(file = %rel_str, error = %e, "unreadable, skipping");
                continue;
            }
        };
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();

        sections.push(format!(
            "### File: {}\n```{}\n{}\n```\n",
            rel_str, ext, content
        ));
    }

    sections.join("\n")
}
