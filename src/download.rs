//! Stage 1: fetch every configured source into `raw_downloads/`.
//!
//! | Source | Destination |
//! |--------|-------------|
//! | `[sources.pdfs]` name → URL | `raw_downloads/pdfs/<name>.pdf` |
//! | `[sources.repos]` name → git URL | `raw_downloads/repos/<name>/` |
//! | `[sources.web]` name → page URL | `raw_downloads/web/<name>.md` |
//!
//! A destination that already exists is left alone unless the stage runs
//! with `force`. Failures are per-item: the item is skipped, its partial
//! output removed, and the stage continues with the next source.

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::config::{Config, DownloadConfig};
use crate::files;
use crate::html::html_to_text;
use crate::models::{SkipReason, StageReport};
use crate::pipeline::StageOptions;
use crate::progress::{ProgressEvent, ProgressReporter};

/// Placeholder written for pages that yield no readable text.
pub const EMPTY_PAGE_TEXT: &str = "No content";

/// HTTP client carrying the configured user agent and language headers.
pub fn build_client(config: &DownloadConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_str(&config.accept_language)
            .with_context(|| format!("Invalid accept_language: {}", config.accept_language))?,
    );
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Stream `url` into `dest`. The body goes to a `.part` sibling first and is
/// renamed on success; on failure the partial file is removed.
pub async fn download_to_file(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64> {
    let part = files::part_path(dest);
    match stream_to(client, url, &part).await {
        Ok(bytes) => {
            std::fs::rename(&part, dest)
                .with_context(|| format!("Failed to move {} into place", dest.display()))?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&part);
            Err(e)
        }
    }
}

async fn stream_to(client: &reqwest::Client, url: &str, part: &Path) -> Result<u64> {
    let mut response = client.get(url).send().await?.error_for_status()?;
    let mut file = tokio::fs::File::create(part)
        .await
        .with_context(|| format!("Failed to create {}", part.display()))?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Fetch a page and reduce it to readable text.
pub async fn fetch_page_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let html = client.get(url).send().await?.error_for_status()?.text().await?;
    Ok(html_to_text(&html).unwrap_or_else(|| EMPTY_PAGE_TEXT.to_string()))
}

/// `git clone [--depth 1] <url> <dest>`.
pub fn git_clone(url: &str, shallow: bool, dest: &Path) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.arg("clone");
    if shallow {
        cmd.args(["--depth", "1"]);
    }
    cmd.arg(url);
    cmd.arg(dest);
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    let output = cmd
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }

    Ok(())
}

pub async fn run_download(
    config: &Config,
    opts: &StageOptions,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    let pdf_dir = config.paths.raw_pdfs_dir();
    let repo_dir = config.paths.raw_repos_dir();
    let web_dir = config.paths.raw_web_dir();
    for dir in [&pdf_dir, &repo_dir, &web_dir] {
        files::ensure_dir(dir)?;
    }
    progress.report(ProgressEvent::Starting {
        stage: "download".to_string(),
    });

    let sources = &config.sources;
    if sources.is_empty() {
        tracing::warn!("no sources configured");
    }

    let client = build_client(&config.download)?;
    let mut report = StageReport::new("download");
    let total = (sources.pdfs.len() + sources.repos.len() + sources.web.len()) as u64;
    let mut n = 0u64;

    for (name, url) in &sources.pdfs {
        n += 1;
        progress.report(ProgressEvent::Processing {
            stage: "download".to_string(),
            n,
            total,
            item: name.clone(),
        });

        let dest = pdf_dir.join(format!("{}.pdf", name));
        if dest.exists() && !opts.force {
            tracing::debug!(name = %name, "pdf already downloaded");
            report.existing += 1;
            continue;
        }

        match download_to_file(&client, url, &dest).await {
            Ok(bytes) => {
                tracing::info!(name = %name, bytes, "downloaded pdf");
                report.written += 1;
            }
            Err(e) => {
                let reason = SkipReason::Download(format!("{}: {:#}", url, e));
                tracing::warn!(name = %name, %reason, "skipping");
                report.record_skip(&reason);
            }
        }
    }

    for (name, url) in &sources.repos {
        n += 1;
        progress.report(ProgressEvent::Processing {
            stage: "download".to_string(),
            n,
            total,
            item: name.clone(),
        });

        let dest = repo_dir.join(name);
        if dest.exists() {
            if !opts.force {
                tracing::debug!(name = %name, "repo already cloned");
                report.existing += 1;
                continue;
            }
            std::fs::remove_dir_all(&dest)
                .with_context(|| format!("Failed to remove {}", dest.display()))?;
        }

        let (url_owned, dest_owned) = (url.clone(), dest.clone());
        let shallow = config.download.shallow_clone;
        let result = tokio::task::spawn_blocking(move || git_clone(&url_owned, shallow, &dest_owned))
            .await
            .context("git clone task panicked")?;

        match result {
            Ok(()) => {
                tracing::info!(name = %name, shallow, "cloned repo");
                report.written += 1;
            }
            Err(e) => {
                if dest.exists() {
                    let _ = std::fs::remove_dir_all(&dest);
                }
                let reason = SkipReason::Clone(format!("{}: {:#}", url, e));
                tracing::warn!(name = %name, %reason, "skipping");
                report.record_skip(&reason);
            }
        }
    }

    for (name, url) in &sources.web {
        n += 1;
        progress.report(ProgressEvent::Processing {
            stage: "download".to_string(),
            n,
            total,
            item: name.clone(),
        });

        let dest = web_dir.join(format!("{}.md", name));
        if dest.exists() && !opts.force {
            tracing::debug!(name = %name, "page already fetched");
            report.existing += 1;
            continue;
        }

        match fetch_page_text(&client, url).await {
            Ok(text) => {
                files::write_atomic(&dest, text.as_bytes())?;
                tracing::info!(name = %name, chars = text.len(), "fetched page");
                report.written += 1;
            }
            Err(e) => {
                let reason = SkipReason::Download(format!("{}: {:#}", url, e));
                tracing::warn!(name = %name, %reason, "skipping");
                report.record_skip(&reason);
            }
        }
    }

    report.detail("sources", total);
    Ok(report)
}
