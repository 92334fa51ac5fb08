use anyhow::Result;
use std::path::PathBuf;

use crate::config::Config;

/// One configured source and where its raw artifact lands.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub kind: &'static str,
    pub name: String,
    pub url: String,
    pub dest: PathBuf,
}

impl SourceRow {
    pub fn fetched(&self) -> bool {
        self.dest.exists()
    }
}

/// Every source from `[sources]`, pdfs then repos then web pages, each
/// table in name order.
pub fn source_rows(config: &Config) -> Vec<SourceRow> {
    let paths = &config.paths;
    let mut rows = Vec::new();
    for (name, url) in &config.sources.pdfs {
        rows.push(SourceRow {
            kind: "pdf",
            name: name.clone(),
            url: url.clone(),
            dest: paths.raw_pdfs_dir().join(format!("{}.pdf", name)),
        });
    }
    for (name, url) in &config.sources.repos {
        rows.push(SourceRow {
            kind: "repo",
            name: name.clone(),
            url: url.clone(),
            dest: paths.raw_repos_dir().join(name),
        });
    }
    for (name, url) in &config.sources.web {
        rows.push(SourceRow {
            kind: "web",
            name: name.clone(),
            url: url.clone(),
            dest: paths.raw_web_dir().join(format!("{}.md", name)),
        });
    }
    rows
}

pub fn list_sources(config: &Config) -> Result<()> {
    let rows = source_rows(config);
    if rows.is_empty() {
        println!("No sources configured. Add [sources.pdfs], [sources.repos] or [sources.web] to the config.");
        return Ok(());
    }

    println!("{:<6} {:<28} {:<8} URL", "KIND", "NAME", "FETCHED");
    for row in &rows {
        println!(
            "{:<6} {:<28} {:<8} {}",
            row.kind,
            row.name,
            if row.fetched() { "yes" } else { "no" },
            row.url
        );
    }

    for (label, dir) in [
        ("local code", &config.local.code_dir),
        ("local extra", &config.local.extra_dir),
    ] {
        if let Some(dir) = dir {
            let status = if dir.is_dir() { "OK" } else { "MISSING" };
            println!("{:<16} {:<8} {}", label, status, dir.display());
        }
    }

    Ok(())
}
