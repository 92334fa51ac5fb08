//! Pipeline statistics.
//!
//! Summarizes what each stage directory holds: item counts, size on disk
//! and last modification, plus the record counts of the final splits. Used
//! by `tuneset stats` to check progress between stage runs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::files;
use crate::finalize::split_file_name;

/// Contents of one stage directory.
#[derive(Debug, Clone)]
pub struct DirStats {
    pub label: &'static str,
    pub path: PathBuf,
    pub items: usize,
    pub bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Record count of one final split file, `None` if it does not exist.
#[derive(Debug, Clone)]
pub struct SplitStats {
    pub split: &'static str,
    pub records: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub dirs: Vec<DirStats>,
    pub splits: Vec<SplitStats>,
}

pub fn collect_stats(config: &Config) -> Result<PipelineStats> {
    let paths = &config.paths;
    let listed: [(&'static str, PathBuf, usize); 6] = [
        (
            "raw pdfs",
            paths.raw_pdfs_dir(),
            files::list_files_with_ext(&paths.raw_pdfs_dir(), "pdf")?.len(),
        ),
        (
            "raw repos",
            paths.raw_repos_dir(),
            files::list_subdirs(&paths.raw_repos_dir())?.len(),
        ),
        (
            "raw web",
            paths.raw_web_dir(),
            files::list_files_with_ext(&paths.raw_web_dir(), "md")?.len(),
        ),
        (
            "extracted",
            paths.extracted_dir(),
            files::list_files_with_ext(&paths.extracted_dir(), "md")?.len(),
        ),
        (
            "chunks",
            paths.chunks_dir(),
            files::list_files_with_ext(&paths.chunks_dir(), "txt")?.len(),
        ),
        (
            "generated",
            paths.generated_dir(),
            files::list_files_with_ext(&paths.generated_dir(), "jsonl")?.len(),
        ),
    ];

    let dirs = listed
        .into_iter()
        .map(|(label, path, items)| {
            let (bytes, last_modified) = disk_usage(&path);
            DirStats {
                label,
                path,
                items,
                bytes,
                last_modified,
            }
        })
        .collect();

    let mut splits = Vec::new();
    for split in ["train", "val", "test"] {
        let path = paths
            .final_dir()
            .join(split_file_name(&config.finalize.prefix, split));
        let records = if path.is_file() {
            let text = files::read_lossy(&path)?;
            Some(text.lines().filter(|l| !l.trim().is_empty()).count())
        } else {
            None
        };
        splits.push(SplitStats { split, records });
    }

    Ok(PipelineStats { dirs, splits })
}

/// Total file size under `dir` and the newest file modification time.
fn disk_usage(dir: &Path) -> (u64, Option<DateTime<Utc>>) {
    let mut bytes = 0;
    let mut newest: Option<DateTime<Utc>> = None;
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        bytes += meta.len();
        if let Ok(modified) = meta.modified() {
            let modified: DateTime<Utc> = modified.into();
            newest = Some(newest.map_or(modified, |n| n.max(modified)));
        }
    }
    (bytes, newest)
}

/// Run the stats command and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let stats = collect_stats(config)?;

    println!("Tuneset Pipeline Stats");
    println!("======================");
    println!();
    println!("  Root:        {}", config.paths.root.display());
    println!();
    println!(
        "  {:<12} {:>8} {:>10}   {}",
        "STAGE DIR", "ITEMS", "SIZE", "LAST MODIFIED"
    );
    println!("  {}", "-".repeat(50));
    for d in &stats.dirs {
        let modified = match d.last_modified {
            Some(ts) => format_ts_relative(ts.timestamp()),
            None => "never".to_string(),
        };
        println!(
            "  {:<12} {:>8} {:>10}   {}",
            d.label,
            d.items,
            format_bytes(d.bytes),
            modified
        );
    }

    println!();
    println!("  Final splits ({}):", config.finalize.prefix);
    for s in &stats.splits {
        match s.records {
            Some(n) => println!("    {:<6} {}", s.split, n),
            None => println!("    {:<6} -", s.split),
        }
    }
    println!();

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" style, falling back to a date after 30 days.
fn format_ts_relative(ts: i64) -> String {
    let delta = Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn counts_stage_outputs_and_split_records() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.root = tmp.path().to_path_buf();

        let chunks = config.paths.chunks_dir();
        std::fs::create_dir_all(&chunks).unwrap();
        std::fs::write(chunks.join("a_chunk000.txt"), "0123456789").unwrap();
        std::fs::write(chunks.join("a_chunk001.txt"), "abc").unwrap();
        let final_dir = config.paths.final_dir();
        std::fs::create_dir_all(&final_dir).unwrap();
        std::fs::write(
            final_dir.join(split_file_name(&config.finalize.prefix, "train")),
            "{}\n{}\n\n",
        )
        .unwrap();

        let stats = collect_stats(&config).unwrap();
        let chunk_stats = stats.dirs.iter().find(|d| d.label == "chunks").unwrap();
        assert_eq!(chunk_stats.items, 2);
        assert_eq!(chunk_stats.bytes, 13);
        assert!(chunk_stats.last_modified.is_some());

        let pdfs = stats.dirs.iter().find(|d| d.label == "raw pdfs").unwrap();
        assert_eq!((pdfs.items, pdfs.bytes), (0, 0));
        assert!(pdfs.last_modified.is_none());

        assert_eq!(stats.splits[0].records, Some(2));
        assert_eq!(stats.splits[1].records, None);
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn recent_timestamps_are_relative() {
        let now = Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
    }
}
