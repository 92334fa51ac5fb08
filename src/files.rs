//! Filesystem helpers shared by the stages.
//!
//! Stages communicate only through directories of files, so listing,
//! naming and writing are centralized here to keep the naming conventions
//! (`<stem>.md`, `<stem>_chunk000.txt`, ...) consistent.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

/// Files directly inside `dir` whose extension equals `ext`, sorted by name.
///
/// A missing directory yields an empty list.
pub fn list_files_with_ext(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && has_ext(&path, ext) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Immediate subdirectories of `dir`, sorted by name.
pub fn list_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

pub fn has_ext(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Read a file as UTF-8, replacing invalid sequences.
pub fn read_lossy(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write `contents` via a sibling `.part` file and rename into place, so an
/// interrupted run never leaves a file that passes the "already exists" check.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = part_path(path);
    std::fs::write(&tmp, contents)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lists_only_matching_files_sorted() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.pdf"), b"x").unwrap();
        std::fs::write(tmp.path().join("a.PDF"), b"x").unwrap();
        std::fs::write(tmp.path().join("c.txt"), b"x").unwrap();
        std::fs::create_dir(tmp.path().join("d.pdf")).unwrap();

        let files = list_files_with_ext(tmp.path(), "pdf").unwrap();
        let names: Vec<_> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);
    }

    #[test]
    fn missing_dir_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        assert!(list_files_with_ext(&missing, "md").unwrap().is_empty());
        assert!(list_subdirs(&missing).unwrap().is_empty());
    }

    #[test]
    fn write_atomic_leaves_no_part_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.md");
        write_atomic(&target, b"hello").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
        assert!(!part_path(&target).exists());
    }

    #[test]
    fn read_lossy_tolerates_invalid_utf8() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bin.c");
        std::fs::write(&path, [b'o', b'k', 0xff, b'!']).unwrap();
        let text = read_lossy(&path).unwrap();
        assert!(text.starts_with("ok"));
        assert!(text.ends_with('!'));
    }
}
