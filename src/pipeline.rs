//! Stage selection and ordered execution.
//!
//! The five stages run in a fixed order and communicate only through the
//! directories under `paths.root`, so any contiguous range can be run on
//! its own:
//!
//! ```text
//! 1 download ─▶ 2 extract ─▶ 3 chunk ─▶ 4 generate ─▶ 5 finalize
//! ```
//!
//! A stage that returns an error stops the run; per-item failures inside a
//! stage are recorded in its [`StageReport`] and never stop the run.

use anyhow::{bail, Context, Result};
use std::fmt;

use crate::config::Config;
use crate::llm::{create_generator, DisabledGenerator, Generator};
use crate::models::StageReport;
use crate::progress::ProgressReporter;
use crate::{chunk, download, extract, finalize, generate};

/// Knobs shared by every stage invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageOptions {
    /// Recompute outputs that already exist.
    pub force: bool,
    /// Generate stage only: process at most this many chunks.
    pub max_chunks: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Download = 1,
    Extract = 2,
    Chunk = 3,
    Generate = 4,
    Finalize = 5,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Download,
        Stage::Extract,
        Stage::Chunk,
        Stage::Generate,
        Stage::Finalize,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Result<Self> {
        match n {
            1 => Ok(Stage::Download),
            2 => Ok(Stage::Extract),
            3 => Ok(Stage::Chunk),
            4 => Ok(Stage::Generate),
            5 => Ok(Stage::Finalize),
            other => bail!("Unknown stage {}. Stages are numbered 1-5.", other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Extract => "extract",
            Stage::Chunk => "chunk",
            Stage::Generate => "generate",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

/// Stages `from..=to` in order.
pub fn stage_range(from: u8, to: u8) -> Result<Vec<Stage>> {
    let (from, to) = (Stage::from_number(from)?, Stage::from_number(to)?);
    if from > to {
        bail!("Invalid stage range: {} comes after {}", from, to);
    }
    Ok(Stage::ALL
        .into_iter()
        .filter(|s| *s >= from && *s <= to)
        .collect())
}

/// Run one stage. The generate stage builds its backend from
/// `[generation]`.
pub async fn run_stage(
    config: &Config,
    stage: Stage,
    opts: &StageOptions,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    let generator = generator_for(config, &[stage])?;
    run_stage_with(config, stage, opts, generator.as_ref(), progress).await
}

/// The configured backend if `stages` includes generate, otherwise the
/// disabled one, so a missing provider never blocks the offline stages.
fn generator_for(config: &Config, stages: &[Stage]) -> Result<Box<dyn Generator>> {
    if stages.contains(&Stage::Generate) {
        create_generator(&config.generation)
    } else {
        Ok(Box::new(DisabledGenerator))
    }
}

/// Run one stage with an explicit generator. Only the generate stage uses
/// it.
pub async fn run_stage_with(
    config: &Config,
    stage: Stage,
    opts: &StageOptions,
    generator: &dyn Generator,
    progress: &dyn ProgressReporter,
) -> Result<StageReport> {
    tracing::info!(stage = stage.name(), force = opts.force, "running stage");
    match stage {
        Stage::Download => download::run_download(config, opts, progress).await,
        Stage::Extract => extract::run_extract(config, opts, progress),
        Stage::Chunk => chunk::run_chunk(config, opts, progress),
        Stage::Generate => generate::run_generate(config, opts, generator, progress).await,
        Stage::Finalize => finalize::run_finalize(config, opts, progress),
    }
}

/// Run stages `from..=to`, handing each report to `on_report` as soon as
/// its stage ends. The first stage error stops the run.
pub async fn run_range(
    config: &Config,
    from: u8,
    to: u8,
    opts: &StageOptions,
    progress: &dyn ProgressReporter,
    on_report: &mut dyn FnMut(&StageReport),
) -> Result<Vec<StageReport>> {
    let stages = stage_range(from, to)?;
    let generator = generator_for(config, &stages)?;
    let mut reports = Vec::with_capacity(stages.len());
    for stage in stages {
        let report = run_stage_with(config, stage, opts, generator.as_ref(), progress)
            .await
            .with_context(|| format!("Stage {} failed", stage))?;
        on_report(&report);
        reports.push(report);
    }
    Ok(reports)
}

pub async fn run_stages_with(
    config: &Config,
    stages: &[Stage],
    opts: &StageOptions,
    generator: &dyn Generator,
    progress: &dyn ProgressReporter,
) -> Result<Vec<StageReport>> {
    let mut reports = Vec::with_capacity(stages.len());
    for stage in stages {
        let report = run_stage_with(config, *stage, opts, generator, progress).await?;
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    #[test]
    fn stage_numbers_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_number(stage.number()).unwrap(), stage);
        }
        assert!(Stage::from_number(0).is_err());
        assert!(Stage::from_number(6).is_err());
        assert_eq!(Stage::Generate.to_string(), "4 (generate)");
    }

    #[test]
    fn ranges_are_inclusive_and_ordered() {
        assert_eq!(
            stage_range(2, 4).unwrap(),
            vec![Stage::Extract, Stage::Chunk, Stage::Generate]
        );
        assert_eq!(stage_range(5, 5).unwrap(), vec![Stage::Finalize]);
        assert_eq!(stage_range(1, 5).unwrap().len(), 5);
        assert!(stage_range(4, 2).is_err());
    }

    #[tokio::test]
    async fn offline_range_runs_without_generator() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.root = tmp.path().join("data");
        config.chunking.min_chars = 10;
        let raw_web = config.paths.raw_web_dir();
        std::fs::create_dir_all(&raw_web).unwrap();
        std::fs::write(
            raw_web.join("guide.md"),
            "# Guide\n\n## GPIO\nThe user LED is on PC13 and is active high.\n",
        )
        .unwrap();

        let mut seen = Vec::new();
        let reports = run_range(
            &config,
            2,
            3,
            &StageOptions::default(),
            &NoProgress,
            &mut |r: &StageReport| seen.push(r.stage.clone()),
        )
        .await
        .unwrap();
        assert_eq!(seen, vec!["extract", "chunk"]);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].stage, "extract");
        assert_eq!(reports[0].written, 1);
        assert_eq!(reports[1].stage, "chunk");
        assert!(reports[1].written >= 1);
        assert!(config
            .paths
            .chunks_dir()
            .join("web_guide_chunk000.txt")
            .exists());
    }

    #[tokio::test]
    async fn generate_with_disabled_provider_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.root = tmp.path().to_path_buf();
        let chunks = config.paths.chunks_dir();
        std::fs::create_dir_all(&chunks).unwrap();
        std::fs::write(chunks.join("doc_chunk000.txt"), "Timers on the F405").unwrap();

        let report = run_stage(&config, Stage::Generate, &StageOptions::default(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.written, 0);
        assert_eq!(report.skipped_of("generation failed"), 1);
        assert_eq!(report.detail_value("generator"), Some("disabled"));
    }
}
