//! # tuneset CLI
//!
//! The `tuneset` binary runs the dataset pipeline one stage at a time or as
//! a range, and inspects its state.
//!
//! ## Usage
//!
//! ```bash
//! tuneset --config ./config/tuneset.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tuneset download` | Stage 1: fetch PDFs, clone repos, scrape web pages |
//! | `tuneset extract` | Stage 2: convert raw sources to markdown |
//! | `tuneset chunk` | Stage 3: split markdown into chunks |
//! | `tuneset generate` | Stage 4: synthesize conversations from chunks |
//! | `tuneset finalize` | Stage 5: dedup, shuffle and split the dataset |
//! | `tuneset run` | Run a range of stages in order |
//! | `tuneset stage <N>` | Run stage N (1-5) |
//! | `tuneset sources` | List configured sources and whether they are fetched |
//! | `tuneset stats` | Show per-stage file counts and final split sizes |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tuneset::config;
use tuneset::pipeline::{self, Stage, StageOptions};
use tuneset::progress::ProgressMode;
use tuneset::{sources, stats};

/// tuneset: build a fine-tuning dataset for an embedded board from its
/// documentation and example code.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tuneset.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tuneset",
    about = "Offline pipeline that turns board documentation into a fine-tuning dataset",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tuneset.toml")]
    config: PathBuf,

    /// Stage progress on stderr: off, human or json. Defaults to human
    /// when stderr is a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by the single-stage commands.
#[derive(Args, Clone, Copy)]
struct StageFlags {
    /// Recompute outputs that already exist.
    #[arg(long)]
    force: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage 1: download PDFs, clone repositories and scrape web pages.
    Download(StageFlags),

    /// Stage 2: extract text from PDFs, repositories and local folders.
    Extract(StageFlags),

    /// Stage 3: split extracted documents into chunks.
    ///
    /// Chunk files are always rebuilt from scratch.
    Chunk(StageFlags),

    /// Stage 4: generate conversations from chunks with the configured model.
    ///
    /// Stops once `target_pairs × overshoot` records exist. Chunks that
    /// already have records are skipped unless `--force` is given.
    Generate {
        #[command(flatten)]
        flags: StageFlags,

        /// Process at most this many chunks (sorted by name).
        #[arg(long)]
        max_chunks: Option<usize>,
    },

    /// Stage 5: deduplicate, shuffle and write train/val/test files.
    Finalize(StageFlags),

    /// Run stages `--from` through `--to` in order.
    Run {
        /// First stage to run (1-5).
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=5))]
        from: u8,

        /// Last stage to run (1-5).
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=5))]
        to: u8,

        #[command(flatten)]
        flags: StageFlags,

        /// Generate stage: process at most this many chunks.
        #[arg(long)]
        max_chunks: Option<usize>,
    },

    /// Run a single stage by number (1 download … 5 finalize).
    Stage {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=5))]
        number: u8,

        #[command(flatten)]
        flags: StageFlags,

        /// Generate stage: process at most this many chunks.
        #[arg(long)]
        max_chunks: Option<usize>,
    },

    /// List configured sources and whether they have been fetched.
    Sources,

    /// Show file counts per stage directory and final split sizes.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    let (stage, opts) = match cli.command {
        Commands::Sources => {
            sources::list_sources(&cfg)?;
            return Ok(());
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
            return Ok(());
        }
        Commands::Download(flags) => (Stage::Download, flags.options(None)),
        Commands::Extract(flags) => (Stage::Extract, flags.options(None)),
        Commands::Chunk(flags) => (Stage::Chunk, flags.options(None)),
        Commands::Generate { flags, max_chunks } => {
            (Stage::Generate, flags.options(max_chunks))
        }
        Commands::Finalize(flags) => (Stage::Finalize, flags.options(None)),
        Commands::Run {
            from,
            to,
            flags,
            max_chunks,
        } => {
            pipeline::run_range(
                &cfg,
                from,
                to,
                &flags.options(max_chunks),
                progress.as_ref(),
                &mut |report| report.print(),
            )
            .await?;
            return Ok(());
        }
        Commands::Stage {
            number,
            flags,
            max_chunks,
        } => (Stage::from_number(number)?, flags.options(max_chunks)),
    };

    let report = pipeline::run_stage(&cfg, stage, &opts, progress.as_ref())
        .await
        .with_context(|| format!("Stage {} failed", stage))?;
    report.print();

    Ok(())
}

impl StageFlags {
    fn options(self, max_chunks: Option<usize>) -> StageOptions {
        StageOptions {
            force: self.force,
            max_chunks,
        }
    }
}
