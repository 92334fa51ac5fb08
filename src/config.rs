//! TOML configuration for the pipeline.
//!
//! A single [`Config`] value is loaded once by the CLI and passed by
//! reference into every stage. All stage directories hang off
//! `[paths].root`, so a whole dataset build can be relocated by changing
//! one line.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub finalize: FinalizeConfig,
}

/// The board the dataset is specialized for. Feeds the generation prompt.
#[derive(Debug, Deserialize, Clone)]
pub struct BoardConfig {
    #[serde(default = "default_board_name")]
    pub name: String,
    #[serde(default = "default_mcu")]
    pub mcu: String,
    #[serde(default = "default_board_notes")]
    pub notes: String,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            name: default_board_name(),
            mcu: default_mcu(),
            notes: default_board_notes(),
        }
    }
}

fn default_board_name() -> String {
    "SparkFun Thing Plus - STM32 (STM32F405RGT6)".to_string()
}
fn default_mcu() -> String {
    "STM32F405RGT6".to_string()
}
fn default_board_notes() -> String {
    "SparkFun pinout (LED on PC13, Qwiic I2C on PB6/PB7, etc.)".to_string()
}

/// Named remote sources, keyed by the stem used for the raw artifact.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub pdfs: BTreeMap<String, String>,
    #[serde(default)]
    pub repos: BTreeMap<String, String>,
    #[serde(default)]
    pub web: BTreeMap<String, String>,
}

impl SourcesConfig {
    pub fn is_empty(&self) -> bool {
        self.pdfs.is_empty() && self.repos.is_empty() && self.web.is_empty()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    #[serde(default = "default_true")]
    pub shallow_clone: bool,
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            shallow_clone: true,
            timeout_secs: default_download_timeout(),
        }
    }
}

// Some vendor CDNs refuse requests without a browser-looking agent.
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/144.0.0.0 Safari/537.36".to_string()
}
fn default_accept_language() -> String {
    "en-GB,en;q=0.7".to_string()
}
fn default_true() -> bool {
    true
}
fn default_download_timeout() -> u64 {
    300
}

/// Optional user-supplied folders merged in during extraction.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LocalConfig {
    #[serde(default)]
    pub code_dir: Option<PathBuf>,
    #[serde(default)]
    pub extra_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("data_pipeline")
}

impl PathsConfig {
    pub fn raw_pdfs_dir(&self) -> PathBuf {
        self.root.join("raw_downloads").join("pdfs")
    }
    pub fn raw_repos_dir(&self) -> PathBuf {
        self.root.join("raw_downloads").join("repos")
    }
    pub fn raw_web_dir(&self) -> PathBuf {
        self.root.join("raw_downloads").join("web")
    }
    pub fn extracted_dir(&self) -> PathBuf {
        self.root.join("extracted")
    }
    pub fn chunks_dir(&self) -> PathBuf {
        self.root.join("chunks")
    }
    pub fn generated_dir(&self) -> PathBuf {
        self.root.join("generated_pairs")
    }
    pub fn final_dir(&self) -> PathBuf {
        self.root.join("final")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_repo_include_globs")]
    pub repo_include_globs: Vec<String>,
    #[serde(default = "default_repo_exclude_globs")]
    pub repo_exclude_globs: Vec<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            repo_include_globs: default_repo_include_globs(),
            repo_exclude_globs: default_repo_exclude_globs(),
        }
    }
}

fn default_repo_include_globs() -> Vec<String> {
    vec![
        "**/*.c".to_string(),
        "**/*.h".to_string(),
        "**/*.md".to_string(),
    ]
}
fn default_repo_exclude_globs() -> Vec<String> {
    vec!["**/.git/**".to_string(), "**/__pycache__/**".to_string()]
}

/// How extracted documents are cut into chunks.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Split on level-2 markdown headings, then bound oversized sections.
    Heading,
    /// Pack pieces split by the separator priority list.
    Recursive,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_strategy")]
    pub strategy: ChunkStrategy,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_chars: default_max_chars(),
            min_chars: default_min_chars(),
            separators: default_separators(),
        }
    }
}

fn default_strategy() -> ChunkStrategy {
    ChunkStrategy::Heading
}
fn default_max_chars() -> usize {
    12_000
}
fn default_min_chars() -> usize {
    200
}
fn default_separators() -> Vec<String> {
    ["\n## ", "\n### ", "\n\n", "\n", ". ", " "]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_pairs_per_chunk")]
    pub pairs_per_chunk: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_target_pairs")]
    pub target_pairs: usize,
    #[serde(default = "default_overshoot")]
    pub overshoot: f64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f64,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            pairs_per_chunk: default_pairs_per_chunk(),
            max_chunk_chars: default_max_chunk_chars(),
            target_pairs: default_target_pairs(),
            overshoot: default_overshoot(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_new_tokens: default_max_new_tokens(),
            repetition_penalty: default_repetition_penalty(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_pairs_per_chunk() -> usize {
    8
}
fn default_max_chunk_chars() -> usize {
    3000
}
fn default_target_pairs() -> usize {
    1000
}
fn default_overshoot() -> f64 {
    1.2
}
fn default_temperature() -> f64 {
    0.6
}
fn default_top_p() -> f64 {
    0.92
}
fn default_max_new_tokens() -> u32 {
    4096
}
fn default_repetition_penalty() -> f64 {
    1.1
}
fn default_generation_timeout() -> u64 {
    600
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Number of records after which generation stops.
    pub fn stop_after(&self) -> usize {
        (self.target_pairs as f64 * self.overshoot).ceil() as usize
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FinalizeConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_train_ratio")]
    pub train_ratio: f64,
    #[serde(default = "default_val_ratio")]
    pub val_ratio: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            train_ratio: default_train_ratio(),
            val_ratio: default_val_ratio(),
            seed: None,
        }
    }
}

fn default_prefix() -> String {
    "stm32_f405".to_string()
}
fn default_train_ratio() -> f64 {
    0.90
}
fn default_val_ratio() -> f64 {
    0.05
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.min_chars > config.chunking.max_chars {
        bail!("chunking.min_chars must be <= chunking.max_chars");
    }
    if config.chunking.separators.iter().any(|s| s.is_empty()) {
        bail!("chunking.separators must not contain empty strings");
    }

    // Validate generation
    if config.generation.pairs_per_chunk == 0 {
        bail!("generation.pairs_per_chunk must be >= 1");
    }
    if config.generation.max_chunk_chars == 0 {
        bail!("generation.max_chunk_chars must be > 0");
    }
    if config.generation.overshoot < 1.0 {
        bail!("generation.overshoot must be >= 1.0");
    }
    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    // Validate finalize
    let f = &config.finalize;
    if !(0.0..=1.0).contains(&f.train_ratio) || !(0.0..=1.0).contains(&f.val_ratio) {
        bail!("finalize ratios must be in [0.0, 1.0]");
    }
    if f.train_ratio + f.val_ratio > 1.0 + f64::EPSILON {
        bail!("finalize.train_ratio + finalize.val_ratio must be <= 1.0");
    }
    if f.prefix.trim().is_empty() {
        bail!("finalize.prefix must not be empty");
    }

    Ok(())
}
