//! # tuneset
//!
//! An offline pipeline that turns vendor documentation, example code and
//! web pages about one embedded board into a ShareGPT-style fine-tuning
//! dataset for a coding assistant.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌───────┐   ┌──────────┐   ┌──────────┐
//! │ download │──▶│ extract │──▶│ chunk │──▶│ generate │──▶│ finalize │
//! │ pdf/git/ │   │ pdf→md  │   │ ≤ max │   │   LLM    │   │ dedup +  │
//! │   web    │   │ repo→md │   │ chars │   │ → JSONL  │   │  split   │
//! └──────────┘   └─────────┘   └───────┘   └──────────┘   └──────────┘
//! ```
//!
//! Every stage reads the previous stage's directory under `paths.root` and
//! writes its own, so stages can be re-run independently. All settings come
//! from one TOML file passed explicitly to every stage.
//!
//! ## Quick Start
//!
//! ```bash
//! tuneset sources                    # what is configured, what is fetched
//! tuneset run --to 3                 # download, extract, chunk
//! tuneset generate --max-chunks 10   # try generation on a few chunks
//! tuneset run --from 4               # generate and finalize
//! tuneset stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Conversation records, skip reasons, stage reports |
//! | [`download`] | Stage 1: fetch PDFs, clone repos, scrape pages |
//! | [`extract`] | Stage 2: PDFs, repos and loose files to markdown |
//! | [`chunk`] | Stage 3: heading and recursive text splitting |
//! | [`generate`] | Stage 4: prompt a model and keep valid records |
//! | [`finalize`] | Stage 5: dedup, shuffle, train/val/test split |
//! | [`llm`] | Text-generation backends |
//! | [`lenient_json`] | Recovering records from messy model output |
//! | [`html`] | Readable text from HTML |
//! | [`pipeline`] | Stage numbering and ordered execution |
//! | [`progress`] | Stage progress on stderr |
//! | [`sources`] / [`stats`] | Inspection commands |

pub mod chunk;
pub mod config;
pub mod download;
pub mod extract;
pub mod files;
pub mod finalize;
pub mod generate;
pub mod html;
pub mod lenient_json;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod sources;
pub mod stats;
