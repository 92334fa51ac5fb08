use anyhow::Result;
use async_trait::async_trait;
use axum::routing::post;
use axum::{Json, Router};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use tuneset::config::{Config, GenerationConfig};
use tuneset::lenient_json::RESPONSE_MARKER;
use tuneset::llm::{create_generator, GenerationRequest, Generator};
use tuneset::models::ConversationRecord;
use tuneset::pipeline::{run_stages_with, Stage, StageOptions};
use tuneset::progress::NoProgress;

/// Answers every prompt with two fresh records, one duplicate of the
/// previous answer, and a line of junk.
struct ScriptedGenerator {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

fn record_json(tag: &str) -> String {
    format!(
        r#"{{"conversations": [{{"from": "system", "value": "You are an STM32 expert."}}, {{"from": "user", "value": "Question {tag}"}}, {{"from": "assistant", "value": "Answer {tag}"}}]}}"#
    )
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let dup = if n > 0 {
            record_json(&format!("{}a", n - 1))
        } else {
            String::new()
        };
        Ok(format!(
            "Here you go:\n```jsonl\n{}\n{}\n{}\nnot json at all {{\"conversations\": 3}}\n```",
            record_json(&format!("{}a", n)),
            record_json(&format!("{}b", n)),
            dup
        ))
    }
}

fn config_in(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.paths.root = tmp.path().join("data");
    config.chunking.min_chars = 10;
    config.chunking.max_chars = 200;
    config.finalize.seed = Some(3);
    config
}

fn write_extracted(config: &Config) {
    let extracted = config.paths.extracted_dir();
    fs::create_dir_all(&extracted).unwrap();
    fs::write(
        extracted.join("guide.md"),
        "# Hookup guide\n\nIntroduction to the board.\n## Power\nThe board runs from USB-C or a LiPo battery.\n## LED\nThe status LED is on PC13.\n## Qwiic\nI2C1 on PB6 and PB7.\n",
    )
    .unwrap();
}

fn read_records(path: &std::path::Path) -> Vec<ConversationRecord> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn chunk_generate_finalize_with_scripted_model() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    write_extracted(&config);
    let generator = ScriptedGenerator::new();

    let reports = run_stages_with(
        &config,
        &[Stage::Chunk, Stage::Generate, Stage::Finalize],
        &StageOptions::default(),
        &generator,
        &NoProgress,
    )
    .await
    .unwrap();

    // 4 sections, each a chunk.
    assert_eq!(reports[0].written, 4);

    let generate = &reports[1];
    assert_eq!(generate.written, 4 * 2 + 3);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 4);
    assert!(generate.skipped_of("missing conversations") >= 4);

    let prompts = generator.prompts.lock().unwrap();
    assert!(prompts.iter().any(|p| p.contains("status LED is on PC13")));
    assert!(prompts.iter().all(|p| p.contains(RESPONSE_MARKER)));

    let finalize = &reports[2];
    assert_eq!(finalize.skipped_of("duplicate"), 3);
    assert_eq!(finalize.written, 8);

    let final_dir = config.paths.final_dir();
    let prefix = &config.finalize.prefix;
    let train = read_records(&final_dir.join(format!("{}_train.jsonl", prefix)));
    let val = read_records(&final_dir.join(format!("{}_val.jsonl", prefix)));
    let test = read_records(&final_dir.join(format!("{}_test.jsonl", prefix)));
    assert_eq!((train.len(), val.len(), test.len()), (7, 0, 1));
}

#[tokio::test]
async fn generate_stops_at_target_and_resumes() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp);
    config.generation.target_pairs = 3;
    config.generation.overshoot = 1.0;
    write_extracted(&config);

    let generator = ScriptedGenerator::new();
    let opts = StageOptions::default();
    let reports = run_stages_with(
        &config,
        &[Stage::Chunk, Stage::Generate],
        &opts,
        &generator,
        &NoProgress,
    )
    .await
    .unwrap();
    // 2 records after the first chunk, 3 more after the second, then stop.
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(reports[1].written, 5);

    // A second run counts what is on disk and generates nothing new.
    let again = ScriptedGenerator::new();
    let reports = run_stages_with(&config, &[Stage::Generate], &opts, &again, &NoProgress)
        .await
        .unwrap();
    assert_eq!(again.calls.load(Ordering::SeqCst), 0);
    assert_eq!(reports[0].written, 0);
    assert_eq!(reports[0].existing, 5);
}

#[tokio::test]
async fn force_replaces_existing_pair_files() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    let chunks = config.paths.chunks_dir();
    fs::create_dir_all(&chunks).unwrap();
    fs::write(chunks.join("guide_chunk000.txt"), "## LED\nThe status LED is on PC13.").unwrap();

    let generated = config.paths.generated_dir();
    fs::create_dir_all(&generated).unwrap();
    let stale = generated.join("guide_chunk000_pairs_009.jsonl");
    fs::write(&stale, format!("{}\n", record_json("stale"))).unwrap();

    let generator = ScriptedGenerator::new();
    let opts = StageOptions::default();
    let reports = run_stages_with(&config, &[Stage::Generate], &opts, &generator, &NoProgress)
        .await
        .unwrap();
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(reports[0].existing, 1);
    assert!(stale.exists());

    let forced = StageOptions {
        force: true,
        max_chunks: None,
    };
    let reports = run_stages_with(&config, &[Stage::Generate], &forced, &generator, &NoProgress)
        .await
        .unwrap();
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(reports[0].written, 2);
    assert!(!stale.exists());

    let mut answers = Vec::new();
    for entry in fs::read_dir(&generated).unwrap() {
        answers.extend(read_records(&entry.unwrap().path()));
    }
    assert_eq!(answers.len(), 2);
    assert!(answers
        .iter()
        .all(|r| !r.conversations[2].value.contains("stale")));
}

#[tokio::test]
async fn max_chunks_limits_generation() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    write_extracted(&config);

    let generator = ScriptedGenerator::new();
    let opts = StageOptions {
        force: false,
        max_chunks: Some(1),
    };
    run_stages_with(
        &config,
        &[Stage::Chunk, Stage::Generate],
        &opts,
        &generator,
        &NoProgress,
    )
    .await
    .unwrap();
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    let files = fs::read_dir(config.paths.generated_dir()).unwrap().count();
    assert_eq!(files, 2);
}

#[tokio::test]
async fn openai_compatible_backend_against_local_server() {
    let seen = Arc::new(Mutex::new(Vec::<serde_json::Value>::new()));
    let seen_in_handler = seen.clone();
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |Json(body): Json<serde_json::Value>| {
            let seen = seen_in_handler.clone();
            async move {
                seen.lock().unwrap().push(body);
                let content = format!("{}\n{}", record_json("x"), record_json("y"));
                Json(serde_json::json!({
                    "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
                }))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp);
    config.generation = GenerationConfig {
        provider: "openai".to_string(),
        model: Some("local-coder".to_string()),
        url: Some(format!("http://{}", addr)),
        temperature: 0.5,
        ..GenerationConfig::default()
    };
    let chunks = config.paths.chunks_dir();
    fs::create_dir_all(&chunks).unwrap();
    fs::write(chunks.join("guide_chunk000.txt"), "## LED\nThe status LED is on PC13.").unwrap();

    let generator = create_generator(&config.generation).unwrap();
    let reports = run_stages_with(
        &config,
        &[Stage::Generate],
        &StageOptions::default(),
        generator.as_ref(),
        &NoProgress,
    )
    .await
    .unwrap();
    assert_eq!(reports[0].written, 2);
    assert_eq!(reports[0].detail_value("generator"), Some("local-coder"));

    let bodies = seen.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["model"], "local-coder");
    assert_eq!(bodies[0]["temperature"], 0.5);
    assert_eq!(bodies[0]["messages"][0]["role"], "system");
    assert!(bodies[0]["messages"][1]["content"]
        .as_str()
        .unwrap()
        .contains("status LED is on PC13"));

    let written = config.paths.generated_dir().join("guide_chunk000_pairs_001.jsonl");
    assert!(written.exists());
}
