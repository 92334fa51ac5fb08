//! Text-generation provider abstraction and implementations.
//!
//! Defines the [`Generator`] trait and concrete backends:
//! - **[`DisabledGenerator`]**: returns errors; used when generation is not configured.
//! - **[`OpenAiGenerator`]**: `POST {url}/v1/chat/completions`. Works against
//!   the OpenAI API or any OpenAI-compatible server (vLLM, llama.cpp, LM Studio).
//! - **[`OllamaGenerator`]**: `POST {url}/api/generate` on a local Ollama instance.
//!
//! Requests are sent once. A failed request is returned as an error and the
//! generate stage skips that chunk.
//!
//! # Provider Selection
//!
//! ```rust
//! # use tuneset::config::GenerationConfig;
//! # use tuneset::llm::create_generator;
//! let config = GenerationConfig::default(); // provider = "disabled"
//! let generator = create_generator(&config).unwrap();
//! assert_eq!(generator.name(), "disabled");
//! ```

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::GenerationConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// A single generation call: system instructions plus the user prompt.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
}

/// Sampling parameters shared by every backend.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_new_tokens: u32,
    pub repetition_penalty: f64,
}

impl SamplingParams {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_new_tokens: config.max_new_tokens,
            repetition_penalty: config.repetition_penalty,
        }
    }
}

/// A language model that turns a prompt into free-form text.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model or backend identifier, for logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        bail!("Generation provider is disabled. Set [generation] provider in config.")
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    params: SamplingParams,
}

impl OpenAiGenerator {
    /// # Errors
    ///
    /// Returns an error if `model` is missing, or if the official OpenAI
    /// endpoint is targeted without `OPENAI_API_KEY` in the environment.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for OpenAI provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if api_key.is_none() && url.trim_end_matches('/') == OPENAI_DEFAULT_URL {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            api_key,
            params: SamplingParams::from_config(config),
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": self.params.temperature,
            "top_p": self.params.top_p,
            "max_tokens": self.params.max_new_tokens,
        });

        let mut req = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| anyhow!("OpenAI connection error ({}): {}", self.url, e))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_openai_response(&json)
    }
}

/// Extract `choices[0].message.content` from a chat completion.
fn parse_openai_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    params: SamplingParams,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            params: SamplingParams::from_config(config),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "system": request.system,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": self.params.temperature,
                "top_p": self.params.top_p,
                "num_predict": self.params.max_new_tokens,
                "repeat_penalty": self.params.repetition_penalty,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))
}

/// Create the appropriate [`Generator`] based on configuration.
///
/// | Config Value | Generator |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledGenerator`] |
/// | `"openai"` | [`OpenAiGenerator`] |
/// | `"ollama"` | [`OllamaGenerator`] |
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_completion() {
        let json = serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"conversations\": []}"}}]
        });
        assert_eq!(
            parse_openai_response(&json).unwrap(),
            "{\"conversations\": []}"
        );
    }

    #[test]
    fn chat_completion_without_choices_is_error() {
        let json = serde_json::json!({"choices": []});
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn parses_ollama_generate() {
        let json = serde_json::json!({"model": "qwen2.5-coder", "response": "hello", "done": true});
        assert_eq!(parse_ollama_response(&json).unwrap(), "hello");
        assert!(parse_ollama_response(&serde_json::json!({"done": true})).is_err());
    }

    #[test]
    fn ollama_defaults_to_localhost() {
        let config = GenerationConfig {
            provider: "ollama".to_string(),
            model: Some("qwen2.5-coder:7b".to_string()),
            ..GenerationConfig::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        assert_eq!(generator.url, OLLAMA_DEFAULT_URL);
        assert_eq!(generator.name(), "qwen2.5-coder:7b");
    }

    #[test]
    fn openai_compatible_server_needs_no_key() {
        let config = GenerationConfig {
            provider: "openai".to_string(),
            model: Some("local-model".to_string()),
            url: Some("http://127.0.0.1:8000/".to_string()),
            ..GenerationConfig::default()
        };
        let generator = OpenAiGenerator::new(&config).unwrap();
        assert_eq!(generator.url, "http://127.0.0.1:8000");
    }

    #[tokio::test]
    async fn disabled_generator_errors() {
        let request = GenerationRequest {
            system: String::new(),
            prompt: "hi".to_string(),
        };
        assert!(DisabledGenerator.generate(&request).await.is_err());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = GenerationConfig {
            provider: "bard".to_string(),
            ..GenerationConfig::default()
        };
        assert!(create_generator(&config).is_err());
    }
}
