//! Generative (completion) capability.
//!
//! | Provider | Endpoint | API key |
//! |----------|----------|---------|
//! | `openai` | `https://api.openai.com/v1/chat/completions` | `OPENAI_API_KEY` |
//! | `groq` | `https://api.groq.com/openai/v1/chat/completions` | `GROQ_API_KEY` |
//! | `ollama` | `http://localhost:11434/api/chat` | none |
//! | `google` | `https://generativelanguage.googleapis.com/v1beta` | `GOOGLE_API_KEY` |
//! | `disabled` | none | none |
//!
//! `generation.url` overrides the endpoint (for `ollama` and `google`, the
//! base URL). Calls are single-shot prompts
//! sent as one user message; the pipeline builds the full prompt text itself
//! (see [`crate::prompts`]).

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::{PortalError, Result};
use crate::http;

/// Sampling options for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_output_tokens: 2048,
        }
    }
}

impl From<&GenerationConfig> for CompletionOptions {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// Prompt-to-text capability. Failures are [`PortalError::Backend`].
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;
}

/// Generator used when no backend is configured; every call fails.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> Result<String> {
        Err(PortalError::Backend(
            "generation provider is disabled; set [generation].provider".to_string(),
        ))
    }
}

/// OpenAI-compatible `/chat/completions` client (OpenAI, Groq).
pub struct ChatCompletionsGenerator {
    model: String,
    url: String,
    api_key_var: &'static str,
    max_retries: u32,
    client: reqwest::Client,
}

impl ChatCompletionsGenerator {
    pub fn new(config: &GenerationConfig, default_url: &str, api_key_var: &'static str) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            PortalError::Input(format!(
                "generation.model required for {} provider",
                config.provider
            ))
        })?;
        http::api_key(api_key_var)?;
        Ok(Self {
            model,
            url: config.url.clone().unwrap_or_else(|| default_url.to_string()),
            api_key_var,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let api_key = http::api_key(self.api_key_var)?;
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": options.temperature,
            "max_tokens": options.max_output_tokens,
        });
        let json = http::post_json(
            &self.client,
            &self.url,
            http::Auth::Bearer(&api_key),
            &body,
            self.max_retries,
            "chat completions",
        )
        .await?;
        parse_chat_completion(&json)
    }
}

fn parse_chat_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            PortalError::Backend("Invalid chat completion response: missing content".to_string())
        })
}

/// Ollama `/api/chat` client (non-streaming).
pub struct OllamaGenerator {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            PortalError::Input("generation.model required for ollama provider".to_string())
        })?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_output_tokens,
            },
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/api/chat", self.url),
            http::Auth::None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                PortalError::Backend("Invalid Ollama chat response: missing content".to_string())
            })
    }
}

/// Gemini `models/{model}:generateContent` client.
pub struct GeminiGenerator {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

pub(crate) const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            PortalError::Input("generation.model required for google provider".to_string())
        })?;
        http::api_key("GOOGLE_API_KEY")?;
        Ok(Self {
            model: model.trim_start_matches("models/").to_string(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let api_key = http::api_key("GOOGLE_API_KEY")?;
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": options.temperature,
                "maxOutputTokens": options.max_output_tokens,
            },
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/models/{}:generateContent", self.url, self.model),
            http::Auth::Header("x-goog-api-key", &api_key),
            &body,
            self.max_retries,
            "Gemini",
        )
        .await?;
        parse_gemini_content(&json)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_content(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            PortalError::Backend("Invalid Gemini response: missing candidate content".to_string())
        })?;
    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect())
}

/// Create the [`Generator`] named by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(ChatCompletionsGenerator::new(
            config,
            "https://api.openai.com/v1/chat/completions",
            "OPENAI_API_KEY",
        )?)),
        "groq" => Ok(Arc::new(ChatCompletionsGenerator::new(
            config,
            "https://api.groq.com/openai/v1/chat/completions",
            "GROQ_API_KEY",
        )?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "google" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        other => Err(PortalError::Input(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}
