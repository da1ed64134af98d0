//! HTTP oracle implementations
//!
//! Provides [`ExtractionOracle`] implementations for OpenAI-compatible
//! chat-completion APIs (OpenAI, DeepSeek) and for Ollama. Transport and
//! status failures are mapped onto [`OracleError`] so the client can decide
//! between retry, fallback and abort.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use kgx_core::{ExtractionKind, ExtractionOracle, KgxError, LlmConfig, LlmProvider, OracleError};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

const SYSTEM_PROMPT: &str =
    "你是一个专业的知识抽取助手。只输出合法的JSON，不要输出任何解释。";

// ============================================================================
// Chat Completion Oracle
// ============================================================================

/// Oracle backed by an OpenAI-compatible `/chat/completions` endpoint
pub struct ChatCompletionOracle {
    client: Client,
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletionOracle {
    /// Create a new chat-completion oracle
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            client: Client::new(),
            name: name.into(),
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            model: model.into(),
            max_tokens,
            temperature,
        }
    }

    /// Create from config for the OpenAI or DeepSeek provider
    pub fn from_config(config: &LlmConfig) -> kgx_core::Result<Self> {
        let (name, api_key, default_url) = match config.provider {
            LlmProvider::OpenAI => ("openai", &config.openai_api_key, OPENAI_BASE_URL),
            LlmProvider::DeepSeek => ("deepseek", &config.deepseek_api_key, DEEPSEEK_BASE_URL),
            LlmProvider::Ollama => {
                return Err(KgxError::ConfigError(
                    "Ollama is not a chat-completion provider".to_string(),
                ))
            }
        };

        let api_key = api_key
            .as_ref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| KgxError::ConfigError(format!("{name} API key required")))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| KgxError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            name: name.to_string(),
            api_key: api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_url.to_string()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Set custom base URL (for compatible APIs and tests)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ExtractionOracle for ChatCompletionOracle {
    async fn call(&self, prompt: &str, _kind: ExtractionKind) -> Result<String, OracleError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(format!("Failed to parse response: {e}")))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Parse("No response generated".to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Ollama Oracle
// ============================================================================

/// Oracle backed by a local Ollama server
pub struct OllamaOracle {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaOracle {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(config.ollama_url.clone(), config.model.clone())
    }
}

#[async_trait]
impl ExtractionOracle for OllamaOracle {
    async fn call(&self, prompt: &str, _kind: ExtractionKind) -> Result<String, OracleError> {
        let request = OllamaRequest {
            model: &self.model,
            prompt: format!("{SYSTEM_PROMPT}\n\n{prompt}"),
            stream: false,
            format: "json",
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;

        let result: OllamaResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(format!("Failed to parse Ollama response: {e}")))?;

        Ok(result.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

// ============================================================================
// Error mapping
// ============================================================================

fn transport_error(e: reqwest::Error) -> OracleError {
    if e.is_timeout() {
        OracleError::Timeout(e.to_string())
    } else if let Some(status) = e.status() {
        OracleError::from_status(status.as_u16(), e.to_string())
    } else {
        OracleError::Connection(e.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, OracleError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(OracleError::from_status(status.as_u16(), body))
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an oracle from config
pub fn create_oracle(config: &LlmConfig) -> kgx_core::Result<Arc<dyn ExtractionOracle>> {
    match config.provider {
        LlmProvider::OpenAI | LlmProvider::DeepSeek => {
            Ok(Arc::new(ChatCompletionOracle::from_config(config)?))
        }
        LlmProvider::Ollama => Ok(Arc::new(OllamaOracle::from_config(config))),
    }
}

// ============================================================================
// Tests
// ============================================================================
