//! KGX Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with defaults matching the production extraction service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{ObjectTieBreak, RelationConstraint};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Oracle client limits, timeouts and retry policy
    pub oracle: OracleConfig,

    /// Segmentation and chunk fan-out
    pub chunking: ChunkingConfig,

    /// Result cache
    pub cache: CacheConfig,

    /// Disambiguation, fusion and validation settings
    pub enrichment: EnrichmentConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // LLM
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider.parse()?;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.llm.openai_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
            config.llm.deepseek_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = Some(url);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            config.llm.ollama_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.llm.model = model;
        }

        // Oracle client
        if let Some(permits) = parse_env("ORACLE_MAX_CONCURRENCY")? {
            config.oracle.max_concurrent_calls = permits;
        }
        if let Some(retries) = parse_env("ORACLE_MAX_RETRIES")? {
            config.oracle.max_retries = retries;
        }

        // Chunking
        if let Some(size) = parse_env("CHUNK_MAX_SIZE")? {
            config.chunking.max_chunk_size = size;
        }
        if let Some(overlap) = parse_env("CHUNK_OVERLAP")? {
            config.chunking.overlap_size = overlap;
        }
        if let Some(workers) = parse_env("CHUNK_WORKERS")? {
            config.chunking.worker_pool_size = workers;
        }

        // Cache
        if let Some(enabled) = parse_env("CACHE_ENABLED")? {
            config.cache.enabled = enabled;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = parse_env("LOG_JSON")? {
            config.logging.json_format = json;
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;

        if env_config.llm.provider != LlmConfig::default().provider {
            self.llm.provider = env_config.llm.provider;
        }
        if env_config.llm.model != LlmConfig::default().model {
            self.llm.model = env_config.llm.model;
        }
        if env_config.llm.base_url.is_some() {
            self.llm.base_url = env_config.llm.base_url;
        }
        if env_config.logging.level != LoggingConfig::default().level {
            self.logging.level = env_config.logging.level;
        }

        // Always use env for sensitive values
        if env_config.llm.openai_api_key.is_some() {
            self.llm.openai_api_key = env_config.llm.openai_api_key;
        }
        if env_config.llm.deepseek_api_key.is_some() {
            self.llm.deepseek_api_key = env_config.llm.deepseek_api_key;
        }

        Ok(self)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;
        if chunking.max_chunk_size == 0 {
            return Err(invalid("chunking.max_chunk_size", chunking.max_chunk_size));
        }
        if chunking.min_chunk_size >= chunking.max_chunk_size {
            return Err(invalid("chunking.min_chunk_size", chunking.min_chunk_size));
        }
        if chunking.overlap_size >= chunking.max_chunk_size {
            return Err(invalid("chunking.overlap_size", chunking.overlap_size));
        }
        if chunking.worker_pool_size == 0 {
            return Err(invalid("chunking.worker_pool_size", 0));
        }
        if self.oracle.max_concurrent_calls == 0 {
            return Err(invalid("oracle.max_concurrent_calls", 0));
        }
        if self.oracle.min_timeout_secs > self.oracle.max_timeout_secs {
            return Err(invalid(
                "oracle.min_timeout_secs",
                self.oracle.min_timeout_secs,
            ));
        }

        let thresholds = [
            ("enrichment.person_threshold", self.enrichment.person_threshold),
            ("enrichment.work_threshold", self.enrichment.work_threshold),
            ("enrichment.event_threshold", self.enrichment.event_threshold),
            ("enrichment.generic_threshold", self.enrichment.generic_threshold),
        ];
        for (key, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(key, value));
            }
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

fn invalid(key: &str, value: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider to use
    pub provider: LlmProvider,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// DeepSeek API key
    pub deepseek_api_key: Option<String>,

    /// Override for the chat-completion base URL
    pub base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Model name to use
    pub model: String,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::DeepSeek,
            openai_api_key: None,
            deepseek_api_key: None,
            base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "deepseek-chat".to_string(),
            max_tokens: 2000,
            temperature: 0.1,
            connect_timeout_secs: 10,
        }
    }
}

impl LlmConfig {
    /// Copy of this config with API keys masked, for display
    pub fn redacted(&self) -> Self {
        let mask = |key: &Option<String>| key.as_ref().map(|_| "***".to_string());
        Self {
            openai_api_key: mask(&self.openai_api_key),
            deepseek_api_key: mask(&self.deepseek_api_key),
            ..self.clone()
        }
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    DeepSeek,
    Ollama,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "deepseek" => Ok(Self::DeepSeek),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Oracle client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Permits of the global oracle semaphore
    pub max_concurrent_calls: usize,

    /// Maximum wait for a permit before answering "system busy"
    pub permit_wait_secs: u64,

    /// Timeout before the per-length allowance is added
    pub base_timeout_secs: u64,

    /// Timeout added per started 1000 characters
    pub timeout_per_1000_chars_secs: u64,

    /// Upper bound of the computed timeout
    pub max_timeout_secs: u64,

    /// Lower bound of the computed timeout
    pub min_timeout_secs: u64,

    /// Retries after the first attempt
    pub max_retries: usize,

    /// First backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,

    /// Inputs longer than this are truncated before prompting
    pub max_prompt_chars: usize,

    /// Target length of a truncated input
    pub truncated_prompt_chars: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 5,
            permit_wait_secs: 10,
            base_timeout_secs: 60,
            timeout_per_1000_chars_secs: 15,
            max_timeout_secs: 300,
            min_timeout_secs: 60,
            max_retries: 3,
            initial_backoff_ms: 3_000,
            max_backoff_ms: 60_000,
            max_prompt_chars: 3_000,
            truncated_prompt_chars: 2_500,
        }
    }
}

impl OracleConfig {
    pub fn permit_wait(&self) -> Duration {
        Duration::from_secs(self.permit_wait_secs)
    }
}

/// Segmentation configuration (sizes in characters)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Texts longer than this are chunked
    pub max_chunk_size: usize,

    /// A chunk is only closed once it exceeds this size
    pub min_chunk_size: usize,

    /// Characters carried over from the previous chunk
    pub overlap_size: usize,

    /// Chunks processed concurrently
    pub worker_pool_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 2_000,
            min_chunk_size: 500,
            overlap_size: 200,
            worker_pool_size: 3,
        }
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the result cache
    pub enabled: bool,

    /// Maximum entries in the in-process tier
    pub local_max_capacity: u64,

    /// Time-to-live of in-process entries (seconds)
    pub local_ttl_secs: u64,

    /// Time-to-live passed to the shared tier (seconds)
    pub shared_ttl_secs: u64,

    /// Prefix of every cache key
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local_max_capacity: 2_000,
            local_ttl_secs: 2 * 60 * 60,
            shared_ttl_secs: 2 * 60 * 60,
            key_prefix: "extract:v4:".to_string(),
        }
    }
}

/// Enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Similarity needed to merge a person mention
    pub person_threshold: f32,

    /// Similarity needed to merge a work mention
    pub work_threshold: f32,

    /// Similarity needed to merge an event mention
    pub event_threshold: f32,

    /// Similarity needed to merge any other mention
    pub generic_threshold: f32,

    /// Fuzzy candidates fetched per mention
    pub candidate_limit: usize,

    /// Representative selection for conflicting objects
    pub tie_break: ObjectTieBreak,

    /// Predicate constraints; empty uses the built-in table
    pub constraints: Vec<RelationConstraint>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            person_threshold: 0.8,
            work_threshold: 0.75,
            event_threshold: 0.7,
            generic_threshold: 0.7,
            candidate_limit: 5,
            tie_break: ObjectTieBreak::Longest,
            constraints: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

impl From<ConfigError> for crate::KgxError {
    fn from(err: ConfigError) -> Self {
        crate::KgxError::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RelationCardinality;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.chunking.max_chunk_size, 2000);
        assert_eq!(config.chunking.overlap_size, 200);
        assert_eq!(config.oracle.max_concurrent_calls, 5);
        assert_eq!(config.cache.local_max_capacity, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_llm_provider_parse() {
        assert_eq!(
            "openai".parse::<LlmProvider>().unwrap(),
            LlmProvider::OpenAI
        );
        assert_eq!(
            "DeepSeek".parse::<LlmProvider>().unwrap(),
            LlmProvider::DeepSeek
        );
        assert!("invalid".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [chunking]
            max_chunk_size = 1200

            [[enrichment.constraints]]
            predicate = "spouse"
            cardinality = "1:1"
            exclusive = true
            conflicting_predicates = ["ex_spouse"]
            "#,
        )
        .unwrap();

        assert_eq!(config.chunking.max_chunk_size, 1200);
        assert_eq!(config.chunking.overlap_size, 200);
        assert_eq!(config.enrichment.constraints.len(), 1);
        assert_eq!(
            config.enrichment.constraints[0].cardinality,
            RelationCardinality::OneToOne
        );
    }

    #[test]
    fn test_validate_rejects_inverted_sizes() {
        let mut config = AppConfig::default();
        config.chunking.min_chunk_size = 3000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = AppConfig::default();
        config.enrichment.person_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_masks_keys() {
        let config = LlmConfig {
            openai_api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        let redacted = config.redacted();
        assert_eq!(redacted.openai_api_key.as_deref(), Some("***"));
        assert!(redacted.deepseek_api_key.is_none());
    }
}
