//! Configuration management for the SQL advisor.
//!
//! Configuration can be set via environment variables:
//! - `OPENAI_API_KEY` - Required. Either the raw key or a JSON object
//!   `{"OPENAI_API_KEY": "..."}` as produced by secret managers.
//! - `LLM_BASE_URL` - Optional. OpenAI-compatible endpoint. Defaults to `https://api.openai.com/v1`.
//! - `DEFAULT_MODEL` - Optional. Model for the analysis loop. Defaults to `o3`.
//! - `OPTIMIZER_MODEL` - Optional. Model for single-shot rewrites. Defaults to `gpt-4o-mini`.
//! - `LLM_REQUEST_TIMEOUT_SECS` - Optional. Per-attempt timeout for model calls. Defaults to `300`.
//! - `CUSTOMER_DATABASE_URL` - Optional. Postgres/Yugabyte URL used for diagnostic queries.
//! - `SUGGESTION_STORE` - Optional. `sqlite` (default) or `memory`.
//! - `SUGGESTION_DB_PATH` - Optional. Defaults to `./data/suggestions.db`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `MAX_CONCURRENT_ANALYSES` - Optional. Worker pool size. Defaults to `5`.
//! - `MAX_TURNS` - Optional. Maximum model turns per analysis. Defaults to `25`.
//! - `MAX_RESULT_ROWS` - Optional. Row cap for diagnostic queries. Defaults to `100`.
//! - `SESSION_IDLE_TIMEOUT_SECS` - Optional. Abandoned-session timeout. Defaults to `900`.
//! - `REAPER_INTERVAL_SECS` - Optional. Idle sweep period. Defaults to `60`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::suggestions::SuggestionStoreType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Tuning for the background analysis pool.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Maximum number of analyses running at once; the rest queue FIFO.
    pub max_concurrent: usize,

    /// Turn limit for one analysis before it is failed.
    pub max_turns: usize,

    /// Sessions not polled for this long are cancelled and reaped.
    pub session_idle_timeout: Duration,

    /// How often the idle sweep runs.
    pub reaper_interval: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_turns: 25,
            session_idle_timeout: Duration::from_secs(900),
            reaper_interval: Duration::from_secs(60),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Reasoning service API key
    pub api_key: String,

    /// OpenAI-compatible base URL (without the `/chat/completions` suffix)
    pub llm_base_url: String,

    /// Model used by the multi-turn analysis loop
    pub default_model: String,

    /// Model used by single-shot rewrites
    pub optimizer_model: String,

    /// Timeout of a single model request attempt
    pub llm_request_timeout: Duration,

    /// Customer database for read-only diagnostics
    pub customer_database_url: Option<String>,

    /// Row cap applied to every diagnostic query
    pub max_result_rows: usize,

    /// Suggestion cache backend
    pub suggestion_store: SuggestionStoreType,

    /// SQLite file for the suggestion cache
    pub suggestion_db_path: PathBuf,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    pub analyzer: AnalyzerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENAI_API_KEY` is not set or empty,
    /// and `ConfigError::InvalidValue` for unparsable numeric settings.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;
        let api_key = parse_api_key(&raw_key)?;

        let llm_base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let default_model = std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| "o3".to_string());

        let optimizer_model =
            std::env::var("OPTIMIZER_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let llm_timeout_secs = env_parse("LLM_REQUEST_TIMEOUT_SECS", 300u64)?;

        let customer_database_url = std::env::var("CUSTOMER_DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let suggestion_store = std::env::var("SUGGESTION_STORE")
            .map(|v| SuggestionStoreType::from_str(&v))
            .unwrap_or_default();

        let suggestion_db_path = std::env::var("SUGGESTION_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/suggestions.db"));

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env_parse("PORT", 3000u16)?;
        let max_result_rows = env_parse("MAX_RESULT_ROWS", 100usize)?;

        let max_concurrent = env_parse("MAX_CONCURRENT_ANALYSES", 5usize)?;
        if max_concurrent == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONCURRENT_ANALYSES".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let max_turns = env_parse("MAX_TURNS", 25usize)?;
        let idle_secs = env_parse("SESSION_IDLE_TIMEOUT_SECS", 900u64)?;
        let reaper_secs = env_parse("REAPER_INTERVAL_SECS", 60u64)?;

        Ok(Self {
            api_key,
            llm_base_url,
            default_model,
            optimizer_model,
            llm_request_timeout: Duration::from_secs(llm_timeout_secs.max(1)),
            customer_database_url,
            max_result_rows,
            suggestion_store,
            suggestion_db_path,
            host,
            port,
            analyzer: AnalyzerConfig {
                max_concurrent,
                max_turns,
                session_idle_timeout: Duration::from_secs(idle_secs),
                reaper_interval: Duration::from_secs(reaper_secs.max(1)),
            },
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            default_model,
            optimizer_model: "gpt-4o-mini".to_string(),
            llm_request_timeout: Duration::from_secs(300),
            customer_database_url: None,
            max_result_rows: 100,
            suggestion_store: SuggestionStoreType::Memory,
            suggestion_db_path: PathBuf::from("./data/suggestions.db"),
            host: "127.0.0.1".to_string(),
            port: 3000,
            analyzer: AnalyzerConfig::default(),
        }
    }
}

/// Accept either a bare key or the `{"OPENAI_API_KEY": "..."}` JSON wrapper.
fn parse_api_key(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let key = if trimmed.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
            ConfigError::InvalidValue("OPENAI_API_KEY".to_string(), e.to_string())
        })?;
        value
            .get("OPENAI_API_KEY")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "OPENAI_API_KEY".to_string(),
                    "JSON object has no OPENAI_API_KEY string".to_string(),
                )
            })?
    } else {
        trimmed.to_string()
    };

    if key.is_empty() {
        return Err(ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()));
    }
    Ok(key)
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
