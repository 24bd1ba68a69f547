//! Configuration loading, validation, and management for Tellerline.
//!
//! Loads configuration from `~/.tellerline/config.toml` (or the file named by
//! `TELLERLINE_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.tellerline/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model endpoint settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Retry policy for model calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Conversation state store settings
    #[serde(default)]
    pub state: StateConfig,

    /// Turn orchestration settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Legacy bank REST API used by data tools
    #[serde(default)]
    pub bank_api: BankApiConfig,

    /// Curated answers for `get_bank_info`, keyed by topic
    #[serde(default)]
    pub bank_info: BTreeMap<String, String>,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which flavour of chat-completions endpoint to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Azure OpenAI: deployment URL, `api-key` header, `api-version` query
    #[default]
    Azure,
    /// Any OpenAI-compatible `/chat/completions` endpoint with bearer auth
    OpenAi,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    /// Azure resource endpoint or OpenAI-compatible base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model name, or deployment name for Azure
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_api_version() -> String {
    "2024-02-15-preview".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_top_p() -> f32 {
    0.9
}
fn default_provider_timeout() -> u64 {
    30
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            endpoint: None,
            api_key: None,
            model: default_model(),
            api_version: default_api_version(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: None,
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("api_version", &self.api_version)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt; 0 disables retrying
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Idle time after which a conversation starts over
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_max_history")]
    pub max_history_messages: usize,
}

fn default_ttl_secs() -> u64 {
    2 * 60 * 60
}
fn default_max_history() -> usize {
    20
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_history_messages: default_max_history(),
        }
    }
}

impl StateConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Reply language when the conversation has none ("uk" or "en")
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Replace the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// How many times tool output may be fed back to the model in one turn
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
}

fn default_language() -> String {
    "uk".into()
}
fn default_max_tool_rounds() -> u32 {
    2
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            system_prompt: None,
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_bank_timeout")]
    pub timeout_secs: u64,
}

fn default_bank_timeout() -> u64 {
    20
}

impl Default for BankApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_bank_timeout(),
        }
    }
}

impl BankApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit one JSON object per line instead of the pretty format
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from `TELLERLINE_CONFIG` or the default path
    /// (~/.tellerline/config.toml), then apply environment overrides:
    /// - `AZURE_OPENAI_ENDPOINT`, `AZURE_OPENAI_API_KEY`, `AZURE_OPENAI_DEPLOYMENT`
    /// - `TELLERLINE_API_KEY` (wins over `AZURE_OPENAI_API_KEY`)
    /// - `CHATBOT_API_BASE_URL`
    /// - `TELLERLINE_LOG_JSON`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::read_file(&Self::config_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply overrides from an environment lookup.
    ///
    /// Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = var("AZURE_OPENAI_ENDPOINT") {
            self.provider.kind = ProviderKind::Azure;
            self.provider.endpoint = Some(endpoint);
        }
        if let Some(deployment) = var("AZURE_OPENAI_DEPLOYMENT") {
            self.provider.model = deployment;
        }
        if let Some(key) = var("TELLERLINE_API_KEY").or_else(|| var("AZURE_OPENAI_API_KEY")) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = var("CHATBOT_API_BASE_URL") {
            self.bank_api.base_url = Some(url);
        }
        if let Some(flag) = var("TELLERLINE_LOG_JSON") {
            self.logging.json = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tellerline")
    }

    /// The file `load()` reads: `TELLERLINE_CONFIG`, else the default path.
    pub fn config_path() -> PathBuf {
        std::env::var("TELLERLINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.provider.top_p <= 0.0 || self.provider.top_p > 1.0 {
            return Err(ConfigError::ValidationError(
                "provider.top_p must be in (0.0, 1.0]".into(),
            ));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.max_delay_ms must be >= retry.base_delay_ms".into(),
            ));
        }

        if self.state.ttl_secs == 0 {
            return Err(ConfigError::ValidationError("state.ttl_secs must be > 0".into()));
        }

        if self.state.max_history_messages == 0 {
            return Err(ConfigError::ValidationError(
                "state.max_history_messages must be > 0".into(),
            ));
        }

        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_rounds must be > 0".into(),
            ));
        }

        if !matches!(self.agent.default_language.as_str(), "uk" | "en") {
            return Err(ConfigError::ValidationError(format!(
                "agent.default_language must be \"uk\" or \"en\", got \"{}\"",
                self.agent.default_language
            )));
        }

        Ok(())
    }

    /// Check if a model API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Render the effective configuration as TOML with secrets masked.
    pub fn redacted_toml(&self) -> String {
        let mut shown = self.clone();
        if shown.provider.api_key.is_some() {
            shown.provider.api_key = Some("[REDACTED]".into());
        }
        toml::to_string_pretty(&shown).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
