//! Settings configuration loaded from TOML files.
//!
//! This module handles non-sensitive configuration stored in TOML format
//! in the XDG config directory (~/.config/medixlm/config.toml).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::provider::ProviderType;

/// Default TOML configuration file content
const DEFAULT_CONFIG_TOML: &str = r#"# medixlm configuration file
# Located at: ~/.config/medixlm/config.toml
#
# This file contains non-sensitive configuration.
# The generation API key (if any) is read from the environment variable
# named by `generation.api_key_env` (default: MEDIXLM_API_KEY).

[gateway]
host = "127.0.0.1"
port = 8000

[generation]
provider = "openai_compatible"
model = "llama3.1"
base_url = "http://127.0.0.1:8080/v1"
# api_key_env = "MEDIXLM_API_KEY"
temperature = 0.7
max_tokens = 2000
timeout_seconds = 120
fallback_message = "I'm sorry, I'm unable to generate a response right now. Please try again shortly, and consult a healthcare professional for urgent concerns."

[chat]
history_window = 10
history_char_budget = 12000
cache_ttl_seconds = 3600
retrieval_limit = 5
persist_partial_on_cancel = false
# persona_path = "/etc/medixlm/persona.txt"

[knowledge]
embedding_url = "http://127.0.0.1:11434"
embedding_model = "all-minilm"
embedding_dim = 384
embedding_batch = 32
search_by_name_limit = 20
max_traversal_depth = 5
# db_path_override = "/var/lib/medixlm/knowledge.sqlite3"

[database]
# path_override = "/var/lib/medixlm/conversations.sqlite3"

[logging]
level = "info"
"#;

/// Settings loaded from TOML configuration file.
///
/// These are non-sensitive configuration values that can be safely
/// stored in files and version controlled.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Gateway server configuration
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Generation backend configuration
    #[serde(default)]
    pub generation: GenerationSettings,

    /// Chat pipeline tuning
    #[serde(default)]
    pub chat: ChatSettings,

    /// Knowledge store and embedding configuration
    #[serde(default)]
    pub knowledge: KnowledgeToolsSettings,

    /// Conversation database configuration
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Gateway server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewaySettings {
    /// Host to bind to
    #[serde(default = "default_gateway_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

/// Generation backend settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationSettings {
    /// Provider type ("openai_compatible" or "ollama")
    #[serde(
        default = "default_generation_provider",
        deserialize_with = "deserialize_provider",
        serialize_with = "serialize_provider"
    )]
    pub provider: ProviderType,

    /// Model identifier
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Base URL of the backend
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    /// Env var name used to resolve the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Text substituted for the assistant reply when generation fails
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

/// Chat pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatSettings {
    /// Number of prior messages fed back to the model.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Character budget for the history window; oldest entries are dropped first.
    #[serde(default = "default_history_char_budget")]
    pub history_char_budget: usize,

    /// TTL of cached responses in seconds
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Maximum knowledge nodes retrieved per message
    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,

    /// Persist the partial assistant reply when a streaming caller disconnects.
    #[serde(default)]
    pub persist_partial_on_cancel: bool,

    /// Optional file whose content replaces the built-in persona.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_path: Option<String>,
}

/// Knowledge configuration as written in TOML (all optional).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KnowledgeToolsSettings {
    /// Embedding provider base URL
    pub embedding_url: Option<String>,

    /// Embedding model name
    pub embedding_model: Option<String>,

    /// Embedding dimension of the deployment
    pub embedding_dim: Option<usize>,

    /// Embedding batch size
    pub embedding_batch: Option<usize>,

    /// Maximum rows returned by substring name search
    pub search_by_name_limit: Option<usize>,

    /// Upper bound accepted for relationship traversal depth
    pub max_traversal_depth: Option<u8>,

    /// Optional override for knowledge DB path
    pub db_path_override: Option<String>,
}

/// Conversation database settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseSettings {
    /// Optional override for the conversation DB path
    pub path_override: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_generation_provider() -> ProviderType {
    ProviderType::OpenAiCompatible
}

fn default_generation_model() -> String {
    "llama3.1".to_string()
}

fn default_generation_base_url() -> String {
    "http://127.0.0.1:8080/v1".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_generation_timeout_seconds() -> u64 {
    120
}

fn default_fallback_message() -> String {
    "I'm sorry, I'm unable to generate a response right now. Please try again shortly, \
     and consult a healthcare professional for urgent concerns."
        .to_string()
}

fn default_history_window() -> usize {
    10
}

fn default_history_char_budget() -> usize {
    12_000
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

fn default_retrieval_limit() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            base_url: default_generation_base_url(),
            api_key_env: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_generation_timeout_seconds(),
            fallback_message: default_fallback_message(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            history_char_budget: default_history_char_budget(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            retrieval_limit: default_retrieval_limit(),
            persist_partial_on_cancel: false,
            persona_path: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn deserialize_provider<'de, D>(deserializer: D) -> Result<ProviderType, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value.parse().map_err(serde::de::Error::custom)
}

fn serialize_provider<S>(provider: &ProviderType, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(provider.as_str())
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl Settings {
    /// Load settings from the TOML configuration file.
    ///
    /// If the config file doesn't exist, creates it with default values.
    /// The file is located at `~/.config/medixlm/config.toml`.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!("Creating default configuration at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        let content = fs::read_to_string(&config_path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize settings to TOML content.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the configuration file path.
    ///
    /// Uses XDG config directory: `~/.config/medixlm/config.toml`
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_dir) = std::env::var("MEDIXLM_CONFIG_DIR") {
            return Ok(PathBuf::from(override_dir).join("config.toml"));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("medixlm");
        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    fn validate(&self) -> Result<(), SettingsError> {
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(SettingsError::Invalid {
                field: "generation.temperature",
                reason: format!("{} is outside 0.0..=2.0", self.generation.temperature),
            });
        }
        if self.generation.fallback_message.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "generation.fallback_message",
                reason: "must not be empty".to_string(),
            });
        }
        if self.chat.retrieval_limit == 0 {
            return Err(SettingsError::Invalid {
                field: "chat.retrieval_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Get the HTTP bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.gateway.host, self.gateway.port)
    }

    /// Name of the env var holding the generation API key.
    pub fn api_key_env(&self) -> &str {
        self.generation
            .api_key_env
            .as_deref()
            .unwrap_or("MEDIXLM_API_KEY")
    }
}
