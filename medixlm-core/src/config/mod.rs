//! Configuration management for medixlm.
//!
//! Secrets come from environment variables, settings from a TOML file.
//!
//! # Configuration Sources
//!
//! ## Secrets (Environment Variables)
//! - the variable named by `generation.api_key_env` (default `MEDIXLM_API_KEY`)
//!
//! ## Settings (TOML File)
//! Located at `~/.config/medixlm/config.toml` (or `$MEDIXLM_CONFIG_DIR/config.toml`):
//! ```toml
//! [gateway]
//! host = "127.0.0.1"
//! port = 8000
//!
//! [generation]
//! provider = "openai_compatible"
//! model = "llama3.1"
//! base_url = "http://127.0.0.1:8080/v1"
//!
//! [chat]
//! history_window = 10
//!
//! [logging]
//! level = "info"
//! ```

pub mod knowledge;
mod secrets;
mod settings;

use std::path::PathBuf;

pub use knowledge::KnowledgeSettings;
pub use secrets::Secrets;
pub use settings::{
    ChatSettings, DatabaseSettings, GatewaySettings, GenerationSettings, KnowledgeToolsSettings,
    LoggingSettings, Settings, SettingsError,
};

/// Combined configuration containing both secrets and settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secrets loaded from environment variables
    pub secrets: Secrets,
    /// Settings loaded from TOML configuration file
    pub settings: Settings,
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Persona file {path} could not be read: {source}")]
    Persona {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Settings are read first because they name the env var that holds
    /// the generation API key.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Settings::load()?;
        let secrets = Secrets::from_env(settings.api_key_env());
        Ok(Self { secrets, settings })
    }

    /// Get the HTTP bind address.
    pub fn bind_addr(&self) -> String {
        self.settings.bind_addr()
    }

    /// Get the generation API key (if configured).
    pub fn generation_api_key(&self) -> Option<&str> {
        self.secrets.generation_api_key.as_deref()
    }

    /// Resolved knowledge settings.
    pub fn knowledge(&self) -> KnowledgeSettings {
        KnowledgeSettings::from(&self.settings.knowledge)
    }

    /// Read the persona override file, if one is configured.
    pub fn persona_override(&self) -> Result<Option<String>, ConfigError> {
        let Some(path) = self.settings.chat.persona_path.as_deref() else {
            return Ok(None);
        };
        let path = PathBuf::from(path);
        let text = std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::Persona { path, source })?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(trimmed.to_string()))
    }
}

/// Load .env file if it exists (for development convenience).
///
/// This is called automatically by `Config::load()` but is also
/// exported for use in other contexts.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}
