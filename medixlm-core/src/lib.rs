pub mod config;
pub mod provider;

// Config re-exports
pub use config::{
    ChatSettings, Config, ConfigError, DatabaseSettings, GatewaySettings, GenerationSettings,
    KnowledgeSettings, KnowledgeToolsSettings, LoggingSettings, Secrets, Settings, SettingsError,
    load_dotenv,
};

pub use provider::ProviderType;

#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
