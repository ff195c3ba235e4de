//! Secrets configuration loaded from environment variables only.
//!
//! API keys are never stored in the TOML settings file.

use std::env;

/// Secrets loaded exclusively from environment variables.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// Generation backend API key (env var named by `generation.api_key_env`)
    pub generation_api_key: Option<String>,
}

impl Secrets {
    /// Load secrets from environment variables.
    ///
    /// This function also loads .env file if present (for development),
    /// but production should rely on actual environment variables.
    pub fn from_env(api_key_env: &str) -> Self {
        let _ = dotenvy::dotenv();

        Self::from_env_inner(api_key_env)
    }

    /// Internal method to load from environment without loading .env
    pub(crate) fn from_env_inner(api_key_env: &str) -> Self {
        let generation_api_key = env::var(api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Self { generation_api_key }
    }
}
