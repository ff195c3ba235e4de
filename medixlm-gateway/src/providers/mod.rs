pub mod lines;
pub mod ollama;
pub mod openai_compatible;
pub mod provider;

use std::sync::Arc;
use std::time::Duration;

use medixlm_core::{Config, ProviderType};

pub use provider::{
    ChatMessage, ChatRole, GenerationOptions, Provider, ProviderError, ProviderResponse,
    ProviderStream, ProviderUsage, StreamEvent,
};

/// Build the configured generation backend.
pub fn from_config(config: &Config) -> Result<Arc<dyn Provider>, ProviderError> {
    let generation = &config.settings.generation;
    let timeout = Duration::from_secs(generation.timeout_seconds);
    let provider: Arc<dyn Provider> = match generation.provider {
        ProviderType::OpenAiCompatible => Arc::new(openai_compatible::OpenAiCompatibleClient::new(
            &generation.base_url,
            config.generation_api_key().map(str::to_string),
            &generation.model,
            timeout,
        )?),
        ProviderType::Ollama => Arc::new(ollama::OllamaClient::new(
            &generation.base_url,
            &generation.model,
            timeout,
        )?),
    };
    Ok(provider)
}
