//! Generation provider identifiers shared by configuration and the gateway.

use serde::{Deserialize, Serialize};

/// Supported generation backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Any server speaking the OpenAI Chat Completions API (vLLM, llama.cpp, OpenAI).
    OpenAiCompatible,
    /// Ollama's native `/api/chat` endpoint.
    Ollama,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAiCompatible => "openai_compatible",
            ProviderType::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai_compatible" | "openai-compatible" | "openaicompatible" => {
                Ok(ProviderType::OpenAiCompatible)
            }
            "ollama" => Ok(ProviderType::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}
