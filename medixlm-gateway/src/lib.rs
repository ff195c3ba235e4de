//! MediXLM gateway: the retrieval-augmented chat pipeline and its HTTP surface.

pub mod cache;
pub mod chat;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod server;
pub mod state;

pub use cache::{Cache, CacheError, InMemoryCache};
pub use orchestrator::{
    ChatError, ChatOrchestrator, ChatRequest, ChatResponse, ChatStreamEvent, OrchestratorSettings,
};
pub use providers::{Provider, ProviderError, ProviderResponse, ProviderUsage};
pub use state::AppState;
