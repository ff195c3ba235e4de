use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medixlm_db::ConversationDb;
use medixlm_gateway::cache::InMemoryCache;
use medixlm_gateway::chat::{ContextAssembler, ResponseGenerator};
use medixlm_gateway::orchestrator::{ChatOrchestrator, OrchestratorSettings};
use medixlm_gateway::providers;
use medixlm_gateway::server;
use medixlm_gateway::state::AppState;
use medixlm_knowledge::{
    EmbeddingClient, KnowledgeCurator, KnowledgeRetriever, SqliteKnowledgeStore, paths,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first: it carries the fallback log level
    let config = medixlm_core::Config::load()?;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.settings.logging.level.clone().into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Configuration loaded (generation: {} -> {} at {})",
        config.settings.generation.provider,
        config.settings.generation.model,
        config.settings.generation.base_url
    );

    // Conversation log
    let conversation_db = match config.settings.database.path_override.as_deref() {
        Some(path) => ConversationDb::open(&PathBuf::from(path)).await?,
        None => ConversationDb::new().await?,
    };
    info!("Conversation database initialized");

    // Knowledge store and embeddings
    let knowledge_settings = config.knowledge();
    let knowledge_path = paths::knowledge_db_path(&knowledge_settings)?;
    let store = Arc::new(
        SqliteKnowledgeStore::open(&knowledge_path, knowledge_settings.embedding_dim).await?,
    );
    let embedder = Arc::new(EmbeddingClient::new(&knowledge_settings)?);
    info!(
        "Knowledge store opened at {} (embedding model: {}, dim: {})",
        knowledge_path.display(),
        knowledge_settings.embedding_model,
        knowledge_settings.embedding_dim
    );

    let retriever = KnowledgeRetriever::new(store.clone(), embedder.clone(), knowledge_settings);
    let curator = KnowledgeCurator::new(store, embedder);

    // Generation backend
    let provider = providers::from_config(&config)?;
    info!("Generation provider ready: {}", provider.name());

    let assembler =
        ContextAssembler::from_settings(&config.settings.chat, config.persona_override()?);
    let generator = ResponseGenerator::from_settings(provider, &config.settings.generation);

    let orchestrator = ChatOrchestrator::new(
        Arc::new(conversation_db),
        retriever.clone(),
        assembler,
        generator,
        Arc::new(InMemoryCache::new()),
        OrchestratorSettings::from(&config.settings.chat),
    );
    let state = AppState::new(orchestrator, retriever, curator);

    // Security: Verify localhost-only binding
    if config.settings.gateway.host != "127.0.0.1" && config.settings.gateway.host != "localhost" {
        tracing::warn!(
            "Gateway binding to non-localhost address: {}. This may expose the API to remote access.",
            config.settings.gateway.host
        );
    }

    let bind_addr = config.bind_addr();
    info!("Starting MediXLM server on {}", bind_addr);

    server::run(state, &bind_addr).await
}
