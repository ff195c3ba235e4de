use medixlm_knowledge::{KnowledgeCurator, KnowledgeRetriever};

use crate::orchestrator::ChatOrchestrator;

/// Shared application state handed to every HTTP handler.
///
/// Every collaborator is built once at startup and cloned cheaply.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ChatOrchestrator,
    pub retriever: KnowledgeRetriever,
    pub curator: KnowledgeCurator,
}

impl AppState {
    pub fn new(
        orchestrator: ChatOrchestrator,
        retriever: KnowledgeRetriever,
        curator: KnowledgeCurator,
    ) -> Self {
        Self {
            orchestrator,
            retriever,
            curator,
        }
    }
}
