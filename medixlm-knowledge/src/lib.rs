//! Medical knowledge graph and retrieval for MediXLM.

pub mod curation;
pub mod embeddings;
pub mod errors;
pub mod graph;
pub mod memory;
pub mod models;
pub mod paths;
pub mod retriever;
pub mod similarity;
pub mod storage;

pub use curation::KnowledgeCurator;
pub use embeddings::{EmbeddingClient, EmbeddingProvider, HashingEmbedder};
pub use errors::{KnowledgeError, KnowledgeResult};
pub use medixlm_core::config::KnowledgeSettings;
pub use memory::InMemoryKnowledgeStore;
pub use models::{
    KnowledgeNode, KnowledgeSummary, KnowledgeType, KnowledgeUpdate, NewKnowledgeNode,
    Properties, Relationship, RelationshipType, ScoredNode,
};
pub use retriever::KnowledgeRetriever;
pub use storage::{KnowledgeStore, SqliteKnowledgeStore};
