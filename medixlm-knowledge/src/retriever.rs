//! Best-effort knowledge retrieval for the chat path.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::KnowledgeSettings;
use crate::embeddings::EmbeddingProvider;
use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{KnowledgeNode, KnowledgeType, RelationshipType, ScoredNode};
use crate::similarity::rank;
use crate::storage::KnowledgeStore;

/// Answers "what do we know relevant to this text?".
#[derive(Clone)]
pub struct KnowledgeRetriever {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: KnowledgeSettings,
}

impl KnowledgeRetriever {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: KnowledgeSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Ranked nodes similar to `query`.
    ///
    /// Never fails: embedding or search errors are logged and yield an
    /// empty list.
    pub async fn retrieve(
        &self,
        query: &str,
        type_filter: Option<KnowledgeType>,
        limit: usize,
    ) -> Vec<ScoredNode> {
        match self.try_retrieve(query, type_filter, limit).await {
            Ok(results) => results,
            Err(err) => {
                warn!(error = %err, "knowledge retrieval failed, continuing without knowledge");
                Vec::new()
            }
        }
    }

    /// Like [`Self::retrieve`] but surfaces the failure.
    pub async fn try_retrieve(
        &self,
        query: &str,
        type_filter: Option<KnowledgeType>,
        limit: usize,
    ) -> KnowledgeResult<Vec<ScoredNode>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        if vector.len() != self.settings.embedding_dim {
            return Err(KnowledgeError::EmbeddingDimMismatch {
                expected: self.settings.embedding_dim,
                actual: vector.len(),
            });
        }

        let results = self
            .store
            .similarity_search(&vector, type_filter, limit)
            .await?;
        debug!(hits = results.len(), "knowledge retrieved");

        // stores may rank differently; the ordering contract is enforced here
        Ok(rank(results, limit))
    }

    pub async fn get_node(&self, id: &str) -> KnowledgeResult<KnowledgeNode> {
        self.store
            .get_node_by_id(id)
            .await?
            .ok_or_else(|| KnowledgeError::NodeNotFound(id.to_string()))
    }

    pub async fn search_by_name(
        &self,
        substring: &str,
        type_filter: Option<KnowledgeType>,
    ) -> KnowledgeResult<Vec<KnowledgeNode>> {
        self.store
            .search_by_name(substring, type_filter, self.settings.search_by_name_limit)
            .await
    }

    /// Distinct nodes within `depth` hops of an existing node.
    pub async fn related(
        &self,
        node_id: &str,
        relationship_type: Option<RelationshipType>,
        depth: u8,
    ) -> KnowledgeResult<Vec<KnowledgeNode>> {
        let max = self.settings.max_traversal_depth;
        if depth == 0 || depth > max {
            return Err(KnowledgeError::InvalidDepth { depth, max });
        }
        self.get_node(node_id).await?;
        self.store
            .get_related_nodes(node_id, relationship_type, depth)
            .await
    }
}
