//! Curation workflow: the only writers of nodes and relationships.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::embeddings::EmbeddingProvider;
use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{
    KnowledgeNode, KnowledgeUpdate, NewKnowledgeNode, Properties, Relationship, RelationshipType,
    embedding_text, validate_confidence,
};
use crate::storage::KnowledgeStore;

#[derive(Clone)]
pub struct KnowledgeCurator {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl KnowledgeCurator {
    pub fn new(store: Arc<dyn KnowledgeStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Embed `"{name}. {description}"` and store the node.
    pub async fn add_knowledge(&self, request: NewKnowledgeNode) -> KnowledgeResult<KnowledgeNode> {
        if request.name.trim().is_empty() {
            return Err(KnowledgeError::MissingField("name"));
        }
        let text = embedding_text(request.name.trim(), request.description.as_deref());
        let embedding = self.embedder.embed(&text).await?;
        let node = request.into_node(Some(embedding))?;
        let node = self.store.create_node(node).await?;
        info!("[knowledge:{}] added {} '{}'", node.id, node.node_type, node.name);
        Ok(node)
    }

    pub async fn link_knowledge(
        &self,
        source_id: &str,
        target_id: &str,
        relationship_type: RelationshipType,
        properties: Properties,
    ) -> KnowledgeResult<Relationship> {
        self.store
            .create_relationship(source_id, target_id, relationship_type, properties)
            .await
    }

    /// Apply a partial update; the embedding is recomputed when name or
    /// description change.
    pub async fn update_knowledge(
        &self,
        id: &str,
        update: KnowledgeUpdate,
    ) -> KnowledgeResult<KnowledgeNode> {
        let mut node = self
            .store
            .get_node_by_id(id)
            .await?
            .ok_or_else(|| KnowledgeError::NodeNotFound(id.to_string()))?;

        let reembed = update.touches_embedding_text();
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(KnowledgeError::MissingField("name"));
            }
            node.name = name.trim().to_string();
        }
        if let Some(description) = update.description {
            node.description = Some(description);
        }
        if let Some(properties) = update.properties {
            node.properties = properties;
        }
        if let Some(source) = update.source {
            node.source = Some(source);
        }
        if let Some(confidence) = update.confidence_score {
            validate_confidence(confidence)?;
            node.confidence_score = confidence;
        }
        if reembed {
            node.embedding = Some(self.embedder.embed(&node.embedding_text()).await?);
        }
        node.updated_at = Utc::now();

        self.store.update_node(&node).await?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::memory::InMemoryKnowledgeStore;
    use crate::models::KnowledgeType;

    fn curator() -> (KnowledgeCurator, Arc<HashingEmbedder>) {
        let embedder = Arc::new(HashingEmbedder::new(32));
        let store = Arc::new(InMemoryKnowledgeStore::new(32));
        (KnowledgeCurator::new(store, embedder.clone()), embedder)
    }

    #[tokio::test]
    async fn test_add_knowledge_embeds_name_and_description() {
        let (curator, embedder) = curator();
        let node = curator
            .add_knowledge(
                NewKnowledgeNode::new("Metformin", KnowledgeType::Medication)
                    .with_description("First-line oral therapy for type 2 diabetes"),
            )
            .await
            .unwrap();

        assert_eq!(
            node.embedding,
            Some(embedder.embed_text(
                "Metformin. First-line oral therapy for type 2 diabetes"
            ))
        );
        assert_eq!(node.confidence_score, 1.0);
    }

    #[tokio::test]
    async fn test_update_reembeds_only_on_text_change() {
        let (curator, embedder) = curator();
        let node = curator
            .add_knowledge(NewKnowledgeNode::new("Flu", KnowledgeType::Disease))
            .await
            .unwrap();

        let updated = curator
            .update_knowledge(
                &node.id,
                KnowledgeUpdate {
                    confidence_score: Some(0.5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.embedding, node.embedding);
        assert!(updated.updated_at >= node.updated_at);

        let updated = curator
            .update_knowledge(
                &node.id,
                KnowledgeUpdate {
                    description: Some("Seasonal influenza".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            updated.embedding,
            Some(embedder.embed_text("Flu. Seasonal influenza"))
        );
        assert_eq!(updated.confidence_score, 0.5);
    }

    #[tokio::test]
    async fn test_update_rejects_bad_confidence() {
        let (curator, _) = curator();
        let node = curator
            .add_knowledge(NewKnowledgeNode::new("Flu", KnowledgeType::Disease))
            .await
            .unwrap();
        let err = curator
            .update_knowledge(
                &node.id,
                KnowledgeUpdate {
                    confidence_score: Some(-0.1),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
