use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embeddings::check_dims;
use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{
    KnowledgeNode, KnowledgeType, Properties, Relationship, RelationshipType, ScoredNode,
};
use crate::similarity::{cosine_similarity, rank};
use crate::storage::KnowledgeStore;

#[derive(Default)]
struct Graph {
    nodes: HashMap<String, KnowledgeNode>,
    relationships: Vec<Relationship>,
}

/// Process-local store with the same contract as the SQLite one.
pub struct InMemoryKnowledgeStore {
    embedding_dim: usize,
    graph: RwLock<Graph>,
}

impl InMemoryKnowledgeStore {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            graph: RwLock::new(Graph::default()),
        }
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn create_node(&self, node: KnowledgeNode) -> KnowledgeResult<KnowledgeNode> {
        if let Some(embedding) = &node.embedding {
            check_dims(self.embedding_dim, embedding)?;
        }
        self.graph
            .write()
            .await
            .nodes
            .insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn get_node_by_id(&self, id: &str) -> KnowledgeResult<Option<KnowledgeNode>> {
        Ok(self.graph.read().await.nodes.get(id).cloned())
    }

    async fn update_node(&self, node: &KnowledgeNode) -> KnowledgeResult<()> {
        if let Some(embedding) = &node.embedding {
            check_dims(self.embedding_dim, embedding)?;
        }
        let mut graph = self.graph.write().await;
        let existing = graph
            .nodes
            .get_mut(&node.id)
            .ok_or_else(|| KnowledgeError::NodeNotFound(node.id.clone()))?;
        let created_at = existing.created_at;
        *existing = node.clone();
        existing.created_at = created_at;
        Ok(())
    }

    async fn search_by_name(
        &self,
        substring: &str,
        type_filter: Option<KnowledgeType>,
        limit: usize,
    ) -> KnowledgeResult<Vec<KnowledgeNode>> {
        let needle = substring.trim().to_lowercase();
        let graph = self.graph.read().await;
        let mut matches: Vec<KnowledgeNode> = graph
            .nodes
            .values()
            .filter(|node| type_filter.is_none_or(|t| node.node_type == t))
            .filter(|node| node.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn create_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relationship_type: RelationshipType,
        properties: Properties,
    ) -> KnowledgeResult<Relationship> {
        let mut graph = self.graph.write().await;
        for id in [source_id, target_id] {
            if !graph.nodes.contains_key(id) {
                return Err(KnowledgeError::NodeNotFound(id.to_string()));
            }
        }

        if let Some(existing) = graph.relationships.iter_mut().find(|r| {
            r.source_id == source_id
                && r.target_id == target_id
                && r.relationship_type == relationship_type
        }) {
            existing.properties = properties;
            return Ok(existing.clone());
        }

        let relationship = Relationship::new(source_id, target_id, relationship_type, properties);
        graph.relationships.push(relationship.clone());
        Ok(relationship)
    }

    async fn neighbors(
        &self,
        node_id: &str,
        type_filter: Option<RelationshipType>,
    ) -> KnowledgeResult<Vec<KnowledgeNode>> {
        let graph = self.graph.read().await;
        let mut out: Vec<KnowledgeNode> = Vec::new();
        for rel in &graph.relationships {
            if type_filter.is_some_and(|t| rel.relationship_type != t) {
                continue;
            }
            let other = if rel.source_id == node_id {
                &rel.target_id
            } else if rel.target_id == node_id {
                &rel.source_id
            } else {
                continue;
            };
            if let Some(node) = graph.nodes.get(other)
                && !out.iter().any(|n| n.id == node.id)
            {
                out.push(node.clone());
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn similarity_search(
        &self,
        vector: &[f32],
        type_filter: Option<KnowledgeType>,
        limit: usize,
    ) -> KnowledgeResult<Vec<ScoredNode>> {
        check_dims(self.embedding_dim, vector)?;
        let graph = self.graph.read().await;
        let scored = graph
            .nodes
            .values()
            .filter(|node| type_filter.is_none_or(|t| node.node_type == t))
            .filter_map(|node| {
                let embedding = node.embedding.as_deref()?;
                (embedding.len() == vector.len()).then(|| ScoredNode {
                    score: cosine_similarity(vector, embedding),
                    node: node.clone(),
                })
            })
            .collect();
        Ok(rank(scored, limit))
    }
}
