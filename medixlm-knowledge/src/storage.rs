//! Knowledge Store: typed nodes, typed relationships, vector search.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{debug, info};

use crate::embeddings::check_dims;
use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::graph::expand_related;
use crate::models::{
    KnowledgeNode, KnowledgeType, Properties, Relationship, RelationshipType, ScoredNode,
};
use crate::similarity::{blob_to_vec, cosine_similarity, rank, vec_to_blob};

/// Graph of knowledge nodes with vector similarity search.
///
/// Relationship types only ever arrive here as [`RelationshipType`], so no
/// caller-supplied string reaches a query.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn create_node(&self, node: KnowledgeNode) -> KnowledgeResult<KnowledgeNode>;

    async fn get_node_by_id(&self, id: &str) -> KnowledgeResult<Option<KnowledgeNode>>;

    /// Replace the mutable fields of an existing node.
    async fn update_node(&self, node: &KnowledgeNode) -> KnowledgeResult<()>;

    /// Case-insensitive substring match on node names.
    async fn search_by_name(
        &self,
        substring: &str,
        type_filter: Option<KnowledgeType>,
        limit: usize,
    ) -> KnowledgeResult<Vec<KnowledgeNode>>;

    /// Create an edge; both endpoints must exist. Re-linking the same
    /// `(source, target, type)` replaces its properties.
    async fn create_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relationship_type: RelationshipType,
        properties: Properties,
    ) -> KnowledgeResult<Relationship>;

    /// Nodes one hop away in either direction.
    async fn neighbors(
        &self,
        node_id: &str,
        type_filter: Option<RelationshipType>,
    ) -> KnowledgeResult<Vec<KnowledgeNode>>;

    /// Distinct nodes reachable within `depth` hops, excluding `node_id`.
    async fn get_related_nodes(
        &self,
        node_id: &str,
        type_filter: Option<RelationshipType>,
        depth: u8,
    ) -> KnowledgeResult<Vec<KnowledgeNode>> {
        expand_related(node_id, depth, |id| async move {
            self.neighbors(&id, type_filter).await
        })
        .await
    }

    /// Top `limit` embedded nodes by cosine similarity to `vector`.
    async fn similarity_search(
        &self,
        vector: &[f32],
        type_filter: Option<KnowledgeType>,
        limit: usize,
    ) -> KnowledgeResult<Vec<ScoredNode>>;
}

const NODE_COLUMNS: &str = "n.id, n.name, n.node_type, n.description, n.properties, n.embedding, \
                            n.confidence_score, n.source, n.created_at, n.updated_at";

/// SQLite-backed store. Embeddings live in a BLOB column and are ranked
/// in-process.
#[derive(Debug, Clone)]
pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
    embedding_dim: usize,
}

impl SqliteKnowledgeStore {
    pub async fn open(db_path: &Path, embedding_dim: usize) -> KnowledgeResult<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode = WAL")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA synchronous = NORMAL")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA cache_size = -64000")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await?;

        Self::from_pool(pool, embedding_dim).await
    }

    /// Private in-memory database, for tests and ephemeral runs.
    pub async fn open_in_memory(embedding_dim: usize) -> KnowledgeResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        // one connection: each :memory: connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool, embedding_dim).await
    }

    async fn from_pool(pool: SqlitePool, embedding_dim: usize) -> KnowledgeResult<Self> {
        sqlx::migrate!("./migrations/knowledge").run(&pool).await?;
        ensure_embedding_dim(&pool, embedding_dim).await?;
        info!(embedding_dim, "knowledge store ready");
        Ok(Self {
            pool,
            embedding_dim,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn node_exists(&self, id: &str) -> KnowledgeResult<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM knowledge_nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

/// The dimensionality is fixed per database; vectors of another size are
/// never comparable with what is already stored.
async fn ensure_embedding_dim(pool: &SqlitePool, embedding_dim: usize) -> KnowledgeResult<()> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT value FROM meta WHERE key = 'embedding_dim' LIMIT 1")
            .fetch_optional(pool)
            .await?;

    if let Some((value,)) = existing {
        if let Ok(stored) = value.parse::<usize>() {
            if stored != embedding_dim {
                return Err(KnowledgeError::EmbeddingDimMismatch {
                    expected: stored,
                    actual: embedding_dim,
                });
            }
            return Ok(());
        }
    }

    sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES ('embedding_dim', ?)")
        .bind(embedding_dim.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn create_node(&self, node: KnowledgeNode) -> KnowledgeResult<KnowledgeNode> {
        if let Some(embedding) = &node.embedding {
            check_dims(self.embedding_dim, embedding)?;
        }
        let properties = serde_json::to_string(&node.properties)?;

        sqlx::query(
            "INSERT INTO knowledge_nodes
                (id, name, node_type, description, properties, embedding, embedding_dim,
                 confidence_score, source, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&node.id)
        .bind(&node.name)
        .bind(node.node_type.as_str())
        .bind(&node.description)
        .bind(&properties)
        .bind(node.embedding.as_deref().map(vec_to_blob))
        .bind(node.embedding.as_ref().map(|e| e.len() as i64))
        .bind(f64::from(node.confidence_score))
        .bind(&node.source)
        .bind(node.created_at)
        .bind(node.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("[knowledge:{}] created {} node", node.id, node.node_type);
        Ok(node)
    }

    async fn get_node_by_id(&self, id: &str) -> KnowledgeResult<Option<KnowledgeNode>> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM knowledge_nodes n WHERE n.id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(KnowledgeNode::try_from).transpose()
    }

    async fn update_node(&self, node: &KnowledgeNode) -> KnowledgeResult<()> {
        if let Some(embedding) = &node.embedding {
            check_dims(self.embedding_dim, embedding)?;
        }
        let properties = serde_json::to_string(&node.properties)?;

        let result = sqlx::query(
            "UPDATE knowledge_nodes
             SET name = ?, description = ?, properties = ?, embedding = ?, embedding_dim = ?,
                 confidence_score = ?, source = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&node.name)
        .bind(&node.description)
        .bind(&properties)
        .bind(node.embedding.as_deref().map(vec_to_blob))
        .bind(node.embedding.as_ref().map(|e| e.len() as i64))
        .bind(f64::from(node.confidence_score))
        .bind(&node.source)
        .bind(node.updated_at)
        .bind(&node.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KnowledgeError::NodeNotFound(node.id.clone()));
        }
        Ok(())
    }

    async fn search_by_name(
        &self,
        substring: &str,
        type_filter: Option<KnowledgeType>,
        limit: usize,
    ) -> KnowledgeResult<Vec<KnowledgeNode>> {
        let pattern = format!("%{}%", escape_like(substring.trim()));
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM knowledge_nodes n
             WHERE n.name LIKE ? ESCAPE '\\'
               AND (? IS NULL OR n.node_type = ?)
             ORDER BY n.name ASC
             LIMIT ?"
        ))
        .bind(&pattern)
        .bind(type_filter.map(|t| t.as_str()))
        .bind(type_filter.map(|t| t.as_str()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(KnowledgeNode::try_from).collect()
    }

    async fn create_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relationship_type: RelationshipType,
        properties: Properties,
    ) -> KnowledgeResult<Relationship> {
        for id in [source_id, target_id] {
            if !self.node_exists(id).await? {
                return Err(KnowledgeError::NodeNotFound(id.to_string()));
            }
        }

        let relationship = Relationship::new(source_id, target_id, relationship_type, properties);
        let properties = serde_json::to_string(&relationship.properties)?;

        sqlx::query(
            "INSERT INTO knowledge_relationships
                (id, source_id, target_id, relationship_type, properties, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(source_id, target_id, relationship_type)
             DO UPDATE SET properties = excluded.properties",
        )
        .bind(&relationship.id)
        .bind(&relationship.source_id)
        .bind(&relationship.target_id)
        .bind(relationship.relationship_type.as_str())
        .bind(&properties)
        .bind(relationship.created_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, RelationshipRow>(
            "SELECT id, source_id, target_id, relationship_type, properties, created_at
             FROM knowledge_relationships
             WHERE source_id = ? AND target_id = ? AND relationship_type = ?",
        )
        .bind(source_id)
        .bind(target_id)
        .bind(relationship_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        debug!(
            "[knowledge:{}] {} -> {}",
            source_id, relationship_type, target_id
        );
        Relationship::try_from(row)
    }

    async fn neighbors(
        &self,
        node_id: &str,
        type_filter: Option<RelationshipType>,
    ) -> KnowledgeResult<Vec<KnowledgeNode>> {
        let type_filter = type_filter.map(|t| t.as_str());
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM knowledge_relationships r
             JOIN knowledge_nodes n ON n.id = r.target_id
             WHERE r.source_id = ? AND (? IS NULL OR r.relationship_type = ?)
             UNION
             SELECT {NODE_COLUMNS} FROM knowledge_relationships r
             JOIN knowledge_nodes n ON n.id = r.source_id
             WHERE r.target_id = ? AND (? IS NULL OR r.relationship_type = ?)
             ORDER BY 2"
        ))
        .bind(node_id)
        .bind(type_filter)
        .bind(type_filter)
        .bind(node_id)
        .bind(type_filter)
        .bind(type_filter)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(KnowledgeNode::try_from).collect()
    }

    async fn similarity_search(
        &self,
        vector: &[f32],
        type_filter: Option<KnowledgeType>,
        limit: usize,
    ) -> KnowledgeResult<Vec<ScoredNode>> {
        check_dims(self.embedding_dim, vector)?;

        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM knowledge_nodes n
             WHERE n.embedding IS NOT NULL AND n.embedding_dim = ?
               AND (? IS NULL OR n.node_type = ?)"
        ))
        .bind(self.embedding_dim as i64)
        .bind(type_filter.map(|t| t.as_str()))
        .bind(type_filter.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let node = KnowledgeNode::try_from(row)?;
            let Some(embedding) = node.embedding.as_deref() else {
                continue;
            };
            let score = cosine_similarity(vector, embedding);
            scored.push(ScoredNode { node, score });
        }

        Ok(rank(scored, limit))
    }
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, sqlx::FromRow)]
struct NodeRow {
    id: String,
    name: String,
    node_type: String,
    description: Option<String>,
    properties: String,
    embedding: Option<Vec<u8>>,
    confidence_score: f64,
    source: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NodeRow> for KnowledgeNode {
    type Error = KnowledgeError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        Ok(KnowledgeNode {
            id: row.id,
            name: row.name,
            node_type: row.node_type.parse()?,
            description: row.description,
            properties: serde_json::from_str(&row.properties)?,
            embedding: row.embedding.as_deref().map(blob_to_vec),
            confidence_score: row.confidence_score as f32,
            source: row.source,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RelationshipRow {
    id: String,
    source_id: String,
    target_id: String,
    relationship_type: String,
    properties: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RelationshipRow> for Relationship {
    type Error = KnowledgeError;

    fn try_from(row: RelationshipRow) -> Result<Self, Self::Error> {
        Ok(Relationship {
            id: row.id,
            source_id: row.source_id,
            target_id: row.target_id,
            relationship_type: row.relationship_type.parse()?,
            properties: serde_json::from_str(&row.properties)?,
            created_at: row.created_at,
        })
    }
}
