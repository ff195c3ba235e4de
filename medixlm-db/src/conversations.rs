//! Conversation and message storage.
//!
//! Messages are append-only: the repository exposes no update or delete
//! for them, and listing always follows insertion order.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// Open, loosely-typed metadata attached to a message.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Message role types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            _ => Err(DbError::InvalidRole(s.to_string())),
        }
    }
}

/// A conversation (ordered message container) owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    /// Unix milliseconds
    pub created_at: i64,
    /// Unix milliseconds, bumped on every append
    pub updated_at: i64,
    pub is_active: bool,
}

/// A stored message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub tokens_used: Option<u32>,
    pub metadata: Metadata,
    /// Unix milliseconds
    pub created_at: i64,
}

/// A message about to be appended; id and timestamp are assigned by the log.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub tokens_used: Option<u32>,
    pub metadata: Metadata,
}

impl NewMessage {
    pub fn new(
        conversation_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            tokens_used: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_tokens_used(mut self, tokens_used: Option<u32>) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Stamp an id and creation time onto this message.
    pub(crate) fn into_message(self) -> Message {
        Message {
            id: format!("msg_{}", Uuid::new_v4()),
            conversation_id: self.conversation_id,
            role: self.role,
            content: self.content,
            tokens_used: self.tokens_used,
            metadata: self.metadata,
            created_at: Utc::now().timestamp_millis(),
        }
    }
}

/// Build a fresh conversation record with a generated id.
pub(crate) fn new_conversation(user_id: &str, title: Option<&str>) -> Conversation {
    let now = Utc::now().timestamp_millis();
    Conversation {
        id: format!("conv_{}", Uuid::new_v4()),
        user_id: user_id.to_string(),
        title: title.map(str::to_string),
        created_at: now,
        updated_at: now,
        is_active: true,
    }
}

/// Conversation repository for database operations
pub struct ConversationRepository;

impl ConversationRepository {
    /// Create a new conversation
    pub async fn create(
        pool: &SqlitePool,
        user_id: &str,
        title: Option<&str>,
    ) -> DbResult<Conversation> {
        let conversation = new_conversation(user_id, title);

        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at, is_active)
             VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(pool)
        .await?;

        info!(
            "Created new conversation: {} for user: {}",
            conversation.id, user_id
        );

        Ok(conversation)
    }

    /// Get conversation by ID
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> DbResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, user_id, title, created_at, updated_at, is_active
             FROM conversations
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(Conversation::from))
    }

    /// Append a message to a conversation
    pub async fn append_message(pool: &SqlitePool, message: NewMessage) -> DbResult<Message> {
        let message = message.into_message();
        let metadata_json = serde_json::to_string(&message.metadata)
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, tokens_used, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(message.tokens_used.map(i64::from))
        .bind(&metadata_json)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(message.created_at)
            .bind(&message.conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            "[conversation:{}] Appended {} message {}",
            message.conversation_id, message.role, message.id
        );

        Ok(message)
    }

    /// List a page of messages in insertion order
    pub async fn list_messages(
        pool: &SqlitePool,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> DbResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, conversation_id, role, content, tokens_used, metadata, created_at
             FROM messages
             WHERE conversation_id = ?
             ORDER BY seq ASC
             LIMIT ? OFFSET ?",
        )
        .bind(conversation_id)
        .bind(clamp_i64(limit))
        .bind(clamp_i64(offset))
        .fetch_all(pool)
        .await?;

        rows.into_iter()
            .map(Message::try_from)
            .collect::<DbResult<Vec<_>>>()
    }

    /// Count messages in a conversation
    pub async fn count_messages(pool: &SqlitePool, conversation_id: &str) -> DbResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_one(pool)
            .await?;
        let count = row.try_get::<i64, _>("count")?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn clamp_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    id: String,
    user_id: String,
    title: Option<String>,
    created_at: i64,
    updated_at: i64,
    is_active: i64,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            created_at: row.created_at,
            updated_at: row.updated_at,
            is_active: row.is_active != 0,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    tokens_used: Option<i64>,
    metadata: String,
    created_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = DbError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let metadata: Metadata = serde_json::from_str(&row.metadata)
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            role: row.role.parse()?,
            content: row.content,
            tokens_used: row.tokens_used.and_then(|t| u32::try_from(t).ok()),
            metadata,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::create_test_pool;

    #[tokio::test]
    async fn test_conversation_lifecycle() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();

        let conversation = ConversationRepository::create(pool, "U1", Some("Headaches"))
            .await
            .unwrap();
        assert_eq!(conversation.user_id, "U1");
        assert!(conversation.id.starts_with("conv_"));
        assert!(conversation.is_active);

        let loaded = ConversationRepository::get_by_id(pool, &conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, conversation);

        assert!(
            ConversationRepository::get_by_id(pool, "conv_missing")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_append_and_list() {
        let db = create_test_pool().await.unwrap();
        let pool = db.pool();

        let conversation = ConversationRepository::create(pool, "U1", None)
            .await
            .unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("partial".to_string(), serde_json::Value::Bool(true));

        let first = ConversationRepository::append_message(
            pool,
            NewMessage::new(&conversation.id, MessageRole::User, "Hello"),
        )
        .await
        .unwrap();
        let second = ConversationRepository::append_message(
            pool,
            NewMessage::new(&conversation.id, MessageRole::Assistant, "Hi there")
                .with_tokens_used(Some(12))
                .with_metadata(metadata.clone()),
        )
        .await
        .unwrap();

        let messages = ConversationRepository::list_messages(pool, &conversation.id, 0, 100)
            .await
            .unwrap();
        assert_eq!(messages, vec![first.clone(), second.clone()]);
        assert_eq!(messages[1].tokens_used, Some(12));
        assert_eq!(messages[1].metadata, metadata);

        let page = ConversationRepository::list_messages(pool, &conversation.id, 1, 1)
            .await
            .unwrap();
        assert_eq!(page, vec![second]);

        assert_eq!(
            ConversationRepository::count_messages(pool, &conversation.id)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_append_to_unknown_conversation_fails() {
        let db = create_test_pool().await.unwrap();

        let result = ConversationRepository::append_message(
            db.pool(),
            NewMessage::new("conv_missing", MessageRole::User, "Hello"),
        )
        .await;
        assert!(matches!(result, Err(DbError::Sql(_))));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("user".parse::<MessageRole>().unwrap(), MessageRole::User);
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
        assert!(matches!(
            "tool".parse::<MessageRole>(),
            Err(DbError::InvalidRole(_))
        ));
    }
}
