//! The `ConversationLog` seam used by the chat pipeline.

use crate::conversation_db::ConversationDb;
use crate::conversations::{Conversation, ConversationRepository, Message, NewMessage};
use crate::error::DbResult;

/// Append-only store of conversations and their messages.
///
/// Implementations must list messages in insertion order and must never
/// reorder or edit a stored message.
#[async_trait::async_trait]
pub trait ConversationLog: Send + Sync {
    /// Create a conversation owned by `user_id`.
    async fn create(&self, user_id: &str, title: Option<&str>) -> DbResult<Conversation>;

    async fn get_by_id(&self, id: &str) -> DbResult<Option<Conversation>>;

    /// Append a message, returning it with its assigned id and timestamp.
    async fn append_message(&self, message: NewMessage) -> DbResult<Message>;

    /// Messages ascending by creation, skipping `offset`, at most `limit`.
    async fn list_messages(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> DbResult<Vec<Message>>;

    async fn count_messages(&self, conversation_id: &str) -> DbResult<usize>;
}

#[async_trait::async_trait]
impl ConversationLog for ConversationDb {
    async fn create(&self, user_id: &str, title: Option<&str>) -> DbResult<Conversation> {
        ConversationRepository::create(self.pool(), user_id, title).await
    }

    async fn get_by_id(&self, id: &str) -> DbResult<Option<Conversation>> {
        ConversationRepository::get_by_id(self.pool(), id).await
    }

    async fn append_message(&self, message: NewMessage) -> DbResult<Message> {
        ConversationRepository::append_message(self.pool(), message).await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> DbResult<Vec<Message>> {
        ConversationRepository::list_messages(self.pool(), conversation_id, offset, limit).await
    }

    async fn count_messages(&self, conversation_id: &str) -> DbResult<usize> {
        ConversationRepository::count_messages(self.pool(), conversation_id).await
    }
}
