//! In-memory [`ConversationLog`] for tests and ephemeral deployments.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::conversations::{Conversation, Message, NewMessage, new_conversation};
use crate::error::{DbError, DbResult};
use crate::log::ConversationLog;

struct StoredConversation {
    conversation: Conversation,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct InMemoryConversationLog {
    conversations: RwLock<HashMap<String, StoredConversation>>,
}

impl InMemoryConversationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConversationLog for InMemoryConversationLog {
    async fn create(&self, user_id: &str, title: Option<&str>) -> DbResult<Conversation> {
        let conversation = new_conversation(user_id, title);
        self.conversations.write().await.insert(
            conversation.id.clone(),
            StoredConversation {
                conversation: conversation.clone(),
                messages: Vec::new(),
            },
        );
        Ok(conversation)
    }

    async fn get_by_id(&self, id: &str) -> DbResult<Option<Conversation>> {
        let map = self.conversations.read().await;
        Ok(map.get(id).map(|stored| stored.conversation.clone()))
    }

    async fn append_message(&self, message: NewMessage) -> DbResult<Message> {
        let mut map = self.conversations.write().await;
        let stored = map
            .get_mut(&message.conversation_id)
            .ok_or_else(|| DbError::ConversationNotFound(message.conversation_id.clone()))?;

        let message = message.into_message();
        stored.conversation.updated_at = message.created_at;
        stored.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> DbResult<Vec<Message>> {
        let map = self.conversations.read().await;
        Ok(map
            .get(conversation_id)
            .map(|stored| {
                stored
                    .messages
                    .iter()
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_messages(&self, conversation_id: &str) -> DbResult<usize> {
        let map = self.conversations.read().await;
        Ok(map
            .get(conversation_id)
            .map(|stored| stored.messages.len())
            .unwrap_or(0))
    }
}
