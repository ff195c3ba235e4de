//! medixlm-db: conversation log storage for MediXLM.
//!
//! This crate provides:
//! - Conversation and append-only message storage on SQLite
//! - The `ConversationLog` trait the chat pipeline is written against
//! - An in-memory `ConversationLog` for tests

pub mod conversation_db;
pub mod conversations;
pub mod error;
pub mod log;
pub mod memory;
mod sqlite_runtime;

// Re-export commonly used types
pub use conversation_db::ConversationDb;
pub use conversations::{
    Conversation, ConversationRepository, Message, MessageRole, Metadata, NewMessage,
};
pub use error::{DbError, DbResult};
pub use log::ConversationLog;
pub use memory::InMemoryConversationLog;

// Re-export test helpers when running tests or when test-helpers feature is enabled
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
