//! Test helpers for the conversation database.

use crate::{
    conversation_db::ConversationDb, error::DbResult, sqlite_runtime::create_in_memory_pool,
};

/// Create an in-memory conversation database for testing
pub async fn create_test_pool() -> DbResult<ConversationDb> {
    let pool = create_in_memory_pool(1).await?;
    ConversationDb::run_migrations(&pool).await?;
    Ok(ConversationDb::from_pool(pool))
}
