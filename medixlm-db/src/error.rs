//! Database error types.

/// Database operation errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// SQL error from sqlx
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Conversation not found
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Unknown message role
    #[error("Invalid message role: {0}")]
    InvalidRole(String),

    /// Metadata could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data directory not found
    #[error("Data directory not found")]
    NoDataDir,

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend refused the operation (used by non-SQL log implementations)
    #[error("Conversation log unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DbError>;
