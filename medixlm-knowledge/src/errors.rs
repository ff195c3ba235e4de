#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("missing data directory")]
    MissingDataDir,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimMismatch { expected: usize, actual: usize },
    #[error("knowledge node not found: {0}")]
    NodeNotFound(String),
    #[error("invalid knowledge type: {0}")]
    InvalidKnowledgeType(String),
    #[error("relationship type not in taxonomy: {0}")]
    InvalidRelationshipType(String),
    #[error("invalid traversal depth {depth} (expected 1..={max})")]
    InvalidDepth { depth: u8, max: u8 },
    #[error("confidence score {0} is outside [0, 1]")]
    InvalidConfidence(f32),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("knowledge backend unavailable: {0}")]
    Unavailable(String),
}

impl KnowledgeError {
    /// Unknown node id.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NodeNotFound(_))
    }

    /// Caller supplied a malformed value.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidKnowledgeType(_)
                | Self::InvalidRelationshipType(_)
                | Self::InvalidDepth { .. }
                | Self::InvalidConfidence(_)
                | Self::MissingField(_)
        )
    }
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
