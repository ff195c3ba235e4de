//! Best-effort key/value cache with per-key expiry.

mod memory;

pub use memory::InMemoryCache;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("value at '{0}' is not an integer")]
    NotAnInteger(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// String-keyed cache of opaque serialized values.
///
/// Callers treat every error as non-fatal.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store `value`, expiring after `ttl_seconds` when given.
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> CacheResult<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Remaining lifetime in seconds; `None` if the key is absent or never expires.
    async fn ttl(&self, key: &str) -> CacheResult<Option<u64>>;

    /// Delete every key starting with `prefix`, returning how many went.
    async fn clear(&self, prefix: &str) -> CacheResult<usize>;

    /// Add one to an integer value (absent counts as zero), keeping its expiry.
    async fn increment(&self, key: &str) -> CacheResult<i64>;
}
