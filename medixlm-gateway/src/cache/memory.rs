use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Cache, CacheError, CacheResult};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local cache. Expired entries are invisible and purged on write.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    map: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let map = self.map.read().await;
        Ok(map
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> CacheResult<()> {
        let now = Instant::now();
        let mut map = self.map.write().await;
        map.retain(|_, entry| entry.is_live(now));
        map.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: ttl_seconds.map(|secs| now + Duration::from_secs(secs)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let mut map = self.map.write().await;
        Ok(map.remove(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<u64>> {
        let now = Instant::now();
        let map = self.map.read().await;
        Ok(map
            .get(key)
            .filter(|entry| entry.is_live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now).as_secs()))
    }

    async fn clear(&self, prefix: &str) -> CacheResult<usize> {
        let now = Instant::now();
        let mut map = self.map.write().await;
        let mut removed = 0;
        map.retain(|key, entry| {
            if !entry.is_live(now) {
                return false;
            }
            if key.starts_with(prefix) {
                removed += 1;
                return false;
            }
            true
        });
        Ok(removed)
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        let now = Instant::now();
        let mut map = self.map.write().await;
        let live = map.get(key).filter(|entry| entry.is_live(now)).cloned();

        let (current, expires_at) = match live {
            Some(entry) => {
                let current = entry
                    .value
                    .parse::<i64>()
                    .map_err(|_| CacheError::NotAnInteger(key.to_string()))?;
                (current, entry.expires_at)
            }
            None => (0, None),
        };

        let next = current.saturating_add(1);
        map.insert(
            key.to_string(),
            CacheEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }
}
