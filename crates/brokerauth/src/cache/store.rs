//! Cache store abstraction and the in-process implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

/// Errors reported by a cache store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The store could not be reached.
    #[error("cache connection error: {0}")]
    Connection(String),

    /// The store rejected or failed a command.
    #[error("cache command error: {0}")]
    Command(String),
}

/// A TTL-capable key-value store.
///
/// Implementations provide their own concurrency safety; callers hold no
/// locks around these calls.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the live value for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Writes `value` with a time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Resets the time-to-live of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Removes every key in the store's namespace.
    async fn flush_all(&self) -> Result<(), CacheError>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), CacheError>;

    /// Releases connections. Default is a no-op.
    async fn close(&self) {}

    /// Short label for logs.
    fn kind(&self) -> &'static str;
}

/// A cached value with its expiry instant.
#[derive(Clone, Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Stand-in deadline for TTLs too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or(now + FAR_FUTURE)
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Single-process store backed by `DashMap`.
///
/// Expiry is evaluated lazily on access, measured on the tokio clock so
/// paused-time tests can drive it.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries and returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: expiry(Instant::now(), ttl),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key)
            && !entry.is_expired(now)
        {
            entry.expires_at = expiry(now, ttl);
        }
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_expiry() {
        let store = MemoryStore::new();
        store.set("k", "true", Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("true"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_expire_extends_ttl() {
        let store = MemoryStore::new();
        store.set("k", "false", Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        store.expire("k", Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("false"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_does_not_revive_expired_entries() {
        let store = MemoryStore::new();
        store.set("k", "true", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        store.expire("k", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_saturates() {
        let store = MemoryStore::new();
        store.set("k", "true", Duration::MAX).await.unwrap();
        store.expire("k", Duration::MAX).await.unwrap();

        tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("true"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_and_flush() {
        let store = MemoryStore::new();
        store.set("short", "true", Duration::from_secs(1)).await.unwrap();
        store.set("long", "true", Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.len(), 1);

        store.flush_all().await.unwrap();
        assert!(store.is_empty());
    }
}
