//! Redis-backed cache store.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Pool, Runtime};

use super::store::{CacheError, CacheStore};
use crate::config::CacheSettings;

/// Cache store on a Redis logical database, shared by every broker that
/// points at it.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

/// Redis rejects a zero expiry, so TTLs are clamped to one second.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl RedisStore {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates a pool from the cache settings.
    ///
    /// No connection is made here; call [`CacheStore::ping`] to check
    /// reachability.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection URL or pool configuration is
    /// invalid.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self, CacheError> {
        let url = settings
            .redis_url()
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let mut redis_config = deadpool_redis::Config::from_url(url.as_str());
        if let Some(ref mut pool_config) = redis_config.pool {
            let timeout = Duration::from_millis(settings.timeout_ms);
            pool_config.max_size = settings.pool_size;
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
        }

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self::new(pool))
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))
    }
}

fn command_error(e: redis::RedisError) -> CacheError {
    CacheError::Command(e.to_string())
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(command_error)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl))
            .await
            .map_err(command_error)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close();
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_is_clamped() {
        assert_eq!(ttl_secs(Duration::ZERO), 1);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(30)), 30);
    }

    #[tokio::test]
    async fn test_from_settings_builds_pool_without_connecting() {
        let store = RedisStore::from_settings(&CacheSettings::default()).unwrap();
        assert_eq!(store.kind(), "redis");
    }
}
