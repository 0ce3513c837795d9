//! Decision cache client.

use std::sync::Arc;
use std::time::Duration;

use super::fingerprint::DecisionKind;
use super::store::{CacheError, CacheStore};
use crate::request::AuthRequest;

/// Result of a cache lookup.
///
/// A miss and a store failure look the same to the caller: both mean
/// "decide afresh", never "denied".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Miss,
    Hit(bool),
}

/// Caches boolean decisions with per-kind TTLs and sliding expiration.
#[derive(Clone)]
pub struct DecisionCache {
    store: Arc<dyn CacheStore>,
    auth_ttl: Duration,
    acl_ttl: Duration,
}

impl DecisionCache {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, auth_ttl: Duration, acl_ttl: Duration) -> Self {
        Self {
            store,
            auth_ttl,
            acl_ttl,
        }
    }

    /// TTL applied to entries of the given kind.
    #[must_use]
    pub fn ttl(&self, kind: DecisionKind) -> Duration {
        match kind {
            DecisionKind::Auth => self.auth_ttl,
            DecisionKind::Acl => self.acl_ttl,
        }
    }

    /// Looks up a previous decision. A hit pushes the entry's expiry out by
    /// a full TTL.
    pub async fn lookup(&self, request: &AuthRequest<'_>) -> CacheLookup {
        let key = request.fingerprint();
        let value = match self.store.get(&key).await {
            Ok(Some(value)) => value,
            Ok(None) => return CacheLookup::Miss,
            Err(e) => {
                tracing::debug!(kind = request.kind().tag(), error = %e, "cache lookup failed, treating as miss");
                return CacheLookup::Miss;
            }
        };

        let ttl = self.ttl(request.kind());
        if let Err(e) = self.store.expire(&key, ttl).await {
            tracing::debug!(kind = request.kind().tag(), error = %e, "cache expiry refresh failed");
        }

        CacheLookup::Hit(value == "true")
    }

    /// Records a decision. Failures are logged and dropped.
    pub async fn store(&self, request: &AuthRequest<'_>, granted: bool) {
        let key = request.fingerprint();
        let ttl = self.ttl(request.kind());
        let value = if granted { "true" } else { "false" };

        match self.store.set(&key, value, ttl).await {
            Ok(()) => tracing::debug!(
                kind = request.kind().tag(),
                username = request.username(),
                granted,
                ttl_secs = ttl.as_secs(),
                "cache set"
            ),
            Err(e) => tracing::warn!(
                kind = request.kind().tag(),
                username = request.username(),
                error = %e,
                "cache set failed"
            ),
        }
    }

    /// Removes every cached decision.
    ///
    /// # Errors
    ///
    /// Returns the store error; the caller decides whether it matters.
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.store.flush_all().await
    }

    /// Closes the underlying store.
    pub async fn close(&self) {
        self.store.close().await;
    }

    /// Label of the underlying store.
    #[must_use]
    pub fn store_kind(&self) -> &'static str {
        self.store.kind()
    }
}
