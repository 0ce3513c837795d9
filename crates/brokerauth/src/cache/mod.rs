//! Decision caching.
//!
//! ## Architecture
//!
//! - **Store** ([`CacheStore`]): a TTL-capable key-value service. Redis in
//!   multi-broker deployments, [`MemoryStore`] for a single process.
//! - **Client** ([`DecisionCache`]): fingerprints requests, applies the
//!   credential or ACL TTL, and refreshes the TTL on every hit.
//!
//! ## Graceful Degradation
//!
//! If the store cannot be reached at start-up the cache is switched off for
//! the life of the process. Later failures read as misses and writes are
//! dropped, so the cache can slow decisions down but never change them.

pub mod client;
pub mod fingerprint;
pub mod redis;
pub mod store;

pub use client::{CacheLookup, DecisionCache};
pub use fingerprint::{DecisionKind, fingerprint};
pub use redis::RedisStore;
pub use store::{CacheError, CacheStore, MemoryStore};
