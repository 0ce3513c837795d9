//! # brokerauth
//!
//! Authentication and authorization decisions for a message broker.
//!
//! This crate provides:
//! - An arbitration engine that asks one or more identity backends whether
//!   a username/password pair is valid and whether a client may publish or
//!   subscribe to a topic
//! - Username prefix routing to a single designated backend
//! - A short-TTL decision cache with sliding expiration (Redis or in-process)
//! - A fail-open grace window right after broker start-up
//! - One optional extension backend resolved by symbol name
//!
//! ## Modules
//!
//! - [`engine`] - The decision flow and its builder
//! - [`bootstrap`] - Builds an engine from parsed settings
//! - [`backend`] - Backend trait, ordered backend set, factories
//! - [`extension`] - Extension slot, units and loaders
//! - [`cache`] - Decision cache client and stores
//! - [`prefix`] - Username prefix routing
//! - [`grace`] - Start-up grace window
//! - [`config`] - Option parsing
//! - [`observability`] - Logging setup

pub mod backend;
pub mod bootstrap;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod extension;
pub mod grace;
pub mod observability;
pub mod prefix;
pub mod request;

pub use backend::{
    AccessLevel, Backend, BackendError, BackendFactory, BackendRegistry, BackendSet,
    EXTENSION_BACKEND,
};
pub use bootstrap::{Bootstrap, build_engine};
pub use cache::{CacheLookup, CacheStore, DecisionCache, MemoryStore, RedisStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthOptions, AuthSettings, CacheSettings, ConfigError, load_options};
pub use engine::{AuthEngine, AuthEngineBuilder};
pub use error::AuthError;
pub use extension::{
    DylibLoader, ExtensionError, ExtensionLoader, ExtensionSlot, ExtensionUnit, StaticLoader,
    Symbol, SymbolTable,
};
pub use grace::GraceWindow;
pub use observability::{LogDestination, LogLevel, LoggingSettings};
pub use prefix::PrefixRouter;
pub use request::AuthRequest;

/// Type alias for engine construction results.
pub type AuthResult<T> = Result<T, AuthError>;
