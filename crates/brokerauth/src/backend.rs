//! Backend capability interface and the ordered backend set.
//!
//! A backend answers three yes/no questions against one identity source:
//! is this credential valid, is this user a superuser, and may this client
//! access this topic. The arbitration layer has no channel for "the
//! backend broke", so implementations must map every internal failure to
//! `false` before returning.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AuthOptions;
use crate::observability::LogLevel;

/// Backend names accepted in the `backends` option.
pub const ALLOWED_BACKENDS: &[&str] = &[
    "postgres", "jwt", "redis", "http", "files", "mysql", "sqlite", "mongo", "plugin", "grpc",
];

/// The `backends` entry that designates the extension slot.
pub const EXTENSION_BACKEND: &str = "plugin";

/// Returns `true` if `name` may appear in the `backends` option.
#[must_use]
pub fn is_allowed_backend(name: &str) -> bool {
    ALLOWED_BACKENDS.contains(&name)
}

// =============================================================================
// Access Level
// =============================================================================

/// Access requested by a client for a topic.
///
/// Discriminants are the broker's wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    /// Receive a message published on the topic.
    Read = 1,
    /// Publish to the topic.
    Write = 2,
    /// Subscribe with a topic filter.
    Subscribe = 4,
}

impl AccessLevel {
    /// Maps a broker access code to a level.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            4 => Some(Self::Subscribe),
            _ => None,
        }
    }

    /// The broker access code.
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" | "1" => Ok(Self::Read),
            "write" | "publish" | "2" => Ok(Self::Write),
            "subscribe" | "4" => Ok(Self::Subscribe),
            other => Err(format!(
                "unknown access level '{other}', expected read, write or subscribe"
            )),
        }
    }
}

// =============================================================================
// Backend Trait
// =============================================================================

/// A pluggable identity and authorization source.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    /// Returns `true` if the username/password pair is valid.
    async fn check_credential(&self, username: &str, password: &str) -> bool;

    /// Returns `true` if the user bypasses ACL checks.
    async fn check_superuser(&self, username: &str) -> bool;

    /// Returns `true` if the client may access the topic at the given level.
    async fn check_acl(
        &self,
        username: &str,
        topic: &str,
        client_id: &str,
        access: AccessLevel,
    ) -> bool;

    /// Releases resources held by the backend. Called once at teardown.
    async fn shutdown(&self);
}

// =============================================================================
// Backend Set
// =============================================================================

/// Backends in configured order, which is also the evaluation order.
#[derive(Clone, Default)]
pub struct BackendSet {
    entries: Vec<(String, Arc<dyn Backend>)>,
}

impl BackendSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a backend under its configured name.
    ///
    /// A later registration under the same name replaces the earlier one
    /// while keeping the earlier position.
    pub fn push(&mut self, name: impl Into<String>, backend: Arc<dyn Backend>) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = backend;
        } else {
            self.entries.push((name, backend));
        }
    }

    /// Looks up a backend by configured name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Backend>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, backend)| backend)
    }

    /// Backends in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Backend>> {
        self.entries.iter().map(|(_, backend)| backend)
    }

    /// Configured names in evaluation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// =============================================================================
// Backend Factories
// =============================================================================

/// Error returned by a backend factory.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A required option is absent.
    #[error("missing option: {0}")]
    MissingOption(String),

    /// An option is present but unusable.
    #[error("invalid option {key}: {message}")]
    InvalidOption {
        /// Option key.
        key: String,
        /// Why the value was rejected.
        message: String,
    },

    /// Reading backend data failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other construction failure.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    #[must_use]
    pub fn invalid_option(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Builds one backend from the flat option map.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn build(
        &self,
        options: &AuthOptions,
        log_level: LogLevel,
    ) -> Result<Arc<dyn Backend>, BackendError>;
}

/// Factories keyed by backend name.
///
/// The host registers one factory per compiled-in backend; names listed in
/// `backends` without a registered factory fail start-up.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn BackendFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, factory: Arc<dyn BackendFactory>) -> Self {
        self.register(name, factory);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn BackendFactory>> {
        self.factories.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("BackendRegistry")
            .field("factories", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Backend for Named {
        fn name(&self) -> &str {
            self.0
        }
        async fn check_credential(&self, _username: &str, _password: &str) -> bool {
            false
        }
        async fn check_superuser(&self, _username: &str) -> bool {
            false
        }
        async fn check_acl(&self, _: &str, _: &str, _: &str, _: AccessLevel) -> bool {
            false
        }
        async fn shutdown(&self) {}
    }

    #[test]
    fn test_access_level_codes() {
        assert_eq!(AccessLevel::from_code(1), Some(AccessLevel::Read));
        assert_eq!(AccessLevel::from_code(2), Some(AccessLevel::Write));
        assert_eq!(AccessLevel::from_code(4), Some(AccessLevel::Subscribe));
        assert_eq!(AccessLevel::from_code(3), None);
        assert_eq!(AccessLevel::Subscribe.code(), 4);
    }

    #[test]
    fn test_access_level_parse() {
        assert_eq!("READ".parse::<AccessLevel>(), Ok(AccessLevel::Read));
        assert_eq!("publish".parse::<AccessLevel>(), Ok(AccessLevel::Write));
        assert!("admin".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn test_allow_list() {
        assert!(is_allowed_backend("files"));
        assert!(is_allowed_backend("plugin"));
        assert!(!is_allowed_backend("ldap"));
    }

    #[test]
    fn test_backend_set_keeps_order() {
        let mut set = BackendSet::new();
        set.push("http", Arc::new(Named("http")));
        set.push("files", Arc::new(Named("files")));
        set.push("http", Arc::new(Named("http-2")));

        let names: Vec<_> = set.names().collect();
        assert_eq!(names, vec!["http", "files"]);
        assert_eq!(set.get("http").map(|b| b.name()), Some("http-2"));
        assert!(set.get("mongo").is_none());
        assert_eq!(set.len(), 2);
    }
}
