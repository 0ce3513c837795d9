//! Decision arbitration engine.
//!
//! Every decision follows the same path:
//!
//! 1. grace window: approve everything until the start-up deadline passes
//! 2. cache lookup, when a cache is configured
//! 3. prefix route: ask only the backend paired with the username prefix
//! 4. otherwise ask each backend in configured order, first grant wins,
//!    then fall back to the extension slot
//! 5. cache the answer
//!
//! # Example
//!
//! ```ignore
//! use brokerauth::engine::AuthEngine;
//!
//! let engine = AuthEngine::builder(backends)
//!     .cache(cache)
//!     .router(router)
//!     .build();
//!
//! if engine.authenticate("alice", "secret").await {
//!     // accept the connection
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use crate::backend::{AccessLevel, Backend, BackendSet, EXTENSION_BACKEND};
use crate::cache::{CacheLookup, DecisionCache};
use crate::clock::{Clock, SystemClock};
use crate::extension::ExtensionSlot;
use crate::grace::GraceWindow;
use crate::prefix::PrefixRouter;
use crate::request::AuthRequest;

/// Where a routed request goes.
enum Target<'a> {
    Backend(&'a str, &'a Arc<dyn Backend>),
    Extension,
}

/// Answers credential and access questions on behalf of the broker.
///
/// Shared behind an `Arc` and called concurrently. Everything except the
/// grace deadline is read-only after construction.
pub struct AuthEngine {
    backends: BackendSet,
    extension: ExtensionSlot,
    router: Option<PrefixRouter>,
    cache: Option<DecisionCache>,
    grace: GraceWindow,
    clock: Arc<dyn Clock>,
    check_superuser: bool,
}

impl AuthEngine {
    /// Starts a builder with the given backends. Grace, cache, routing
    /// and the extension are off until configured.
    #[must_use]
    pub fn builder(backends: BackendSet) -> AuthEngineBuilder {
        AuthEngineBuilder::new(backends)
    }

    /// Is this username/password pair valid?
    pub async fn authenticate(&self, username: &str, password: &str) -> bool {
        self.decide(&AuthRequest::credential(username, password))
            .await
    }

    /// May `client_id`, logged in as `username`, access `topic` at `access`?
    pub async fn authorize(
        &self,
        client_id: &str,
        username: &str,
        topic: &str,
        access: AccessLevel,
    ) -> bool {
        self.decide(&AuthRequest::acl(client_id, username, topic, access))
            .await
    }

    /// Pre-shared key lookups are passed through to the broker.
    #[must_use]
    pub fn psk_key_supported(&self) -> bool {
        true
    }

    /// Closes the cache, then halts every backend and the extension.
    pub async fn shutdown(&self) {
        if let Some(cache) = &self.cache {
            cache.close().await;
        }
        for backend in self.backends.iter() {
            backend.shutdown().await;
        }
        self.extension.shutdown().await;
        tracing::info!("auth engine shut down");
    }

    #[must_use]
    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    #[must_use]
    pub fn extension(&self) -> &ExtensionSlot {
        &self.extension
    }

    #[must_use]
    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    #[must_use]
    pub fn routing_enabled(&self) -> bool {
        self.router.is_some()
    }

    #[must_use]
    pub fn grace(&self) -> &GraceWindow {
        &self.grace
    }

    // =========================================================================
    // Decision Flow
    // =========================================================================

    async fn decide(&self, request: &AuthRequest<'_>) -> bool {
        let kind = request.kind().tag();

        if self.grace.should_allow(self.clock.now()) {
            tracing::debug!(kind, username = request.username(), "inside grace window, granting");
            return true;
        }

        if let Some(cache) = &self.cache
            && let CacheLookup::Hit(granted) = cache.lookup(request).await
        {
            tracing::debug!(kind, username = request.username(), granted, "cache hit");
            return granted;
        }

        let granted = match self.route(request.username()) {
            Some(target) => self.ask_target(target, request).await,
            None => self.ask_all(request).await,
        };

        if let Some(cache) = &self.cache {
            cache.store(request, granted).await;
        }

        tracing::debug!(kind, username = request.username(), granted, "decision");
        granted
    }

    fn route(&self, username: &str) -> Option<Target<'_>> {
        let name = self.router.as_ref()?.route(username)?;
        if name == EXTENSION_BACKEND {
            return Some(Target::Extension);
        }
        match self.backends.get(name) {
            Some(backend) => Some(Target::Backend(name, backend)),
            None => {
                tracing::warn!(backend = name, "prefix routes to a backend that is not loaded");
                None
            }
        }
    }

    async fn ask_target(&self, target: Target<'_>, request: &AuthRequest<'_>) -> bool {
        match target {
            Target::Backend(name, backend) => {
                tracing::debug!(backend = name, username = request.username(), "prefix matched");
                self.ask_backend(backend.as_ref(), request).await
            }
            Target::Extension => {
                tracing::debug!(username = request.username(), "prefix matched extension");
                self.ask_extension(request).await
            }
        }
    }

    async fn ask_backend(&self, backend: &dyn Backend, request: &AuthRequest<'_>) -> bool {
        let granted = match *request {
            AuthRequest::Credential { username, password } => {
                backend.check_credential(username, password).await
            }
            AuthRequest::Acl {
                client_id,
                username,
                topic,
                access,
            } => {
                (self.check_superuser && backend.check_superuser(username).await)
                    || backend.check_acl(username, topic, client_id, access).await
            }
        };
        tracing::debug!(
            backend = backend.name(),
            kind = request.kind().tag(),
            username = request.username(),
            granted,
            "backend answered"
        );
        granted
    }

    async fn ask_all(&self, request: &AuthRequest<'_>) -> bool {
        match *request {
            AuthRequest::Credential { username, password } => {
                for backend in self.backends.iter() {
                    if backend.check_credential(username, password).await {
                        tracing::debug!(backend = backend.name(), username, "user authenticated");
                        return true;
                    }
                }
            }
            AuthRequest::Acl {
                client_id,
                username,
                topic,
                access,
            } => {
                if self.check_superuser {
                    for backend in self.backends.iter() {
                        if backend.check_superuser(username).await {
                            tracing::debug!(backend = backend.name(), username, "superuser");
                            return true;
                        }
                    }
                }
                for backend in self.backends.iter() {
                    if backend.check_acl(username, topic, client_id, access).await {
                        tracing::debug!(
                            backend = backend.name(),
                            username,
                            topic,
                            access = %access,
                            "acl granted"
                        );
                        return true;
                    }
                }
            }
        }

        self.ask_extension(request).await
    }

    async fn ask_extension(&self, request: &AuthRequest<'_>) -> bool {
        if !self.extension.is_present() {
            return false;
        }
        match *request {
            AuthRequest::Credential { username, password } => {
                self.extension.check_credential(username, password).await
            }
            AuthRequest::Acl {
                client_id,
                username,
                topic,
                access,
            } => {
                (self.check_superuser && self.extension.check_superuser(username).await)
                    || self
                        .extension
                        .check_acl(username, topic, client_id, access)
                        .await
            }
        }
    }
}

impl fmt::Debug for AuthEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthEngine")
            .field("backends", &self.backends)
            .field("extension", &self.extension)
            .field("router", &self.router)
            .field("cache", &self.cache.as_ref().map(DecisionCache::store_kind))
            .field("grace", &self.grace)
            .field("check_superuser", &self.check_superuser)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles an [`AuthEngine`].
pub struct AuthEngineBuilder {
    backends: BackendSet,
    extension: ExtensionSlot,
    router: Option<PrefixRouter>,
    cache: Option<DecisionCache>,
    grace: GraceWindow,
    clock: Arc<dyn Clock>,
    check_superuser: bool,
}

impl AuthEngineBuilder {
    fn new(backends: BackendSet) -> Self {
        Self {
            backends,
            extension: ExtensionSlot::empty(),
            router: None,
            cache: None,
            grace: GraceWindow::disabled(),
            clock: Arc::new(SystemClock),
            check_superuser: false,
        }
    }

    #[must_use]
    pub fn extension(mut self, extension: ExtensionSlot) -> Self {
        self.extension = extension;
        self
    }

    #[must_use]
    pub fn router(mut self, router: Option<PrefixRouter>) -> Self {
        self.router = router;
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Option<DecisionCache>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn grace(mut self, grace: GraceWindow) -> Self {
        self.grace = grace;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn check_superuser(mut self, enabled: bool) -> Self {
        self.check_superuser = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> AuthEngine {
        AuthEngine {
            backends: self.backends,
            extension: self.extension,
            router: self.router,
            cache: self.cache,
            grace: self.grace,
            clock: self.clock,
            check_superuser: self.check_superuser,
        }
    }
}
