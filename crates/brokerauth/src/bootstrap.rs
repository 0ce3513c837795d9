//! Assembles an [`AuthEngine`] from parsed settings.
//!
//! Fatal: a backend outside the allow-list, a backend with no registered
//! factory, or a factory that fails. Everything else (extension, cache,
//! prefix routing) degrades with a log line and the engine still starts.

use std::sync::Arc;

use crate::AuthResult;
use crate::backend::{BackendRegistry, BackendSet, EXTENSION_BACKEND, is_allowed_backend};
use crate::cache::{CacheStore, DecisionCache, RedisStore};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthSettings, ConfigError};
use crate::engine::AuthEngine;
use crate::error::AuthError;
use crate::extension::{ExtensionLoader, ExtensionSlot};
use crate::grace::GraceWindow;
use crate::prefix::PrefixRouter;

/// Builds the engine with the system clock and a Redis cache store.
///
/// # Errors
///
/// See [`Bootstrap::build`].
pub async fn build_engine(
    settings: &AuthSettings,
    registry: &BackendRegistry,
    loader: &dyn ExtensionLoader,
) -> AuthResult<AuthEngine> {
    Bootstrap::new(settings, registry, loader).build().await
}

/// Engine assembly with overridable collaborators.
pub struct Bootstrap<'a> {
    settings: &'a AuthSettings,
    registry: &'a BackendRegistry,
    loader: &'a dyn ExtensionLoader,
    store: Option<Arc<dyn CacheStore>>,
    clock: Arc<dyn Clock>,
}

impl<'a> Bootstrap<'a> {
    #[must_use]
    pub fn new(
        settings: &'a AuthSettings,
        registry: &'a BackendRegistry,
        loader: &'a dyn ExtensionLoader,
    ) -> Self {
        Self {
            settings,
            registry,
            loader,
            store: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Uses `store` instead of connecting to Redis when the cache is enabled.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Drives the grace window from `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds every configured backend, then the optional collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend name is not allowed, has no factory,
    /// or its factory fails.
    pub async fn build(self) -> AuthResult<AuthEngine> {
        let settings = self.settings;

        let backends = self.build_backends().await?;

        let extension = if settings.backends.iter().any(|b| b == EXTENSION_BACKEND) {
            ExtensionSlot::load(
                self.loader,
                settings.plugin_path.as_deref(),
                &settings.options,
                settings.logging.level,
            )
        } else {
            ExtensionSlot::empty()
        };

        let cache = self.build_cache().await;

        let router = PrefixRouter::from_settings(
            settings.check_prefix,
            &settings.backends,
            settings.prefixes.as_deref(),
        );

        let grace = if settings.startup_grace.is_zero() {
            GraceWindow::disabled()
        } else {
            GraceWindow::new(settings.startup_grace)
        };

        tracing::info!(
            backends = %settings.backends.join(","),
            extension = extension.is_present(),
            cache = cache.is_some(),
            prefixes = router.is_some(),
            grace_secs = settings.startup_grace.as_secs(),
            check_superuser = settings.check_superuser,
            "auth engine ready"
        );

        Ok(AuthEngine::builder(backends)
            .extension(extension)
            .cache(cache)
            .router(router)
            .grace(grace)
            .clock(self.clock)
            .check_superuser(settings.check_superuser)
            .build())
    }

    async fn build_backends(&self) -> AuthResult<BackendSet> {
        let settings = self.settings;

        let unknown: Vec<String> = settings
            .backends
            .iter()
            .filter(|b| !is_allowed_backend(b))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ConfigError::UnknownBackends(unknown).into());
        }
        if settings.backends.is_empty() {
            return Err(ConfigError::EmptyBackends.into());
        }

        let mut set = BackendSet::new();
        for name in settings.backends.iter().filter(|b| *b != EXTENSION_BACKEND) {
            let built = match self.registry.get(name) {
                Some(factory) => factory
                    .build(&settings.options, settings.logging.level)
                    .await
                    .map_err(|e| AuthError::backend_init(name.as_str(), e.to_string())),
                None => Err(AuthError::unregistered_backend(name.as_str())),
            };

            match built {
                Ok(backend) => {
                    tracing::info!(backend = %name, "Backend registered");
                    set.push(name.as_str(), backend);
                }
                Err(e) => {
                    halt_backends(&set).await;
                    return Err(e);
                }
            }
        }

        Ok(set)
    }

    async fn build_cache(&self) -> Option<DecisionCache> {
        let settings = &self.settings.cache;
        if !settings.enabled {
            return None;
        }

        let store: Arc<dyn CacheStore> = match &self.store {
            Some(store) => Arc::clone(store),
            None => match RedisStore::from_settings(settings) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %e, "couldn't build cache pool, cache disabled");
                    return None;
                }
            },
        };

        if let Err(e) = store.ping().await {
            tracing::warn!(
                host = %settings.host,
                port = settings.port,
                error = %e,
                "couldn't start cache, defaulting to no cache"
            );
            return None;
        }

        if settings.reset {
            match store.flush_all().await {
                Ok(()) => tracing::info!(db = settings.db, "flushed cache"),
                Err(e) => tracing::warn!(error = %e, "couldn't flush cache"),
            }
        }

        tracing::info!(
            store = store.kind(),
            auth_ttl_secs = settings.auth_ttl.as_secs(),
            acl_ttl_secs = settings.acl_ttl.as_secs(),
            "cache enabled"
        );

        Some(DecisionCache::new(store, settings.auth_ttl, settings.acl_ttl))
    }
}

/// Shuts down backends built before a later one failed.
async fn halt_backends(set: &BackendSet) {
    for backend in set.iter() {
        backend.shutdown().await;
    }
}
