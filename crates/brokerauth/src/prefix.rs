//! Username prefix routing.
//!
//! With `check_prefix` enabled, a username such as `svc_alice` is sent
//! straight to the backend paired with the `svc` prefix instead of walking
//! every backend. The pairing comes from two parallel option lists,
//! `backends` and `prefixes`, which must have the same length.

use std::collections::HashMap;

/// Separates the routing prefix from the rest of the username.
pub const PREFIX_SEPARATOR: char = '_';

/// Maps username prefixes to backend names.
#[derive(Debug, Clone, Default)]
pub struct PrefixRouter {
    routes: HashMap<String, String>,
}

impl PrefixRouter {
    /// Builds a router from parallel lists.
    ///
    /// Returns `None` (routing disabled) when the lengths differ.
    #[must_use]
    pub fn from_lists(backends: &[String], prefixes: &[String]) -> Option<Self> {
        if backends.len() != prefixes.len() {
            tracing::error!(
                backends = backends.len(),
                prefixes = prefixes.len(),
                "backend and prefix counts differ, defaulting to prefixes disabled"
            );
            return None;
        }

        let routes = prefixes
            .iter()
            .cloned()
            .zip(backends.iter().cloned())
            .collect();

        tracing::info!(
            backends = %backends.join(","),
            prefixes = %prefixes.join(","),
            "prefixes enabled"
        );

        Some(Self { routes })
    }

    /// Builds the router from settings, or `None` when routing is off.
    #[must_use]
    pub fn from_settings(
        check_prefix: bool,
        backends: &[String],
        prefixes: Option<&[String]>,
    ) -> Option<Self> {
        if !check_prefix {
            return None;
        }
        match prefixes {
            Some(prefixes) => Self::from_lists(backends, prefixes),
            None => {
                tracing::warn!("prefixes enabled but no prefixes given, defaulting to prefixes disabled");
                None
            }
        }
    }

    /// Returns the backend name for the username's prefix, if any.
    ///
    /// The prefix is everything before the first separator and must be
    /// non-empty.
    #[must_use]
    pub fn route(&self, username: &str) -> Option<&str> {
        let (prefix, _) = username.split_once(PREFIX_SEPARATOR)?;
        if prefix.is_empty() {
            return None;
        }

        let backend = self.routes.get(prefix)?;
        tracing::debug!(username, backend = %backend, "found prefix for user");
        Some(backend.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
