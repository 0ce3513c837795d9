//! # brokerauth-backends
//!
//! Reference backends for the `brokerauth` engine.
//!
//! - [`files`] - password and ACL files on local disk
//! - [`http`] - delegates checks to a remote HTTP service
//!
//! [`builtin_registry`] registers both under their `backends` names.

pub mod files;
pub mod http;
pub mod password;
pub mod topic;

use std::sync::Arc;

use brokerauth::BackendRegistry;

pub use files::{AclRules, FilesBackend, FilesFactory};
pub use http::{HttpBackend, HttpFactory, HttpSettings};
pub use password::{hash_password, verify_password};
pub use topic::topic_matches;

/// A registry with every backend this crate provides.
#[must_use]
pub fn builtin_registry() -> BackendRegistry {
    BackendRegistry::new()
        .with("files", Arc::new(FilesFactory))
        .with("http", Arc::new(HttpFactory))
}
