//! The two kinds of decision request.

use crate::backend::AccessLevel;
use crate::cache::fingerprint::{DecisionKind, fingerprint};

/// A single decision request, borrowed from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequest<'a> {
    /// Is this username/password pair valid?
    Credential { username: &'a str, password: &'a str },

    /// May this client access this topic?
    Acl {
        client_id: &'a str,
        username: &'a str,
        topic: &'a str,
        access: AccessLevel,
    },
}

impl<'a> AuthRequest<'a> {
    #[must_use]
    pub fn credential(username: &'a str, password: &'a str) -> Self {
        Self::Credential { username, password }
    }

    #[must_use]
    pub fn acl(client_id: &'a str, username: &'a str, topic: &'a str, access: AccessLevel) -> Self {
        Self::Acl {
            client_id,
            username,
            topic,
            access,
        }
    }

    #[must_use]
    pub fn kind(&self) -> DecisionKind {
        match self {
            Self::Credential { .. } => DecisionKind::Auth,
            Self::Acl { .. } => DecisionKind::Acl,
        }
    }

    #[must_use]
    pub fn username(&self) -> &'a str {
        match self {
            Self::Credential { username, .. } | Self::Acl { username, .. } => username,
        }
    }

    /// Cache key for this request.
    ///
    /// Field order is fixed per kind: credentials use (username, password),
    /// access checks use (username, topic, client id, access code).
    #[must_use]
    pub fn fingerprint(&self) -> String {
        match *self {
            Self::Credential { username, password } => {
                fingerprint(DecisionKind::Auth, &[username, password])
            }
            Self::Acl {
                client_id,
                username,
                topic,
                access,
            } => {
                let code = access.code().to_string();
                fingerprint(DecisionKind::Acl, &[username, topic, client_id, &code])
            }
        }
    }
}
