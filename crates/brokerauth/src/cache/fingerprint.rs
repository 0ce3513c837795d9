//! Cache key construction.
//!
//! A key is the base64 encoding of the decision kind followed by every
//! field, each prefixed with its byte length:
//!
//! ```text
//! auth:5:alice:6:secret
//! ```
//!
//! The length prefixes keep the encoding injective, so `("ab", "c")` and
//! `("a", "bc")` never share a key, and the kind tag keeps credential and
//! access entries apart. The encoding is reversible with [`decode`].

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Which decision a cache entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionKind {
    /// Credential check.
    Auth,
    /// Access-control check.
    Acl,
}

impl DecisionKind {
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Acl => "acl",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "auth" => Some(Self::Auth),
            "acl" => Some(Self::Acl),
            _ => None,
        }
    }
}

/// Builds the cache key for a kind and its ordered fields.
#[must_use]
pub fn fingerprint(kind: DecisionKind, fields: &[&str]) -> String {
    let mut raw = String::from(kind.tag());
    for field in fields {
        let _ = write!(raw, ":{}:{}", field.len(), field);
    }
    STANDARD.encode(raw.as_bytes())
}

/// Recovers the kind and fields from a key built by [`fingerprint`].
#[must_use]
pub fn decode(key: &str) -> Option<(DecisionKind, Vec<String>)> {
    let bytes = STANDARD.decode(key).ok()?;
    let raw = String::from_utf8(bytes).ok()?;

    let (tag, mut rest) = match raw.split_once(':') {
        Some((tag, rest)) => (tag, rest),
        None => (raw.as_str(), ""),
    };
    let kind = DecisionKind::from_tag(tag)?;

    let mut fields = Vec::new();
    while !rest.is_empty() {
        let (len, tail) = rest.split_once(':')?;
        let len: usize = len.parse().ok()?;
        let field = tail.get(..len)?;
        fields.push(field.to_string());
        rest = &tail[len..];
        if !rest.is_empty() {
            rest = rest.strip_prefix(':')?;
        }
    }

    Some((kind, fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_do_not_collide() {
        assert_ne!(
            fingerprint(DecisionKind::Auth, &["alice", "secret"]),
            fingerprint(DecisionKind::Acl, &["alice", "secret"])
        );
    }

    #[test]
    fn test_shifted_boundaries_do_not_collide() {
        assert_ne!(
            fingerprint(DecisionKind::Auth, &["ab", "c"]),
            fingerprint(DecisionKind::Auth, &["a", "bc"])
        );
        // Separator characters inside fields stay unambiguous.
        assert_ne!(
            fingerprint(DecisionKind::Auth, &["a:1:b", ""]),
            fingerprint(DecisionKind::Auth, &["a", "b"])
        );
    }

    #[test]
    fn test_decode_recovers_fields() {
        let key = fingerprint(DecisionKind::Acl, &["bob", "sensors/+/temp", "dev:1", "4"]);
        let (kind, fields) = decode(&key).unwrap();
        assert_eq!(kind, DecisionKind::Acl);
        assert_eq!(fields, vec!["bob", "sensors/+/temp", "dev:1", "4"]);
    }

    #[test]
    fn test_decode_empty_fields() {
        let key = fingerprint(DecisionKind::Auth, &["", ""]);
        let (kind, fields) = decode(&key).unwrap();
        assert_eq!(kind, DecisionKind::Auth);
        assert_eq!(fields, vec!["", ""]);
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        assert!(decode("not base64 !").is_none());
        assert!(decode(&STANDARD.encode("session:3:abc")).is_none());
    }
}
