//! Static-file backend.
//!
//! ## Options
//!
//! - `password_path` (required): lines of `username:argon2-phc-hash`
//! - `acl_path` (optional): broker-style ACL file
//!
//! ## ACL File
//!
//! ```text
//! # rules before any `user` line apply to everyone
//! topic read public/#
//!
//! user alice
//! topic readwrite alice/#
//! topic deny alice/secret
//!
//! # %u and %c expand to the username and client id
//! pattern write devices/%c/state
//! ```
//!
//! Access is one of `read`, `write`, `readwrite`, `subscribe` or `deny`
//! and defaults to `readwrite`. A matching `deny` rule wins over any grant.
//! `read` also allows subscribing. Without an ACL file every topic is
//! allowed. This backend has no superusers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use brokerauth::{AccessLevel, AuthOptions, Backend, BackendError, BackendFactory, LogLevel};

use crate::password::verify_password;
use crate::topic::topic_matches;

/// Access granted by one ACL rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAccess {
    Read,
    Write,
    ReadWrite,
    Subscribe,
    Deny,
}

impl RuleAccess {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "readwrite" => Some(Self::ReadWrite),
            "subscribe" => Some(Self::Subscribe),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }

    fn grants(self, access: AccessLevel) -> bool {
        match self {
            Self::Read => matches!(access, AccessLevel::Read | AccessLevel::Subscribe),
            Self::Write => access == AccessLevel::Write,
            Self::ReadWrite => true,
            Self::Subscribe => access == AccessLevel::Subscribe,
            Self::Deny => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    access: RuleAccess,
    filter: String,
}

/// Parsed ACL file.
#[derive(Debug, Clone, Default)]
pub struct AclRules {
    general: Vec<Rule>,
    per_user: HashMap<String, Vec<Rule>>,
    patterns: Vec<Rule>,
}

impl AclRules {
    /// Parses an ACL file.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unrecognized line.
    pub fn parse(content: &str) -> Result<Self, BackendError> {
        let mut rules = Self::default();
        let mut current_user: Option<String> = None;

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let rest = rest.trim();

            match keyword {
                "user" if !rest.is_empty() => current_user = Some(rest.to_string()),
                "topic" if !rest.is_empty() => {
                    let rule = parse_rule(rest);
                    match &current_user {
                        Some(user) => rules.per_user.entry(user.clone()).or_default().push(rule),
                        None => rules.general.push(rule),
                    }
                }
                "pattern" if !rest.is_empty() => rules.patterns.push(parse_rule(rest)),
                _ => {
                    return Err(BackendError::invalid_option(
                        "acl_path",
                        format!("line {}: unrecognized rule {line:?}", index + 1),
                    ));
                }
            }
        }

        Ok(rules)
    }

    /// Checks `topic` for `username` on `client_id`.
    #[must_use]
    pub fn check(&self, username: &str, client_id: &str, topic: &str, access: AccessLevel) -> bool {
        let user_rules = self.per_user.get(username).into_iter().flatten();
        let fixed = self
            .general
            .iter()
            .chain(user_rules)
            .map(|rule| (rule.access, rule.filter.clone()));
        let patterns = self.patterns.iter().filter_map(|rule| {
            let filter = substitute(&rule.filter, "%u", username)?;
            let filter = substitute(&filter, "%c", client_id)?;
            Some((rule.access, filter))
        });

        let matching: Vec<RuleAccess> = fixed
            .chain(patterns)
            .filter(|(_, filter)| topic_matches(filter, topic))
            .map(|(access, _)| access)
            .collect();

        if matching.contains(&RuleAccess::Deny) {
            return false;
        }
        matching.iter().any(|rule| rule.grants(access))
    }
}

/// Replaces `placeholder` with `value`. Returns `None` when the value
/// would add topic levels or wildcards to the filter.
fn substitute(filter: &str, placeholder: &str, value: &str) -> Option<String> {
    if !filter.contains(placeholder) {
        return Some(filter.to_string());
    }
    if value.contains(['+', '#', '/']) {
        tracing::debug!(value, filter, "identity not usable in pattern, skipping rule");
        return None;
    }
    Some(filter.replace(placeholder, value))
}

fn parse_rule(rest: &str) -> Rule {
    if let Some((first, filter)) = rest.split_once(char::is_whitespace)
        && let Some(access) = RuleAccess::parse(first)
    {
        return Rule {
            access,
            filter: filter.trim().to_string(),
        };
    }
    Rule {
        access: RuleAccess::ReadWrite,
        filter: rest.to_string(),
    }
}

fn parse_passwords(content: &str) -> Result<HashMap<String, String>, BackendError> {
    let mut users = HashMap::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once(':') {
            Some((user, hash)) if !user.is_empty() && !hash.is_empty() => {
                users.insert(user.to_string(), hash.to_string());
            }
            _ => {
                return Err(BackendError::invalid_option(
                    "password_path",
                    format!("line {}: expected username:hash", index + 1),
                ));
            }
        }
    }
    Ok(users)
}

// =============================================================================
// Backend
// =============================================================================

/// Users and ACLs loaded from files once at start-up.
#[derive(Debug, Clone)]
pub struct FilesBackend {
    users: Arc<HashMap<String, String>>,
    acl: Option<Arc<AclRules>>,
}

impl FilesBackend {
    /// Builds the backend from file contents.
    ///
    /// # Errors
    ///
    /// Returns an error if either file contains a malformed line.
    pub fn from_contents(passwords: &str, acl: Option<&str>) -> Result<Self, BackendError> {
        let users = parse_passwords(passwords)?;
        let acl = acl.map(AclRules::parse).transpose()?;
        Ok(Self {
            users: Arc::new(users),
            acl: acl.map(Arc::new),
        })
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl Backend for FilesBackend {
    fn name(&self) -> &str {
        "Files"
    }

    async fn check_credential(&self, username: &str, password: &str) -> bool {
        let Some(hash) = self.users.get(username).cloned() else {
            tracing::debug!(username, "files: user not found");
            return false;
        };

        let password = password.to_owned();
        let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await;
        match verified {
            Ok(Ok(valid)) => valid,
            Ok(Err(e)) => {
                tracing::warn!(username, error = %e, "files: stored hash is malformed");
                false
            }
            Err(e) => {
                tracing::error!(username, error = %e, "files: password check failed");
                false
            }
        }
    }

    async fn check_superuser(&self, _username: &str) -> bool {
        false
    }

    async fn check_acl(
        &self,
        username: &str,
        topic: &str,
        client_id: &str,
        access: AccessLevel,
    ) -> bool {
        match &self.acl {
            Some(acl) => acl.check(username, client_id, topic, access),
            None => true,
        }
    }

    async fn shutdown(&self) {
        tracing::debug!("files: shut down");
    }
}

/// Reads `password_path` and `acl_path`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesFactory;

#[async_trait]
impl BackendFactory for FilesFactory {
    async fn build(
        &self,
        options: &AuthOptions,
        _log_level: LogLevel,
    ) -> Result<Arc<dyn Backend>, BackendError> {
        let password_path = options
            .get("password_path")
            .ok_or_else(|| BackendError::MissingOption("password_path".to_string()))?;
        let passwords = tokio::fs::read_to_string(password_path).await?;

        let acl = match options.get("acl_path") {
            Some(path) => Some(tokio::fs::read_to_string(path).await?),
            None => None,
        };

        let backend = FilesBackend::from_contents(&passwords, acl.as_deref())?;
        tracing::info!(
            users = backend.user_count(),
            acl = acl.is_some(),
            "files: loaded"
        );
        Ok(Arc::new(backend))
    }
}
