//! Plugin configuration.
//!
//! The broker hands the plugin a flat list of string key/value pairs. This
//! module turns that list into [`AuthSettings`]. Only an invalid backend
//! list is fatal; every other bad value falls back to its default with a
//! log line, so a typo in a tuning knob never keeps the broker from
//! starting.
//!
//! # Example (broker configuration)
//!
//! ```text
//! auth_opt_backends files, http
//! auth_opt_cache true
//! auth_opt_auth_cache_seconds 30
//! auth_opt_check_prefix true
//! auth_opt_prefixes files, http
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::backend::is_allowed_backend;
use crate::observability::{LogDestination, LogLevel, LoggingSettings};

/// Raw options as passed by the broker.
pub type AuthOptions = HashMap<String, String>;

/// Default startup grace period.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(60);

/// Upper bound for every seconds option (one year).
pub const MAX_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Errors raised while reading the option set.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The `backends` option is missing or empty.
    #[error("backends error: no backends configured")]
    EmptyBackends,

    /// The `backends` option names backends outside the allow-list.
    #[error("backends error: backend not allowed: {}", .0.join(", "))]
    UnknownBackends(Vec<String>),

    /// The options file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The options file is not valid TOML.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

// =============================================================================
// Settings
// =============================================================================

/// Fully parsed plugin settings. Immutable once built.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Backend names in evaluation order (may include `plugin`).
    pub backends: Vec<String>,

    /// Log level and destination.
    pub logging: LoggingSettings,

    /// Decision cache settings.
    pub cache: CacheSettings,

    /// Whether `check_prefix` was requested.
    pub check_prefix: bool,

    /// The `prefixes` list, parallel to `backends`.
    pub prefixes: Option<Vec<String>>,

    /// Location of the extension unit, used when `plugin` is a backend.
    pub plugin_path: Option<String>,

    /// Fail-open window after the first decision. Zero disables it.
    pub startup_grace: Duration,

    /// Ask superuser capabilities before ACL capabilities.
    pub check_superuser: bool,

    /// Every option except `backends`, handed to backend factories.
    pub options: AuthOptions,
}

/// Decision cache settings.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub auth_ttl: Duration,
    pub acl_ttl: Duration,
    /// Flush the logical database once at start-up.
    pub reset: bool,
    pub pool_size: usize,
    pub timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 3,
            auth_ttl: Duration::from_secs(30),
            acl_ttl: Duration::from_secs(30),
            reset: false,
            pool_size: 10,
            timeout_ms: 5000,
        }
    }
}

impl fmt::Debug for CacheSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSettings")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("db", &self.db)
            .field("auth_ttl", &self.auth_ttl)
            .field("acl_ttl", &self.acl_ttl)
            .field("reset", &self.reset)
            .field("pool_size", &self.pool_size)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl CacheSettings {
    /// Connection URL for the cache store, `redis://[:password@]host:port/db`.
    pub fn redis_url(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))?;
        if let Some(password) = &self.password {
            // Only fails for cannot-be-a-base URLs, which redis:// never is.
            let _ = url.set_password(Some(password));
        }
        Ok(url)
    }
}

impl AuthSettings {
    /// Parses the broker option set.
    ///
    /// # Errors
    ///
    /// Returns an error if `backends` is missing, empty, or names a backend
    /// outside the allow-list.
    pub fn from_options(options: &AuthOptions) -> Result<Self, ConfigError> {
        let backends = parse_backends(options)?;

        let mut rest = options.clone();
        rest.remove("backends");

        let check_prefix = flag(options, "check_prefix");
        let prefixes = options.get("prefixes").map(|p| split_list(p));

        Ok(Self {
            backends,
            logging: parse_logging(options),
            cache: parse_cache(options),
            check_prefix,
            prefixes,
            plugin_path: options.get("plugin_path").cloned(),
            startup_grace: parse_grace(options),
            check_superuser: flag(options, "check_superuser"),
            options: rest,
        })
    }
}

// =============================================================================
// Option Parsers
// =============================================================================

fn strip_spaces(value: &str) -> String {
    value.chars().filter(|c| *c != ' ').collect()
}

/// Splits a comma-separated list. Empty entries are kept so that
/// `a,,b` fails name checks and counts as three entries.
fn split_list(value: &str) -> Vec<String> {
    let value = strip_spaces(value);
    if value.is_empty() {
        return Vec::new();
    }
    value.split(',').map(str::to_string).collect()
}

fn flag(options: &AuthOptions, key: &str) -> bool {
    options
        .get(key)
        .is_some_and(|v| strip_spaces(v) == "true")
}

fn parse_backends(options: &AuthOptions) -> Result<Vec<String>, ConfigError> {
    let backends = options
        .get("backends")
        .map(|v| split_list(v))
        .unwrap_or_default();

    if backends.is_empty() {
        return Err(ConfigError::EmptyBackends);
    }

    let unknown: Vec<String> = backends
        .iter()
        .filter(|b| !is_allowed_backend(b))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        for name in &unknown {
            tracing::error!(backend = %name, "backend not allowed");
        }
        return Err(ConfigError::UnknownBackends(unknown));
    }

    Ok(backends)
}

fn parse_logging(options: &AuthOptions) -> LoggingSettings {
    let mut logging = LoggingSettings::default();

    if let Some(level) = options.get("log_level") {
        match strip_spaces(level).parse::<LogLevel>() {
            Ok(level) => logging.level = level,
            Err(_) => tracing::info!(value = %level, "log_level unknown, using default info level"),
        }
    }

    if let Some(dest) = options.get("log_dest") {
        match dest.trim() {
            "stdout" => logging.destination = LogDestination::Stdout,
            "stderr" => logging.destination = LogDestination::Stderr,
            "file" => match options.get("log_file") {
                Some(path) => logging.destination = LogDestination::File(PathBuf::from(path)),
                None => tracing::info!("log_dest is file but no log_file given, using default stderr"),
            },
            other => tracing::info!(value = %other, "log_dest unknown, using default stderr"),
        }
    }

    logging
}

fn parse_seconds(
    options: &AuthOptions,
    key: &str,
    current: Duration,
    min_secs: u64,
) -> Duration {
    let Some(raw) = options.get(key) else {
        return current;
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if (min_secs..=MAX_SECONDS).contains(&secs) => Duration::from_secs(secs),
        Ok(secs) => {
            tracing::warn!(
                option = key,
                value = secs,
                min = min_secs,
                max = MAX_SECONDS,
                default_secs = current.as_secs(),
                "option out of range, keeping default"
            );
            current
        }
        Err(e) => {
            tracing::warn!(
                option = key,
                error = %e,
                default_secs = current.as_secs(),
                "couldn't parse option, keeping default"
            );
            current
        }
    }
}

fn parse_number<T>(options: &AuthOptions, key: &str, current: T) -> T
where
    T: std::str::FromStr + fmt::Display + Copy,
    T::Err: fmt::Display,
{
    match options.get(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(option = key, error = %e, default = %current, "couldn't parse option, keeping default");
                current
            }
        },
        None => current,
    }
}

fn parse_cache(options: &AuthOptions) -> CacheSettings {
    let mut cache = CacheSettings {
        enabled: flag(options, "cache"),
        ..CacheSettings::default()
    };

    if let Some(host) = options.get("cache_host") {
        cache.host = host.trim().to_string();
    }
    cache.port = parse_number(options, "cache_port", cache.port);
    cache.password = options
        .get("cache_password")
        .filter(|p| !p.is_empty())
        .cloned();
    cache.db = parse_number(options, "cache_db", cache.db);
    cache.auth_ttl = parse_seconds(options, "auth_cache_seconds", cache.auth_ttl, 1);
    cache.acl_ttl = parse_seconds(options, "acl_cache_seconds", cache.acl_ttl, 1);
    cache.reset = flag(options, "cache_reset");
    cache.pool_size = parse_number(options, "cache_pool_size", cache.pool_size);
    cache.timeout_ms = parse_number(options, "cache_timeout_ms", cache.timeout_ms);

    cache
}

fn parse_grace(options: &AuthOptions) -> Duration {
    parse_seconds(options, "startup_grace_seconds", DEFAULT_STARTUP_GRACE, 0)
}

// =============================================================================
// Option Sources
// =============================================================================

/// Extracts `auth_opt_<key> <value>` lines from a broker configuration file.
///
/// Other directives and comments are ignored. A key without a value maps to
/// an empty string.
#[must_use]
pub fn parse_mosquitto_conf(content: &str) -> AuthOptions {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.strip_prefix("auth_opt_"))
        .map(|rest| match rest.split_once(char::is_whitespace) {
            Some((key, value)) => (key.to_string(), value.trim().to_string()),
            None => (rest.to_string(), String::new()),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct OptionsFile {
    #[serde(default)]
    auth_opts: HashMap<String, toml::Value>,
}

fn toml_to_option(value: toml::Value) -> String {
    match value {
        toml::Value::String(s) => s,
        toml::Value::Array(items) => items
            .into_iter()
            .map(toml_to_option)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// Parses a TOML document with an `[auth_opts]` table.
///
/// Arrays become comma-separated lists, scalars their textual form.
///
/// # Errors
///
/// Returns an error if the document is not valid TOML.
pub fn parse_toml_options(content: &str, path: &Path) -> Result<AuthOptions, ConfigError> {
    let file: OptionsFile = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(file
        .auth_opts
        .into_iter()
        .map(|(key, value)| (key, toml_to_option(value)))
        .collect())
}

/// Loads options from a `.toml` file or a broker configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is invalid.
pub fn load_options(path: &Path) -> Result<AuthOptions, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if path.extension().is_some_and(|ext| ext == "toml") {
        parse_toml_options(&content, path)
    } else {
        Ok(parse_mosquitto_conf(&content))
    }
}
