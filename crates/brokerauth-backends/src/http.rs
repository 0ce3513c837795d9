//! Remote HTTP backend.
//!
//! Each check is a POST to a configured endpoint. The answer is a grant
//! only if the response satisfies `http_response_mode`:
//!
//! | Mode     | Grant when                                  |
//! |----------|---------------------------------------------|
//! | `status` | status is 200                               |
//! | `text`   | status is 200 and the body is `ok`          |
//! | `json`   | status is 200 and the body is `{"ok":true}` |
//!
//! Transport errors and timeouts deny.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brokerauth::{AccessLevel, AuthOptions, Backend, BackendError, BackendFactory, LogLevel};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_PORT: u16 = 80;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How parameters are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamsMode {
    #[default]
    Json,
    Form,
}

/// How the response is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    Status,
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct UserParams<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct SuperuserParams<'a> {
    username: &'a str,
}

#[derive(Debug, Serialize)]
struct AclParams<'a> {
    username: &'a str,
    topic: &'a str,
    clientid: &'a str,
    acc: i32,
}

#[derive(Debug, Deserialize)]
struct JsonAnswer {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Endpoint and client settings.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub base: Url,
    pub getuser_uri: String,
    pub superuser_uri: Option<String>,
    pub aclcheck_uri: String,
    pub params_mode: ParamsMode,
    pub response_mode: ResponseMode,
    pub timeout: Duration,
}

impl HttpSettings {
    /// Reads the `http_*` options.
    ///
    /// # Errors
    ///
    /// Returns an error if the host or a required URI is missing, or a
    /// value is malformed.
    pub fn from_options(options: &AuthOptions) -> Result<Self, BackendError> {
        let host = required(options, "http_host")?;
        let port = match options.get("http_port") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| BackendError::invalid_option("http_port", e.to_string()))?,
            None => DEFAULT_PORT,
        };
        let scheme = if options.get("http_with_tls").is_some_and(|v| v.trim() == "true") {
            "https"
        } else {
            "http"
        };
        let base = Url::parse(&format!("{scheme}://{host}:{port}"))
            .map_err(|e| BackendError::invalid_option("http_host", e.to_string()))?;

        let params_mode = match options.get("http_params_mode").map(|v| v.trim()) {
            None | Some("json") => ParamsMode::Json,
            Some("form") => ParamsMode::Form,
            Some(other) => {
                return Err(BackendError::invalid_option(
                    "http_params_mode",
                    format!("unknown mode {other}"),
                ));
            }
        };
        let response_mode = match options.get("http_response_mode").map(|v| v.trim()) {
            None | Some("status") => ResponseMode::Status,
            Some("text") => ResponseMode::Text,
            Some("json") => ResponseMode::Json,
            Some(other) => {
                return Err(BackendError::invalid_option(
                    "http_response_mode",
                    format!("unknown mode {other}"),
                ));
            }
        };
        let timeout = match options.get("http_timeout") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| BackendError::invalid_option("http_timeout", e.to_string()))?,
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            base,
            getuser_uri: required(options, "http_getuser_uri")?,
            superuser_uri: options.get("http_superuser_uri").cloned(),
            aclcheck_uri: required(options, "http_aclcheck_uri")?,
            params_mode,
            response_mode,
            timeout,
        })
    }
}

fn required(options: &AuthOptions, key: &str) -> Result<String, BackendError> {
    options
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BackendError::MissingOption(key.to_string()))
}

// =============================================================================
// Backend
// =============================================================================

/// Delegates every check to a remote service.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    settings: Arc<HttpSettings>,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: HttpSettings) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| BackendError::Other(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            settings: Arc::new(settings),
        })
    }

    async fn ask<P: Serialize + ?Sized>(&self, uri: &str, params: &P) -> bool {
        let url = match self.settings.base.join(uri) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(uri, error = %e, "http: bad endpoint");
                return false;
            }
        };

        let request = self.client.post(url.clone());
        let request = match self.settings.params_mode {
            ParamsMode::Json => request.json(params),
            ParamsMode::Form => request.form(params),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "http: request failed");
                return false;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            tracing::debug!(url = %url, status = status.as_u16(), "http: denied by status");
            return false;
        }

        match self.settings.response_mode {
            ResponseMode::Status => true,
            ResponseMode::Text => match response.text().await {
                Ok(body) => body.trim() == "ok",
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "http: failed to read body");
                    false
                }
            },
            ResponseMode::Json => match response.json::<JsonAnswer>().await {
                Ok(answer) => {
                    if let Some(error) = answer.error.filter(|e| !e.is_empty()) {
                        tracing::debug!(url = %url, error = %error, "http: remote error");
                    }
                    answer.ok
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "http: malformed json answer");
                    false
                }
            },
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        "HTTP"
    }

    async fn check_credential(&self, username: &str, password: &str) -> bool {
        self.ask(
            &self.settings.getuser_uri,
            &UserParams { username, password },
        )
        .await
    }

    async fn check_superuser(&self, username: &str) -> bool {
        match &self.settings.superuser_uri {
            Some(uri) => self.ask(uri, &SuperuserParams { username }).await,
            None => false,
        }
    }

    async fn check_acl(
        &self,
        username: &str,
        topic: &str,
        client_id: &str,
        access: AccessLevel,
    ) -> bool {
        let params = AclParams {
            username,
            topic,
            clientid: client_id,
            acc: access.code(),
        };
        self.ask(&self.settings.aclcheck_uri, &params).await
    }

    async fn shutdown(&self) {
        tracing::debug!("http: shut down");
    }
}

/// Reads the `http_*` options.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpFactory;

#[async_trait]
impl BackendFactory for HttpFactory {
    async fn build(
        &self,
        options: &AuthOptions,
        _log_level: LogLevel,
    ) -> Result<Arc<dyn Backend>, BackendError> {
        let settings = HttpSettings::from_options(options)?;
        tracing::info!(
            base = %settings.base,
            params = ?settings.params_mode,
            response = ?settings.response_mode,
            timeout_secs = settings.timeout.as_secs(),
            "http: configured"
        );
        Ok(Arc::new(HttpBackend::new(settings)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> AuthOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_settings_defaults() {
        let settings = HttpSettings::from_options(&options(&[
            ("http_host", "auth.local"),
            ("http_getuser_uri", "/user"),
            ("http_aclcheck_uri", "/acl"),
        ]))
        .unwrap();

        assert_eq!(settings.base.as_str(), "http://auth.local/");
        assert_eq!(settings.params_mode, ParamsMode::Json);
        assert_eq!(settings.response_mode, ResponseMode::Status);
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert!(settings.superuser_uri.is_none());
    }

    #[test]
    fn test_settings_tls_and_modes() {
        let settings = HttpSettings::from_options(&options(&[
            ("http_host", "auth.local"),
            ("http_port", "8443"),
            ("http_with_tls", "true"),
            ("http_getuser_uri", "/user"),
            ("http_aclcheck_uri", "/acl"),
            ("http_params_mode", "form"),
            ("http_response_mode", "json"),
            ("http_timeout", "2"),
        ]))
        .unwrap();

        assert_eq!(settings.base.as_str(), "https://auth.local:8443/");
        assert_eq!(settings.params_mode, ParamsMode::Form);
        assert_eq!(settings.response_mode, ResponseMode::Json);
        assert_eq!(settings.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_settings_errors() {
        let err = HttpSettings::from_options(&options(&[("http_host", "h")])).unwrap_err();
        assert!(matches!(err, BackendError::MissingOption(ref key) if key == "http_getuser_uri"));

        let err = HttpSettings::from_options(&options(&[
            ("http_host", "h"),
            ("http_getuser_uri", "/u"),
            ("http_aclcheck_uri", "/a"),
            ("http_response_mode", "xml"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BackendError::InvalidOption { ref key, .. } if key == "http_response_mode"));
    }
}
