//! Auth backend HTTP contract.
//!
//! The coordinator never parses the provider's redirect chain. It only
//! needs three URLs and two calls:
//! - `GET  {backend}/auth/start?env=<env>`   opened in the secondary window
//! - `GET  {backend}/auth/refresh?env=<env>` 200 means authenticated
//! - `POST {backend}/auth/logout?env=<env>`  best effort

use std::time::Duration;

use reqwest::Url;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::debug;

use crate::config::PortalAuthConfig;
use crate::error::ErrorCode;

const CONNECT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Transport failure before a status was received.
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-200 status.
    #[error("not authenticated: status {status}")]
    Unauthenticated { status: u16 },

    /// A non-auth endpoint returned an unexpected status.
    #[error("unexpected status {status}")]
    Status { status: u16 },

    /// The response body could not be decoded.
    #[error("response parse failed: {0}")]
    Parse(String),

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "E_BACKEND_REQUEST",
            Self::Unauthenticated { .. } => "E_UNAUTHENTICATED",
            Self::Status { .. } => "E_BACKEND_STATUS",
            Self::Parse(_) => "E_BACKEND_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Status { status: 429 | 500..=599 })
    }
}

// =============================================================================
// ENDPOINTS
// =============================================================================

/// URL builder for the auth endpoints of one backend/environment pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    backend_url: String,
    auth_env: String,
}

impl AuthEndpoints {
    #[must_use]
    pub fn new(backend_url: impl Into<String>, auth_env: impl Into<String>) -> Self {
        let backend_url: String = backend_url.into();
        Self { backend_url: backend_url.trim_end_matches('/').to_owned(), auth_env: auth_env.into() }
    }

    #[must_use]
    pub fn from_config(config: &PortalAuthConfig) -> Self {
        Self::new(config.backend_url.clone(), config.auth_env.clone())
    }

    #[must_use]
    pub fn start_url(&self) -> String {
        self.endpoint("auth/start")
    }

    #[must_use]
    pub fn refresh_url(&self) -> String {
        self.endpoint("auth/refresh")
    }

    #[must_use]
    pub fn logout_url(&self) -> String {
        self.endpoint("auth/logout")
    }

    /// `{backend}/{path}?env=<env>` with the env value query-encoded.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        let base = format!("{}/{}", self.backend_url, path.trim_start_matches('/'));
        match Url::parse(&base) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("env", &self.auth_env);
                url.to_string()
            }
            Err(_) => format!("{base}?env={}", self.auth_env),
        }
    }

    /// Serialized origin (`scheme://host[:port]`) that posted messages must match.
    #[must_use]
    pub fn origin(&self) -> String {
        Url::parse(&self.backend_url)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|_| self.backend_url.clone())
    }
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Session payload returned by a successful refresh. Opaque to this crate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionProfile {
    pub body: serde_json::Value,
}

#[async_trait::async_trait]
pub trait AuthBackend: Send + Sync {
    /// Confirm the session is authenticated.
    async fn refresh(&self) -> Result<SessionProfile, BackendError>;

    /// Invalidate the session server-side.
    async fn logout(&self) -> Result<(), BackendError>;
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

pub struct HttpAuthBackend {
    http: reqwest::Client,
    endpoints: AuthEndpoints,
}

impl HttpAuthBackend {
    /// Build a cookie-carrying client for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: &PortalAuthConfig) -> Result<Self, BackendError> {
        let http = build_http_client(config.http_timeout)?;
        Ok(Self { http, endpoints: AuthEndpoints::from_config(config) })
    }

    #[must_use]
    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }
}

/// Shared client builder: cookie store on so credentials ride along.
pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));

    reqwest::Client::builder()
        .cookie_store(true)
        .default_headers(headers)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| BackendError::HttpClientBuild(e.to_string()))
}

#[async_trait::async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn refresh(&self) -> Result<SessionProfile, BackendError> {
        let response = self
            .http
            .get(self.endpoints.refresh_url())
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            debug!(status, "session refresh rejected");
            return Err(BackendError::Unauthenticated { status });
        }

        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(SessionProfile { body: serde_json::from_str(&text).unwrap_or(serde_json::Value::Null) })
    }

    async fn logout(&self) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.endpoints.logout_url())
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status { status: status.as_u16() });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "backend_test.rs"]
mod tests;
