//! Typed configuration parsed from environment variables.
//!
//! Required:
//! - `PORTAL_BACKEND_URL`: base URL of the portal backend
//!
//! Optional:
//! - `PORTAL_AUTH_ENV`: backend environment selector, default `prod`
//! - `AUTH_HANDSHAKE_TIMEOUT_SECS`: default 300
//! - `AUTH_CLOSURE_POLL_MS`: default 500
//! - `AUTH_HTTP_TIMEOUT_SECS`: default 30
//! - `JOB_POLL_INTERVAL_MS`: default 2000
//! - `JOB_POLL_MAX_RETRIES`: default 3
//! - `JOB_POLL_RETRY_DELAY_MS`: default 1000
//! - `SESSION_CHECK_INTERVAL_SECS`: default 60

use std::time::Duration;

use crate::error::ErrorCode;
use crate::poller::PollConfig;

pub const DEFAULT_AUTH_ENV: &str = "prod";
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CLOSURE_POLL_MS: u64 = 500;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_JOB_POLL_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_JOB_POLL_MAX_RETRIES: u32 = 3;
pub const DEFAULT_JOB_POLL_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_SESSION_CHECK_INTERVAL_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid backend url '{url}': {reason}")]
    InvalidBackendUrl { url: String, reason: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "E_CONFIG_MISSING",
            Self::InvalidBackendUrl { .. } => "E_CONFIG_BACKEND_URL",
        }
    }
}

/// Timers that drive one login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimings {
    /// Hard deadline for the whole handshake.
    pub deadline: Duration,
    /// How often the secondary window is checked for closure.
    pub closure_poll: Duration,
}

impl Default for HandshakeTimings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            closure_poll: Duration::from_millis(DEFAULT_CLOSURE_POLL_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalAuthConfig {
    /// Backend base URL without trailing slash.
    pub backend_url: String,
    /// Value passed as `?env=` on every auth endpoint.
    pub auth_env: String,
    pub handshake: HandshakeTimings,
    pub http_timeout: Duration,
    pub job_poll: PollConfig,
    pub session_check_interval: Duration,
}

impl PortalAuthConfig {
    /// Build config from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORTAL_BACKEND_URL` is missing or not an
    /// absolute http(s) URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_url = std::env::var("PORTAL_BACKEND_URL").map_err(|_| ConfigError::Missing("PORTAL_BACKEND_URL"))?;
        let auth_env = std::env::var("PORTAL_AUTH_ENV")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AUTH_ENV.to_owned());

        let mut config = Self::new(&raw_url, auth_env)?;
        config.handshake = HandshakeTimings {
            deadline: Duration::from_secs(env_parse("AUTH_HANDSHAKE_TIMEOUT_SECS", DEFAULT_HANDSHAKE_TIMEOUT_SECS)),
            closure_poll: Duration::from_millis(env_parse("AUTH_CLOSURE_POLL_MS", DEFAULT_CLOSURE_POLL_MS)),
        };
        config.http_timeout = Duration::from_secs(env_parse("AUTH_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS));
        config.job_poll = PollConfig {
            interval: Duration::from_millis(env_parse("JOB_POLL_INTERVAL_MS", DEFAULT_JOB_POLL_INTERVAL_MS)),
            max_retries: env_parse("JOB_POLL_MAX_RETRIES", DEFAULT_JOB_POLL_MAX_RETRIES),
            retry_delay: Duration::from_millis(env_parse("JOB_POLL_RETRY_DELAY_MS", DEFAULT_JOB_POLL_RETRY_DELAY_MS)),
        };
        config.session_check_interval =
            Duration::from_secs(env_parse("SESSION_CHECK_INTERVAL_SECS", DEFAULT_SESSION_CHECK_INTERVAL_SECS));
        Ok(config)
    }

    /// Build config with defaults for everything but the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if `backend_url` is not an absolute http(s) URL.
    pub fn new(backend_url: &str, auth_env: impl Into<String>) -> Result<Self, ConfigError> {
        let backend_url = normalize_backend_url(backend_url)?;
        Ok(Self {
            backend_url,
            auth_env: auth_env.into(),
            handshake: HandshakeTimings::default(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            job_poll: PollConfig {
                interval: Duration::from_millis(DEFAULT_JOB_POLL_INTERVAL_MS),
                max_retries: DEFAULT_JOB_POLL_MAX_RETRIES,
                retry_delay: Duration::from_millis(DEFAULT_JOB_POLL_RETRY_DELAY_MS),
            },
            session_check_interval: Duration::from_secs(DEFAULT_SESSION_CHECK_INTERVAL_SECS),
        })
    }
}

fn normalize_backend_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|e| ConfigError::InvalidBackendUrl { url: raw.to_owned(), reason: e.to_string() })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBackendUrl {
            url: raw.to_owned(),
            reason: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    Ok(trimmed.to_owned())
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
