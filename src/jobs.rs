//! Remote job status: builds and queue items.
//!
//! SYSTEM CONTEXT
//! ==============
//! Self-service job triggers hand back a queue item, which later becomes a
//! build. Both are watched with the terminal-state poller; they share the
//! terminal label set but not the payload schema.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{AuthEndpoints, BackendError, build_http_client};
use crate::config::PortalAuthConfig;
use crate::dispatcher::AuthErrorDispatcher;
use crate::poller::{PollConfig, PollHandle, TerminalStatePoller};
use crate::session::SESSION_EXPIRED_MESSAGE;

/// Labels after which a job never changes again.
pub const TERMINAL_LABELS: [&str; 5] = ["success", "failed", "aborted", "cancelled", "error"];

#[must_use]
pub fn is_terminal_label(label: &str) -> bool {
    JobState::from_label(label).is_terminal()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Queued,
    Running,
    Success,
    Failed,
    Aborted,
    Cancelled,
    Error,
    Unknown,
}

impl JobState {
    /// Parse a status label. Case-insensitive; common spellings accepted.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "pending" | "created" => Self::Pending,
            "queued" | "waiting" | "blocked" => Self::Queued,
            "running" | "building" | "in_progress" => Self::Running,
            "success" | "succeeded" => Self::Success,
            "failed" | "failure" => Self::Failed,
            "aborted" => Self::Aborted,
            "cancelled" | "canceled" => Self::Cancelled,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Aborted | Self::Cancelled | Self::Error)
    }
}

impl From<String> for JobState {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

pub trait JobStatus {
    fn state(&self) -> JobState;

    fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub id: String,
    #[serde(alias = "status")]
    pub state: JobState,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub url: Option<String>,
}

impl JobStatus for BuildStatus {
    fn state(&self) -> JobState {
        self.state
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItemStatus {
    pub id: String,
    #[serde(alias = "status")]
    pub state: JobState,
    /// Set once the queue item has started a build.
    #[serde(default)]
    pub build_id: Option<String>,
    /// Why the item is still waiting.
    #[serde(default)]
    pub why: Option<String>,
}

impl JobStatus for QueueItemStatus {
    fn state(&self) -> JobState {
        self.state
    }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct JobClient {
    http: reqwest::Client,
    endpoints: AuthEndpoints,
    poll: PollConfig,
    dispatcher: &'static AuthErrorDispatcher,
}

impl JobClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: &PortalAuthConfig) -> Result<Self, BackendError> {
        Ok(Self {
            http: build_http_client(config.http_timeout)?,
            endpoints: AuthEndpoints::from_config(config),
            poll: config.job_poll,
            dispatcher: crate::dispatcher::global(),
        })
    }

    /// Report unauthenticated responses to `dispatcher` instead of the global one.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: &'static AuthErrorDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// # Errors
    ///
    /// Returns transport, status or parse errors.
    pub async fn fetch_build(&self, id: &str) -> Result<BuildStatus, BackendError> {
        self.get_json(&format!("jobs/builds/{id}")).await
    }

    /// # Errors
    ///
    /// Returns transport, status or parse errors.
    pub async fn fetch_queue_item(&self, id: &str) -> Result<QueueItemStatus, BackendError> {
        self.get_json(&format!("jobs/queue/{id}")).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let response = self
            .http
            .get(self.endpoints.endpoint(path))
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 {
            // Unauthenticated is not retryable, so a watch stops here after one trigger.
            self.dispatcher.trigger(SESSION_EXPIRED_MESSAGE, None, None);
            return Err(BackendError::Unauthenticated { status });
        }
        if !(200..300).contains(&status) {
            return Err(BackendError::Status { status });
        }

        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        debug!(path, "job status fetched");
        serde_json::from_str(&text).map_err(|e| BackendError::Parse(e.to_string()))
    }

    /// Poll a build until it reaches a terminal state.
    pub fn watch_build(self: &Arc<Self>, id: impl Into<String>) -> PollHandle<BuildStatus> {
        let client = Arc::clone(self);
        let id: String = id.into();
        TerminalStatePoller::spawn(
            move || {
                let client = Arc::clone(&client);
                let id = id.clone();
                async move { client.fetch_build(&id).await }
            },
            BuildStatus::is_terminal,
            self.poll,
        )
    }

    /// Poll a queue item until it reaches a terminal state.
    pub fn watch_queue_item(self: &Arc<Self>, id: impl Into<String>) -> PollHandle<QueueItemStatus> {
        let client = Arc::clone(self);
        let id: String = id.into();
        TerminalStatePoller::spawn(
            move || {
                let client = Arc::clone(&client);
                let id = id.clone();
                async move { client.fetch_queue_item(&id).await }
            },
            QueueItemStatus::is_terminal,
            self.poll,
        )
    }
}

#[cfg(test)]
#[path = "jobs_test.rs"]
mod tests;
