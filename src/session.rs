//! Session validity monitoring and logout.
//!
//! DESIGN
//! ======
//! The monitor is the terminal-state poller pointed at the refresh
//! endpoint: "expired" and "logged out" are the terminal statuses. When the
//! session expires, or cannot be verified at all, the message is persisted
//! (so a reload still shows it) and published on a watch channel the auth
//! error dialog listens to. The dialog consumes the persisted copy when it
//! shows the message; a confirmed login clears it too.
//!
//! The logout guard closes a race: right after logout the refresh
//! endpoint can still answer 200 from a cached cookie, so the first check
//! after logout trusts the guard instead of the backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{AuthBackend, BackendError};
use crate::context::Navigator;
use crate::continuity::SessionContinuityStore;
use crate::poller::{PollConfig, PollError, poll_until_terminal};

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";
pub const SESSION_UNVERIFIED_MESSAGE: &str = "We could not verify your session. Please log in again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionValidity {
    Valid,
    /// Refresh rejected with this status.
    Expired { status: u16 },
    /// The user logged out; no refresh was attempted.
    LoggedOut,
}

impl SessionValidity {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired { .. } | Self::LoggedOut)
    }
}

/// Check the session once.
///
/// # Errors
///
/// Returns transport errors; rejections are reported as `Expired`.
pub async fn check_session(
    backend: &dyn AuthBackend,
    continuity: &SessionContinuityStore,
) -> Result<SessionValidity, BackendError> {
    if continuity.consume_logged_out_guard() {
        debug!("logout guard present; skipping refresh");
        return Ok(SessionValidity::LoggedOut);
    }
    match backend.refresh().await {
        Ok(_) => Ok(SessionValidity::Valid),
        Err(BackendError::Unauthenticated { status }) => Ok(SessionValidity::Expired { status }),
        Err(e) => Err(e),
    }
}

// =============================================================================
// MONITOR
// =============================================================================

/// Periodic session check. Dropping the monitor stops it.
pub struct SessionMonitor {
    errors: watch::Receiver<Option<String>>,
    task: JoinHandle<()>,
}

impl SessionMonitor {
    pub fn spawn(
        backend: Arc<dyn AuthBackend>,
        continuity: SessionContinuityStore,
        interval: Duration,
        retry: PollConfig,
    ) -> Self {
        let (tx, errors) = watch::channel(None);
        let config = PollConfig { interval, ..retry };

        let task = tokio::spawn(async move {
            let result = poll_until_terminal(
                || {
                    let backend = backend.clone();
                    let continuity = continuity.clone();
                    async move { check_session(backend.as_ref(), &continuity).await }
                },
                SessionValidity::is_terminal,
                config,
            )
            .await;

            let message = match result {
                Ok(SessionValidity::Expired { status }) => {
                    info!(status, "session expired");
                    Some(SESSION_EXPIRED_MESSAGE)
                }
                Ok(_) | Err(PollError::Cancelled) => None,
                Err(e) => {
                    warn!(error = %e, "session check gave up");
                    Some(SESSION_UNVERIFIED_MESSAGE)
                }
            };
            if let Some(message) = message {
                continuity.record_session_error(message);
                let _ = tx.send(Some(message.to_owned()));
            }
        });

        Self { errors, task }
    }

    /// Live "last session error" signal.
    #[must_use]
    pub fn errors(&self) -> watch::Receiver<Option<String>> {
        self.errors.clone()
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// LOGOUT
// =============================================================================

/// Log out and leave the page.
///
/// The backend call is best effort: local cleanup and the redirect happen
/// even if it fails.
pub async fn logout(
    backend: &dyn AuthBackend,
    continuity: &SessionContinuityStore,
    navigator: &dyn Navigator,
    redirect_url: &str,
) {
    continuity.mark_logged_out();
    if let Err(e) = backend.logout().await {
        warn!(error = %e, "logout request failed; continuing");
    }
    info!(redirect_url, "logged out");
    navigator.navigate(redirect_url);
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
