//! Login handshake coordinator.
//!
//! ARCHITECTURE
//! ============
//! One handshake opens the identity provider in a secondary window and
//! waits for whichever of three sources fires first:
//! - closure poll: the window was closed, confirm via session refresh
//! - message channel: the provider posted `{type: "auth-result", success}`
//! - deadline: nothing happened in time
//!
//! DESIGN
//! ======
//! `HandshakeSession` is a small state machine, `Pending -> Settling ->
//! Settled`. Closure moves it to `Settling` while the refresh call races
//! the deadline. `settle` is the only transition into `Settled` and the
//! only place that releases the window, the listener and both timers, so
//! teardown happens exactly once whatever order the sources fire in.
//!
//! If the window cannot be opened the page falls back to a full navigation
//! to the provider; `resume_after_redirect` finishes that flow on return.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior, Sleep};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::backend::{AuthBackend, AuthEndpoints, BackendError};
use crate::config::{HandshakeTimings, PortalAuthConfig};
use crate::context::{AuthWindow, BrowserHost, InboundMessage, MessageSubscription};
use crate::continuity::SessionContinuityStore;
use crate::error::ErrorCode;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    /// The window closed but the session refresh did not confirm a login.
    #[error("Authentication failed after popup closed")]
    FailedAfterClose { reason: String },

    /// The provider reported failure over the message channel.
    #[error("Authentication failed")]
    Failed,

    #[error("Authentication timeout")]
    Timeout,

    /// Another handshake is still pending.
    #[error("Authentication already in progress")]
    InProgress,
}

impl ErrorCode for HandshakeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::FailedAfterClose { .. } | Self::Failed => "E_HANDSHAKE_FAILED",
            Self::Timeout => "E_HANDSHAKE_TIMEOUT",
            Self::InProgress => "E_HANDSHAKE_IN_PROGRESS",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAuthOptions {
    /// Where to go after login. Defaults to the current location when stored.
    pub return_url: Option<String>,
    /// Persist the return URL so it survives a full-page redirect.
    pub store_return_url: bool,
}

impl Default for StartAuthOptions {
    fn default() -> Self {
        Self { return_url: None, store_return_url: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Login confirmed in this page.
    Authenticated { navigated_to: Option<String> },
    /// No window could be opened; the page is navigating to the provider.
    Redirected { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Pending,
    Settling,
    Settled,
}

// =============================================================================
// SESSION
// =============================================================================

/// One in-flight login attempt. Never reused after settling.
struct HandshakeSession {
    id: Uuid,
    state: HandshakeState,
    window: Option<Box<dyn AuthWindow>>,
    closure_poll: Option<Interval>,
    listener: MessageSubscription,
    deadline: Option<Pin<Box<Sleep>>>,
}

enum Step {
    Deadline,
    Message(Option<InboundMessage>),
    ClosureTick,
}

impl HandshakeSession {
    fn new(window: Box<dyn AuthWindow>, listener: MessageSubscription, timings: HandshakeTimings) -> Self {
        let poll_every = timings.closure_poll.max(Duration::from_millis(1));
        let mut closure_poll = tokio::time::interval_at(tokio::time::Instant::now() + poll_every, poll_every);
        closure_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            id: Uuid::new_v4(),
            state: HandshakeState::Pending,
            window: Some(window),
            closure_poll: Some(closure_poll),
            listener,
            deadline: Some(Box::pin(tokio::time::sleep(timings.deadline))),
        }
    }

    /// Stop watching for closure and messages; only the deadline remains.
    fn begin_settling(&mut self) {
        if self.state == HandshakeState::Pending {
            self.state = HandshakeState::Settling;
            self.closure_poll = None;
            self.listener.unsubscribe();
        }
    }

    /// Move to `Settled` and release every channel. Returns false if the
    /// session had already settled.
    fn settle(&mut self) -> bool {
        if self.state == HandshakeState::Settled {
            return false;
        }
        self.state = HandshakeState::Settled;
        self.listener.unsubscribe();
        self.closure_poll = None;
        self.deadline = None;
        if let Some(window) = self.window.take() {
            if !window.is_closed() {
                window.close();
            }
        }
        true
    }

    fn window_closed(&self) -> bool {
        self.window.as_ref().is_none_or(|w| w.is_closed())
    }
}

async fn deadline_elapsed(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn closure_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// =============================================================================
// COORDINATOR
// =============================================================================

pub struct AuthHandshakeCoordinator {
    endpoints: AuthEndpoints,
    timings: HandshakeTimings,
    host: BrowserHost,
    backend: Arc<dyn AuthBackend>,
    continuity: SessionContinuityStore,
    in_flight: AtomicBool,
}

/// Clears the single-flight flag when the handshake future completes or is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AuthHandshakeCoordinator {
    pub fn new(
        endpoints: AuthEndpoints,
        timings: HandshakeTimings,
        host: BrowserHost,
        backend: Arc<dyn AuthBackend>,
        continuity: SessionContinuityStore,
    ) -> Self {
        Self { endpoints, timings, host, backend, continuity, in_flight: AtomicBool::new(false) }
    }

    pub fn from_config(
        config: &PortalAuthConfig,
        host: BrowserHost,
        backend: Arc<dyn AuthBackend>,
        continuity: SessionContinuityStore,
    ) -> Self {
        Self::new(AuthEndpoints::from_config(config), config.handshake, host, backend, continuity)
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one login handshake.
    ///
    /// # Errors
    ///
    /// - `Failed` when the provider posts a failure result
    /// - `FailedAfterClose` when the window closes and refresh is rejected
    /// - `Timeout` when the deadline elapses first
    /// - `InProgress` when another handshake is still pending
    pub async fn start_auth(&self, opts: StartAuthOptions) -> Result<HandshakeOutcome, HandshakeError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(HandshakeError::InProgress);
        }
        let _guard = InFlightGuard(&self.in_flight);

        if opts.store_return_url {
            let url = opts
                .return_url
                .clone()
                .unwrap_or_else(|| self.host.navigator.current_location());
            self.continuity.save_return_url(&url);
        }

        let start_url = self.endpoints.start_url();
        // Subscribe before opening so a fast provider cannot post into the void.
        let listener = self.host.messages.subscribe();
        let window = match self.host.opener.open(&start_url) {
            Ok(window) => window,
            Err(e) => {
                warn!(error = %e, url = %start_url, "secondary window unavailable; redirecting page");
                drop(listener);
                self.host.navigator.navigate(&start_url);
                return Ok(HandshakeOutcome::Redirected { url: start_url });
            }
        };

        let session = HandshakeSession::new(window, listener, self.timings);
        let span = info_span!("auth_handshake", id = %session.id);
        self.drive(session, &opts).instrument(span).await
    }

    async fn drive(
        &self,
        mut session: HandshakeSession,
        opts: &StartAuthOptions,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        let origin = self.endpoints.origin();
        info!("handshake started");

        loop {
            let step = tokio::select! {
                biased;
                () = deadline_elapsed(&mut session.deadline) => Step::Deadline,
                msg = session.listener.recv(), if session.listener.is_active() => Step::Message(msg),
                () = closure_tick(&mut session.closure_poll) => Step::ClosureTick,
            };

            match step {
                Step::Deadline => {
                    session.settle();
                    warn!("handshake deadline elapsed");
                    return Err(HandshakeError::Timeout);
                }
                Step::Message(None) => {
                    // Hub gone: keep racing closure against the deadline.
                    session.listener.unsubscribe();
                }
                Step::Message(Some(msg)) => {
                    let Some(success) = msg.auth_result(&origin) else {
                        continue;
                    };
                    session.settle();
                    if success {
                        info!(channel = "message", "handshake succeeded");
                        return Ok(self.complete_success(opts));
                    }
                    info!(channel = "message", "provider reported failure");
                    return Err(HandshakeError::Failed);
                }
                Step::ClosureTick => {
                    if session.window_closed() {
                        break;
                    }
                }
            }
        }

        session.begin_settling();
        debug!("window closed; confirming session");

        let refreshed = tokio::select! {
            biased;
            () = deadline_elapsed(&mut session.deadline) => None,
            result = self.backend.refresh() => Some(result),
        };
        session.settle();

        match refreshed {
            None => {
                warn!("handshake deadline elapsed during refresh");
                Err(HandshakeError::Timeout)
            }
            Some(Ok(_)) => {
                info!(channel = "closure", "handshake succeeded");
                Ok(self.complete_success(opts))
            }
            Some(Err(e)) => {
                info!(channel = "closure", error = %e, "refresh rejected after window closed");
                Err(HandshakeError::FailedAfterClose { reason: e.to_string() })
            }
        }
    }

    /// Consume the continuity record and navigate to the right place. Any
    /// stored session error is stale once the login is confirmed.
    fn complete_success(&self, opts: &StartAuthOptions) -> HandshakeOutcome {
        self.continuity.clear_session_error();
        let stored = self.continuity.take_return_url();
        let target = match stored {
            Some(url) if opts.store_return_url => Some(url),
            _ => opts.return_url.clone(),
        };
        if let Some(url) = &target {
            self.host.navigator.navigate(url);
        }
        HandshakeOutcome::Authenticated { navigated_to: target }
    }

    /// Finish a login that fell back to full-page navigation.
    ///
    /// Call on page load. Navigates to the stored return URL, if any, once
    /// the session is confirmed.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the session is not authenticated; the
    /// continuity record is left for a later successful attempt.
    pub async fn resume_after_redirect(&self) -> Result<Option<String>, BackendError> {
        self.backend.refresh().await?;
        self.continuity.clear_session_error();
        let target = self.continuity.take_return_url();
        if let Some(url) = &target {
            info!(url = %url, "restoring pre-login location");
            self.host.navigator.navigate(url);
        }
        Ok(target)
    }
}

#[cfg(test)]
#[path = "handshake_test.rs"]
mod tests;
