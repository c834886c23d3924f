//! Global auth-error dispatcher and the dialog state that consumes it.
//!
//! SYSTEM CONTEXT
//! ==============
//! Any HTTP caller that sees an unauthenticated response calls
//! [`trigger`], including code with no handle on the UI. The one mounted
//! [`AuthErrorDialog`] registers itself as the handler and owns the dialog
//! state; retrying runs a login handshake.
//!
//! DESIGN
//! ======
//! The registry is a single slot. `register` replaces, `unregister`
//! clears, and `trigger` with an empty slot is a silent no-op: errors
//! raised before the UI mounts are dropped on purpose, since there is
//! nothing to show them in.
//!
//! The dialog is single-flight. A trigger while visible replaces the
//! message and callbacks instead of stacking, and a retry while another
//! retry runs is rejected.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::continuity::SessionContinuityStore;
use crate::handshake::{AuthHandshakeCoordinator, HandshakeError, HandshakeOutcome, StartAuthOptions};

pub type SuccessCallback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&HandshakeError) + Send + Sync>;

/// One `trigger` call as seen by the registered handler.
#[derive(Clone)]
pub struct AuthErrorRequest {
    pub message: String,
    pub on_success: Option<SuccessCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl AuthErrorRequest {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), on_success: None, on_error: None }
    }
}

impl fmt::Debug for AuthErrorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthErrorRequest")
            .field("message", &self.message)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

pub type AuthErrorHandler = Arc<dyn Fn(AuthErrorRequest) + Send + Sync>;

// =============================================================================
// DISPATCHER
// =============================================================================

/// Zero-or-one registered handler.
pub struct AuthErrorDispatcher {
    slot: Mutex<Option<AuthErrorHandler>>,
}

impl Default for AuthErrorDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthErrorDispatcher {
    #[must_use]
    pub const fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<AuthErrorHandler>> {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Install `handler`, replacing any current registration.
    pub fn register(&self, handler: AuthErrorHandler) {
        if self.lock().replace(handler).is_some() {
            debug!("auth error handler replaced");
        }
    }

    pub fn unregister(&self) {
        self.lock().take();
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.lock().is_some()
    }

    /// Deliver an auth error to the registered handler.
    ///
    /// Returns false when nothing is registered; the error is dropped.
    pub fn trigger(
        &self,
        message: impl Into<String>,
        on_success: Option<SuccessCallback>,
        on_error: Option<ErrorCallback>,
    ) -> bool {
        let message = message.into();
        // Clone out of the lock so the handler may re-enter the dispatcher.
        let handler = self.lock().clone();
        let Some(handler) = handler else {
            debug!(message = %message, "auth error dropped: no handler registered");
            return false;
        };
        handler(AuthErrorRequest { message, on_success, on_error });
        true
    }
}

static GLOBAL: AuthErrorDispatcher = AuthErrorDispatcher::new();

/// Process-wide dispatcher.
#[must_use]
pub fn global() -> &'static AuthErrorDispatcher {
    &GLOBAL
}

pub fn register(handler: AuthErrorHandler) {
    GLOBAL.register(handler);
}

pub fn unregister() {
    GLOBAL.unregister();
}

/// Show the auth error dialog from anywhere. Safe to call before any UI mounts.
pub fn trigger(message: impl Into<String>, on_success: Option<SuccessCallback>, on_error: Option<ErrorCallback>) -> bool {
    GLOBAL.trigger(message, on_success, on_error)
}

// =============================================================================
// DIALOG STATE
// =============================================================================

#[derive(Clone, Default)]
pub struct AuthErrorState {
    pub visible: bool,
    pub message: String,
    /// A retry handshake is running.
    pub retrying: bool,
    /// Times the dialog went from hidden to visible.
    pub open_count: u32,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl fmt::Debug for AuthErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthErrorState")
            .field("visible", &self.visible)
            .field("message", &self.message)
            .field("retrying", &self.retrying)
            .field("open_count", &self.open_count)
            .finish_non_exhaustive()
    }
}

/// The single owner of auth error dialog state.
#[derive(Clone)]
pub struct AuthErrorDialog {
    state: Arc<watch::Sender<AuthErrorState>>,
}

impl Default for AuthErrorDialog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthErrorDialog {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AuthErrorState::default());
        Self { state: Arc::new(tx) }
    }

    #[must_use]
    pub fn state(&self) -> AuthErrorState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthErrorState> {
        self.state.subscribe()
    }

    /// Register this dialog as the dispatcher's handler.
    pub fn mount(&self, dispatcher: &AuthErrorDispatcher) {
        let dialog = self.clone();
        dispatcher.register(Arc::new(move |request| dialog.show(request)));
    }

    pub fn unmount(&self, dispatcher: &AuthErrorDispatcher) {
        dispatcher.unregister();
    }

    /// Show `request`, replacing whatever is currently displayed.
    pub fn show(&self, request: AuthErrorRequest) {
        self.state.send_modify(|s| {
            if !s.visible {
                s.open_count += 1;
            }
            s.visible = true;
            s.message = request.message;
            s.on_success = request.on_success;
            s.on_error = request.on_error;
        });
    }

    /// Hide the dialog and drop its callbacks.
    pub fn dismiss(&self) {
        self.state.send_modify(|s| {
            s.visible = false;
            s.message.clear();
            s.on_success = None;
            s.on_error = None;
        });
    }

    /// Show a session error persisted by an earlier page, if any.
    pub fn show_pending_session_error(&self, continuity: &SessionContinuityStore) -> bool {
        let Some(message) = continuity.take_session_error() else {
            return false;
        };
        self.show(AuthErrorRequest::new(message));
        true
    }

    /// Treat every non-null value on `errors` as a `trigger`.
    ///
    /// The persisted copy of a shown error is consumed, so a reload after
    /// re-login does not show it again.
    pub fn watch_session_errors(
        &self,
        mut errors: watch::Receiver<Option<String>>,
        continuity: SessionContinuityStore,
    ) -> JoinHandle<()> {
        let dialog = self.clone();
        tokio::spawn(async move {
            loop {
                let current = errors.borrow_and_update().clone();
                if let Some(message) = current {
                    continuity.clear_session_error();
                    dialog.show(AuthErrorRequest::new(message));
                }
                if errors.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Run a login handshake for the visible error.
    ///
    /// Success hides the dialog and calls `on_success`. Failure calls
    /// `on_error` and leaves the dialog open for another attempt.
    ///
    /// # Errors
    ///
    /// Returns the handshake error, or `InProgress` if a retry is running.
    pub async fn retry(&self, coordinator: &AuthHandshakeCoordinator) -> Result<HandshakeOutcome, HandshakeError> {
        let mut claimed = false;
        self.state.send_if_modified(|s| {
            if s.retrying {
                return false;
            }
            s.retrying = true;
            claimed = true;
            true
        });
        if !claimed {
            return Err(HandshakeError::InProgress);
        }

        let result = coordinator.start_auth(StartAuthOptions::default()).await;

        let mut on_success = None;
        let mut on_error = None;
        self.state.send_modify(|s| {
            s.retrying = false;
            match &result {
                Ok(HandshakeOutcome::Authenticated { .. }) => {
                    on_success = s.on_success.take();
                    s.on_error = None;
                    s.visible = false;
                    s.message.clear();
                }
                Ok(HandshakeOutcome::Redirected { .. }) => {}
                Err(_) => on_error = s.on_error.clone(),
            }
        });

        match &result {
            Ok(HandshakeOutcome::Authenticated { .. }) => {
                info!("auth retry succeeded");
                if let Some(cb) = on_success {
                    cb();
                }
            }
            Ok(HandshakeOutcome::Redirected { url }) => info!(url = %url, "auth retry redirected page"),
            Err(e) => {
                warn!(error = %e, "auth retry failed");
                if let Some(cb) = on_error {
                    cb(e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
