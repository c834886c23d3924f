//! Browser execution-context seams.
//!
//! SYSTEM CONTEXT
//! ==============
//! The handshake needs three things from its host: a way to open a
//! secondary window, a way to navigate the main page, and the stream of
//! cross-context messages posted to the main page. Hosts (a WASM shell, or
//! tests) implement the traits; `MessageHub` is the in-process message bus
//! the host forwards posted messages into.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::ErrorCode;

/// Payload `type` the identity provider posts back to the opener.
pub const AUTH_RESULT_TYPE: &str = "auth-result";

const MESSAGE_HUB_CAPACITY: usize = 32;

// =============================================================================
// WINDOWS
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum WindowError {
    #[error("popup blocked")]
    PopupBlocked,
    #[error("secondary windows unsupported: {0}")]
    Unsupported(String),
}

impl ErrorCode for WindowError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::PopupBlocked => "E_POPUP_BLOCKED",
            Self::Unsupported(_) => "E_POPUP_UNSUPPORTED",
        }
    }
}

/// Handle to an opened secondary window.
pub trait AuthWindow: Send + Sync {
    fn is_closed(&self) -> bool;

    /// Close the window. Closing an already-closed window is a no-op.
    fn close(&self);
}

pub trait WindowOpener: Send + Sync {
    /// Open a secondary window at `url`.
    ///
    /// # Errors
    ///
    /// Returns `PopupBlocked` or `Unsupported` when no window could be opened.
    fn open(&self, url: &str) -> Result<Box<dyn AuthWindow>, WindowError>;
}

/// Main-page location.
pub trait Navigator: Send + Sync {
    fn current_location(&self) -> String;

    fn navigate(&self, url: &str);
}

/// Everything the auth flows need from the hosting page.
#[derive(Clone)]
pub struct BrowserHost {
    pub opener: Arc<dyn WindowOpener>,
    pub navigator: Arc<dyn Navigator>,
    pub messages: MessageHub,
}

// =============================================================================
// MESSAGES
// =============================================================================

/// A message posted to the main page from another context.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub origin: String,
    pub data: serde_json::Value,
}

#[derive(Deserialize)]
struct AuthResultPayload {
    #[serde(rename = "type")]
    kind: String,
    success: bool,
}

impl InboundMessage {
    #[must_use]
    pub fn new(origin: impl Into<String>, data: serde_json::Value) -> Self {
        Self { origin: origin.into(), data }
    }

    /// Declared handshake result, or `None` if the message is not an
    /// `auth-result` from `expected_origin`.
    #[must_use]
    pub fn auth_result(&self, expected_origin: &str) -> Option<bool> {
        if self.origin != expected_origin {
            debug!(origin = %self.origin, expected_origin, "ignoring message from foreign origin");
            return None;
        }
        let payload = AuthResultPayload::deserialize(&self.data).ok()?;
        (payload.kind == AUTH_RESULT_TYPE).then_some(payload.success)
    }
}

/// Fan-out bus for posted messages. Clones share the same bus.
#[derive(Clone)]
pub struct MessageHub {
    tx: broadcast::Sender<InboundMessage>,
}

impl Default for MessageHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHub {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(MESSAGE_HUB_CAPACITY);
        Self { tx }
    }

    /// Deliver a message to every current listener. Dropped when nobody listens.
    pub fn post(&self, message: InboundMessage) {
        let _ = self.tx.send(message);
    }

    #[must_use]
    pub fn subscribe(&self) -> MessageSubscription {
        MessageSubscription { rx: Some(self.tx.subscribe()) }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Listener registration on a `MessageHub`.
pub struct MessageSubscription {
    rx: Option<broadcast::Receiver<InboundMessage>>,
}

impl MessageSubscription {
    /// Next message, or `None` once unsubscribed or the hub is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "message listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Release the registration. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.rx = None;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }
}

#[cfg(test)]
#[path = "context_test.rs"]
mod tests;
