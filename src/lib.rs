//! Session recovery and external-operation tracking for the developer portal.
//!
//! ARCHITECTURE
//! ============
//! - [`poller`]: poll a status until an injected predicate says it is terminal
//! - [`handshake`]: one login attempt through a secondary window
//! - [`continuity`]: return URL and logout guard in per-tab storage
//! - [`dispatcher`]: process-wide auth error trigger and the dialog it drives
//! - [`session`], [`jobs`]: the poller applied to session validity and remote jobs
//!
//! Browser specifics sit behind [`context`] and [`storage`] traits so the
//! same state machines run in a WASM host and under tokio tests.

pub mod backend;
pub mod config;
pub mod context;
pub mod continuity;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod jobs;
pub mod poller;
pub mod session;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use backend::{AuthBackend, AuthEndpoints, BackendError, HttpAuthBackend};
pub use config::PortalAuthConfig;
pub use context::{AuthWindow, BrowserHost, MessageHub, Navigator, WindowOpener};
pub use continuity::SessionContinuityStore;
pub use dispatcher::{AuthErrorDialog, AuthErrorDispatcher};
pub use error::ErrorCode;
pub use handshake::{AuthHandshakeCoordinator, HandshakeError, HandshakeOutcome, StartAuthOptions};
pub use poller::{PollConfig, PollError, PollHandle, TerminalStatePoller};
