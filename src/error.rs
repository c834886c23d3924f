//! Error classification shared by every module.
//!
//! DESIGN
//! ======
//! Each module owns its `thiserror` enum. This trait gives them all a
//! grepable code and a retryable flag so callers (the job poller, the auth
//! error dialog) can decide what to do without matching on concrete types.

/// Grepable error code and retryable flag.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Errors surfaced to the user as a single dialog message.
///
/// Only handshake failures, handshake timeouts and exhausted polls qualify;
/// popup-blocked and storage errors are recovered where they occur.
#[must_use]
pub fn surfaces_to_user(err: &(impl ErrorCode + ?Sized)) -> bool {
    matches!(err.error_code(), "E_HANDSHAKE_FAILED" | "E_HANDSHAKE_TIMEOUT" | "E_POLL_EXHAUSTED")
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
