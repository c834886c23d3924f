//! Session continuity: return URL and logout guard.
//!
//! DESIGN
//! ======
//! Every value here is a depth-one, single-consumer slot. Reads are always
//! `take_*` (read-then-delete) so two handshakes can never both consume the
//! same stale return URL, and a later unrelated login never redirects to an
//! old location.
//!
//! ERROR HANDLING
//! ==============
//! Storage failures are logged and swallowed. Losing the return URL only
//! costs the user a navigation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::SessionStorage;

pub const RETURN_URL_KEY: &str = "portal.auth.returnUrl";
pub const LOGGED_OUT_KEY: &str = "portal.auth.justLoggedOut";
pub const SESSION_ERROR_KEY: &str = "portal.auth.sessionError";

/// Remembered pre-login location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuityRecord {
    pub return_url: String,
}

#[derive(Clone)]
pub struct SessionContinuityStore {
    storage: Arc<dyn SessionStorage>,
}

impl SessionContinuityStore {
    #[must_use]
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self { storage }
    }

    /// Remember where the user was. Replaces any unconsumed record.
    pub fn save_return_url(&self, url: &str) {
        let record = ContinuityRecord { return_url: url.to_owned() };
        let Ok(raw) = serde_json::to_string(&record) else {
            return;
        };
        if let Err(e) = self.storage.set(RETURN_URL_KEY, &raw) {
            warn!(error = %e, "failed to save return url");
        }
    }

    /// Read and delete the return URL. A corrupt record counts as absent.
    pub fn take_return_url(&self) -> Option<String> {
        let raw = self.take(RETURN_URL_KEY)?;
        match serde_json::from_str::<ContinuityRecord>(&raw) {
            Ok(record) => Some(record.return_url),
            Err(e) => {
                warn!(error = %e, "discarding unreadable continuity record");
                None
            }
        }
    }

    /// Set immediately before a logout redirect.
    pub fn mark_logged_out(&self) {
        if let Err(e) = self.storage.set(LOGGED_OUT_KEY, "true") {
            warn!(error = %e, "failed to set logout guard");
        }
    }

    /// Read and delete the logout guard.
    pub fn consume_logged_out_guard(&self) -> bool {
        self.take(LOGGED_OUT_KEY).is_some_and(|v| v == "true")
    }

    /// Record the last session validity error for the dialog owner.
    pub fn record_session_error(&self, message: &str) {
        if let Err(e) = self.storage.set(SESSION_ERROR_KEY, message) {
            warn!(error = %e, "failed to record session error");
        }
    }

    /// Read and delete the last session validity error.
    pub fn take_session_error(&self) -> Option<String> {
        self.take(SESSION_ERROR_KEY).filter(|m| !m.is_empty())
    }

    /// Drop a stored session error once it no longer applies.
    pub fn clear_session_error(&self) {
        if let Err(e) = self.storage.remove(SESSION_ERROR_KEY) {
            warn!(error = %e, "failed to clear session error");
        }
    }

    fn take(&self, key: &str) -> Option<String> {
        match self.storage.take(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, key, "storage read failed");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "continuity_test.rs"]
mod tests;
