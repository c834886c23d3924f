//! Terminal-state poller.
//!
//! DESIGN
//! ======
//! Fetch a status every `interval` until an injected predicate says the
//! status is terminal. The same loop tracks remote builds, queue items and
//! session validity; only the status type and predicate differ.
//!
//! ERROR HANDLING
//! ==============
//! Retryable fetch errors (per `ErrorCode::retryable`) are retried after
//! `retry_delay` with an explicit consecutive-failure counter, checked
//! before each retry. Once more than `max_retries` retries would be needed
//! the poll stops with `PollError::Exhausted`. A successful fetch resets
//! the counter. A non-retryable error stops the poll at once with
//! `PollError::Rejected`; asking again would get the same answer.
//!
//! CANCELLATION
//! ============
//! A cancelled poll issues no further fetch. A fetch already in flight is
//! dropped at the next await point and its result is never committed.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between a non-terminal status and the next fetch.
    pub interval: Duration,
    /// Retries allowed after consecutive fetch failures.
    pub max_retries: u32,
    /// Delay before retrying a failed fetch.
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// A fetch failed and will be retried.
    #[error("status fetch failed: {0}")]
    Transient(String),

    /// Retry budget spent.
    #[error("status polling gave up after {attempts} failed attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The fetch failed in a way retrying cannot fix.
    #[error("status polling stopped: {error}")]
    Rejected { code: &'static str, error: String },

    #[error("status polling cancelled")]
    Cancelled,
}

impl ErrorCode for PollError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Transient(_) => "E_POLL_TRANSIENT",
            Self::Exhausted { .. } => "E_POLL_EXHAUSTED",
            Self::Rejected { .. } => "E_POLL_REJECTED",
            Self::Cancelled => "E_POLL_CANCELLED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Live view of one poll session.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot<S> {
    /// Last committed status.
    pub status: Option<S>,
    /// Last fetch error; cleared by the next successful fetch.
    pub error: Option<PollError>,
    /// False once the poll finished, failed or was cancelled.
    pub active: bool,
    /// Fetches issued so far.
    pub fetches: u32,
}

impl<S> Default for PollSnapshot<S> {
    fn default() -> Self {
        Self { status: None, error: None, active: true, fetches: 0 }
    }
}

// =============================================================================
// CORE LOOP
// =============================================================================

/// Poll inline until terminal. Cancel by dropping the future.
///
/// # Errors
///
/// Returns `PollError::Exhausted` once the retry budget is spent, or
/// `PollError::Rejected` on the first non-retryable fetch error.
pub async fn poll_until_terminal<S, E, F, Fut, P>(fetch: F, is_terminal: P, config: PollConfig) -> Result<S, PollError>
where
    S: Clone,
    E: ErrorCode,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, E>>,
    P: Fn(&S) -> bool,
{
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let (snapshot_tx, _) = watch::channel(PollSnapshot::default());
    run_poll(fetch, is_terminal, config, cancel_rx, &snapshot_tx).await
}

async fn run_poll<S, E, F, Fut, P>(
    mut fetch: F,
    is_terminal: P,
    config: PollConfig,
    mut cancel_rx: watch::Receiver<bool>,
    snapshot: &watch::Sender<PollSnapshot<S>>,
) -> Result<S, PollError>
where
    S: Clone,
    E: ErrorCode,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, E>>,
    P: Fn(&S) -> bool,
{
    let mut consecutive_failures: u32 = 0;

    loop {
        if *cancel_rx.borrow() {
            return Err(PollError::Cancelled);
        }

        snapshot.send_modify(|s| s.fetches += 1);
        let result = tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => return Err(PollError::Cancelled),
            result = fetch() => result,
        };

        let delay = match result {
            Ok(status) => {
                consecutive_failures = 0;
                let terminal = is_terminal(&status);
                snapshot.send_modify(|s| {
                    s.status = Some(status.clone());
                    s.error = None;
                });
                if terminal {
                    debug!(fetches = snapshot.borrow().fetches, "poll reached terminal status");
                    return Ok(status);
                }
                config.interval
            }
            Err(e) => {
                let last_error = e.to_string();
                if !e.retryable() {
                    let err = PollError::Rejected { code: e.error_code(), error: last_error };
                    warn!(error = %err, code = e.error_code(), "status polling stopped");
                    snapshot.send_modify(|s| s.error = Some(err.clone()));
                    return Err(err);
                }
                if consecutive_failures >= config.max_retries {
                    let err = PollError::Exhausted { attempts: consecutive_failures + 1, last_error };
                    warn!(error = %err, "status polling stopped");
                    snapshot.send_modify(|s| s.error = Some(err.clone()));
                    return Err(err);
                }
                consecutive_failures += 1;
                warn!(
                    error = %last_error,
                    attempt = consecutive_failures,
                    total = config.max_retries,
                    "status fetch failed; retrying"
                );
                snapshot.send_modify(|s| s.error = Some(PollError::Transient(last_error)));
                config.retry_delay
            }
        };

        tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => return Err(PollError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

// =============================================================================
// SPAWNED POLLER
// =============================================================================

pub struct TerminalStatePoller;

impl TerminalStatePoller {
    /// Start polling on a background task.
    ///
    /// Polling does not pause for background views: a job finishing while
    /// the consumer is hidden must still be observed.
    pub fn spawn<S, E, F, Fut, P>(fetch: F, is_terminal: P, config: PollConfig) -> PollHandle<S>
    where
        S: Clone + Send + Sync + 'static,
        E: ErrorCode + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, E>> + Send,
        P: Fn(&S) -> bool + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(PollSnapshot::default());

        let task = tokio::spawn(async move {
            let result = run_poll(fetch, is_terminal, config, cancel_rx, &snapshot_tx).await;
            snapshot_tx.send_modify(|s| s.active = false);
            result
        });

        PollHandle { snapshot_rx, cancel_tx, task: Some(task) }
    }
}

/// Owner of a spawned poll. Dropping the handle cancels the poll.
pub struct PollHandle<S> {
    snapshot_rx: watch::Receiver<PollSnapshot<S>>,
    cancel_tx: watch::Sender<bool>,
    task: Option<JoinHandle<Result<S, PollError>>>,
}

impl<S: Clone> PollHandle<S> {
    #[must_use]
    pub fn snapshot(&self) -> PollSnapshot<S> {
        self.snapshot_rx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot<S>> {
        self.snapshot_rx.clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.snapshot_rx.borrow().active
    }

    /// Stop polling. Idempotent.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Wait for the poll to finish.
    ///
    /// # Errors
    ///
    /// Returns the poll's error, or `Cancelled` if the task was aborted.
    pub async fn wait(mut self) -> Result<S, PollError> {
        let Some(task) = self.task.take() else {
            return Err(PollError::Cancelled);
        };
        task.await.unwrap_or(Err(PollError::Cancelled))
    }
}

impl<S> Drop for PollHandle<S> {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel_tx.send_replace(true);
        }
    }
}

#[cfg(test)]
#[path = "poller_test.rs"]
mod tests;
