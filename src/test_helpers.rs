//! Fakes for the browser and backend seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{AuthBackend, AuthEndpoints, BackendError, SessionProfile};
use crate::config::HandshakeTimings;
use crate::context::{AuthWindow, BrowserHost, MessageHub, Navigator, WindowError, WindowOpener};
use crate::continuity::SessionContinuityStore;
use crate::handshake::AuthHandshakeCoordinator;
use crate::storage::MemoryStorage;

pub const BACKEND: &str = "https://portal.example.test";

// =============================================================================
// WINDOW
// =============================================================================

#[derive(Default)]
pub struct WindowProbe {
    pub closed: AtomicBool,
    pub close_calls: AtomicUsize,
}

impl WindowProbe {
    /// Simulate the user closing the window.
    pub fn user_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeWindow(pub Arc<WindowProbe>);

impl AuthWindow for FakeWindow {
    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    fn close(&self) {
        self.0.close_calls.fetch_add(1, Ordering::SeqCst);
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeOpener {
    pub blocked: bool,
    pub opened: Mutex<Vec<String>>,
    pub probes: Mutex<Vec<Arc<WindowProbe>>>,
}

impl FakeOpener {
    pub fn blocked() -> Self {
        Self { blocked: true, ..Self::default() }
    }

    pub fn last_probe(&self) -> Option<Arc<WindowProbe>> {
        self.probes.lock().unwrap().last().cloned()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl WindowOpener for FakeOpener {
    fn open(&self, url: &str) -> Result<Box<dyn AuthWindow>, WindowError> {
        self.opened.lock().unwrap().push(url.to_owned());
        if self.blocked {
            return Err(WindowError::PopupBlocked);
        }
        let probe = Arc::new(WindowProbe::default());
        self.probes.lock().unwrap().push(Arc::clone(&probe));
        Ok(Box::new(FakeWindow(probe)))
    }
}

// =============================================================================
// NAVIGATOR
// =============================================================================

pub struct RecordingNavigator {
    pub location: String,
    pub navigations: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn at(location: &str) -> Self {
        Self { location: location.to_owned(), navigations: Mutex::new(Vec::new()) }
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_location(&self) -> String {
        self.location.clone()
    }

    fn navigate(&self, url: &str) {
        self.navigations.lock().unwrap().push(url.to_owned());
    }
}

// =============================================================================
// BACKEND
// =============================================================================

#[derive(Default)]
pub struct MockBackend {
    pub refresh_results: Mutex<VecDeque<Result<SessionProfile, BackendError>>>,
    pub refresh_delay: Option<Duration>,
    pub refresh_calls: AtomicUsize,
    pub logout_result: Mutex<Option<BackendError>>,
    pub logout_calls: AtomicUsize,
}

impl MockBackend {
    pub fn with_refresh(results: Vec<Result<SessionProfile, BackendError>>) -> Self {
        Self { refresh_results: Mutex::new(results.into()), ..Self::default() }
    }

    pub fn ok() -> Self {
        Self::with_refresh(vec![Ok(SessionProfile::default())])
    }

    pub fn unauthenticated() -> Self {
        Self::with_refresh(vec![Err(BackendError::Unauthenticated { status: 401 })])
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AuthBackend for MockBackend {
    async fn refresh(&self) -> Result<SessionProfile, BackendError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.refresh_delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.refresh_results.lock().unwrap().pop_front();
        // Unscripted calls succeed.
        next.unwrap_or(Ok(SessionProfile::default()))
    }

    async fn logout(&self) -> Result<(), BackendError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        match self.logout_result.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// =============================================================================
// FIXTURE
// =============================================================================

pub struct Fixture {
    pub opener: Arc<FakeOpener>,
    pub navigator: Arc<RecordingNavigator>,
    pub messages: MessageHub,
    pub backend: Arc<MockBackend>,
    pub storage: MemoryStorage,
    pub continuity: SessionContinuityStore,
    pub coordinator: Arc<AuthHandshakeCoordinator>,
}

pub fn timings() -> HandshakeTimings {
    HandshakeTimings { deadline: Duration::from_secs(300), closure_poll: Duration::from_millis(500) }
}

pub fn fixture(opener: FakeOpener, backend: MockBackend) -> Fixture {
    let opener = Arc::new(opener);
    let navigator = Arc::new(RecordingNavigator::at("/catalog/components?page=2"));
    let messages = MessageHub::new();
    let backend = Arc::new(backend);
    let storage = MemoryStorage::new();
    let continuity = SessionContinuityStore::new(Arc::new(storage.clone()));
    let host = BrowserHost { opener: opener.clone(), navigator: navigator.clone(), messages: messages.clone() };
    let coordinator = Arc::new(AuthHandshakeCoordinator::new(
        AuthEndpoints::new(BACKEND, "dev"),
        timings(),
        host,
        backend.clone(),
        continuity.clone(),
    ));
    Fixture { opener, navigator, messages, backend, storage, continuity, coordinator }
}

/// Let spawned tasks run until they block.
pub async fn settle_tasks() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
