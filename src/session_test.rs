use super::*;
use crate::storage::MemoryStorage;
use crate::test_helpers::{MockBackend, RecordingNavigator};
use std::sync::atomic::Ordering;

fn continuity() -> SessionContinuityStore {
    SessionContinuityStore::new(Arc::new(MemoryStorage::new()))
}

fn retry() -> PollConfig {
    PollConfig { interval: Duration::from_secs(60), max_retries: 2, retry_delay: Duration::from_secs(1) }
}

// =============================================================================
// check_session
// =============================================================================

#[tokio::test]
async fn check_session_maps_refresh_results() {
    let store = continuity();
    assert_eq!(check_session(&MockBackend::ok(), &store).await.unwrap(), SessionValidity::Valid);
    assert_eq!(
        check_session(&MockBackend::unauthenticated(), &store).await.unwrap(),
        SessionValidity::Expired { status: 401 }
    );

    let down = MockBackend::with_refresh(vec![Err(BackendError::Request("reset".into()))]);
    assert!(check_session(&down, &store).await.is_err());
}

#[tokio::test]
async fn logout_guard_short_circuits_next_check_only() {
    let store = continuity();
    let backend = MockBackend::ok();
    store.mark_logged_out();

    assert_eq!(check_session(&backend, &store).await.unwrap(), SessionValidity::LoggedOut);
    assert_eq!(backend.refresh_calls(), 0);
    assert_eq!(check_session(&backend, &store).await.unwrap(), SessionValidity::Valid);
    assert_eq!(backend.refresh_calls(), 1);
}

// =============================================================================
// monitor
// =============================================================================

#[tokio::test(start_paused = true)]
async fn monitor_publishes_and_persists_expiry() {
    let store = continuity();
    let backend = Arc::new(MockBackend::with_refresh(vec![
        Ok(Default::default()),
        Ok(Default::default()),
        Err(BackendError::Unauthenticated { status: 401 }),
    ]));
    let monitor = SessionMonitor::spawn(backend.clone(), store.clone(), Duration::from_secs(60), retry());
    let mut errors = monitor.errors();

    errors.wait_for(Option::is_some).await.unwrap();
    assert_eq!(errors.borrow().as_deref(), Some(SESSION_EXPIRED_MESSAGE));
    assert_eq!(backend.refresh_calls(), 3);
    assert_eq!(store.take_session_error().as_deref(), Some(SESSION_EXPIRED_MESSAGE));
}

#[tokio::test(start_paused = true)]
async fn monitor_reports_and_persists_unverifiable_session_after_retries() {
    let store = continuity();
    let backend = Arc::new(MockBackend::with_refresh(vec![
        Err(BackendError::Request("a".into())),
        Err(BackendError::Request("b".into())),
        Err(BackendError::Request("c".into())),
    ]));
    let monitor = SessionMonitor::spawn(backend.clone(), store.clone(), Duration::from_secs(60), retry());
    let mut errors = monitor.errors();

    errors.wait_for(Option::is_some).await.unwrap();
    assert_eq!(errors.borrow().as_deref(), Some(SESSION_UNVERIFIED_MESSAGE));
    assert_eq!(backend.refresh_calls(), 3);
    assert_eq!(store.take_session_error().as_deref(), Some(SESSION_UNVERIFIED_MESSAGE));
}

#[tokio::test(start_paused = true)]
async fn monitor_stays_quiet_after_logout() {
    let store = continuity();
    store.mark_logged_out();
    let backend = Arc::new(MockBackend::ok());
    let monitor = SessionMonitor::spawn(backend.clone(), store, Duration::from_secs(60), retry());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!monitor.is_running());
    assert_eq!(*monitor.errors().borrow(), None);
    assert_eq!(backend.refresh_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn stopped_monitor_issues_no_more_checks() {
    let backend = Arc::new(MockBackend::ok());
    let monitor = SessionMonitor::spawn(backend.clone(), continuity(), Duration::from_secs(60), retry());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.refresh_calls(), 1);

    monitor.stop();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(backend.refresh_calls(), 1);
    assert!(!monitor.is_running());
}

// =============================================================================
// logout
// =============================================================================

#[tokio::test]
async fn logout_marks_guard_and_navigates_even_when_backend_fails() {
    let store = continuity();
    let backend = MockBackend::default();
    *backend.logout_result.lock().unwrap() = Some(BackendError::Status { status: 500 });
    let navigator = RecordingNavigator::at("/dashboard");

    logout(&backend, &store, &navigator, "/login").await;

    assert_eq!(backend.logout_calls.load(Ordering::SeqCst), 1);
    assert_eq!(navigator.navigations(), vec!["/login".to_owned()]);
    assert!(store.consume_logged_out_guard());
}
