//! Supervisor module tests.

mod runner_test;

/// Verify all public supervisor types are exported from the library.
#[test]
fn test_all_supervisor_types_exported() {
    use visitor_flow::supervisor::{
        Advisory, EventBus, ExitReport, StopOutcome, SupervisorError, WatchdogConfig,
        WatchdogState, CONNECTED_NOTICE, DEFAULT_EVENT_CHANNEL_CAPACITY,
    };

    let _ = EventBus::new(DEFAULT_EVENT_CHANNEL_CAPACITY);
    let _ = WatchdogState::new(tokio::time::Instant::now());
    assert_eq!(WatchdogConfig::default().connect_timeout.as_secs(), 10);
    assert_eq!(StopOutcome::NotRunning, StopOutcome::NotRunning);
    assert!(ExitReport { code: Some(0) }.success());
    assert!(!SupervisorError::AlreadyRunning.to_string().is_empty());
    assert!(!CONNECTED_NOTICE.is_empty());
    let _ = Advisory::StreamInterrupted.to_status();
}
