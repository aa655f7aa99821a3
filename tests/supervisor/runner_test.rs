//! Integration tests for the process supervisor.

use std::time::Duration;

use serde_json::json;
use visitor_flow::supervisor::{
    ExitReport, StopOutcome, SupervisorError, CONNECTED_NOTICE, RECOGNITION_STARTED_NOTICE,
    STOPPED_NOTICE,
};
use visitor_flow::worker::{SpawnError, StatusUpdate, SupervisorEvent};

use crate::support::{collect_until, next_event, settings, supervisor, IDLE_UNTIL_TERM};

fn is_primary_exit(event: &SupervisorEvent) -> bool {
    matches!(event, SupervisorEvent::ProcessStatus(StatusUpdate::Exit { .. }))
}

fn is_recognition_end(event: &SupervisorEvent) -> bool {
    matches!(
        event,
        SupervisorEvent::RecognitionStatus(StatusUpdate::Success { .. } | StatusUpdate::Error { .. })
    )
}

fn position(events: &[SupervisorEvent], wanted: &SupervisorEvent) -> usize {
    events
        .iter()
        .position(|event| event == wanted)
        .unwrap_or_else(|| panic!("missing {wanted:?} in {events:?}"))
}

#[tokio::test]
async fn second_start_fails_with_already_running() {
    let (supervisor, _events) = supervisor(settings(IDLE_UNTIL_TERM, "exit 0"));

    let started = supervisor.start_primary().await.expect("first start");
    let err = supervisor
        .start_primary()
        .await
        .expect_err("second start must fail");

    assert!(matches!(err, SupervisorError::AlreadyRunning));
    assert!(supervisor.is_running().await);
    assert_eq!(supervisor.primary_pid().await, started.pid);

    supervisor.shutdown().await;
    assert!(!supervisor.is_running().await);
}

#[tokio::test]
async fn stop_when_idle_is_a_no_op() {
    let (supervisor, mut events) = supervisor(settings(IDLE_UNTIL_TERM, "echo recognized"));

    let outcome = supervisor.stop_primary().await.expect("stop succeeds");
    assert_eq!(outcome, StopOutcome::NotRunning);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(events.try_recv().is_err(), "recognition must not start");
}

#[tokio::test]
async fn stop_chains_recognition_once_after_exit() {
    let (supervisor, mut events) = supervisor(settings(
        IDLE_UNTIL_TERM,
        "echo 'matched 3 faces'; exit 0",
    ));

    supervisor.start_primary().await.expect("start");
    let outcome = supervisor.stop_primary().await.expect("stop");
    assert_eq!(outcome, StopOutcome::Stopped(ExitReport { code: Some(0) }));
    assert!(!supervisor.is_running().await);

    let seen = collect_until(&mut events, is_recognition_end).await;

    let exit = position(
        &seen,
        &SupervisorEvent::ProcessStatus(StatusUpdate::Exit { code: Some(0) }),
    );
    let stopped = position(
        &seen,
        &SupervisorEvent::ProcessStatus(StatusUpdate::info(STOPPED_NOTICE)),
    );
    let recognition_started = position(
        &seen,
        &SupervisorEvent::RecognitionStatus(StatusUpdate::info(RECOGNITION_STARTED_NOTICE)),
    );
    assert!(exit < stopped);
    assert!(stopped < recognition_started);

    let starts = seen
        .iter()
        .filter(|event| {
            **event
                == SupervisorEvent::RecognitionStatus(StatusUpdate::info(
                    RECOGNITION_STARTED_NOTICE,
                ))
        })
        .count();
    assert_eq!(starts, 1);

    assert!(seen.contains(&SupervisorEvent::RecognitionStatus(StatusUpdate::info(
        "matched 3 faces"
    ))));
    assert!(matches!(
        seen.last(),
        Some(SupervisorEvent::RecognitionStatus(StatusUpdate::Success { .. }))
    ));
}

#[tokio::test]
async fn second_stop_while_stopping_is_rejected() {
    let slow_exit = "trap 'sleep 0.5; exit 0' TERM; while :; do sleep 0.05; done";
    let (supervisor, _events) = supervisor(settings(slow_exit, "exit 0"));
    supervisor.start_primary().await.expect("start");

    let first = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.stop_primary().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = supervisor
        .stop_primary()
        .await
        .expect_err("stop already pending");
    assert!(matches!(err, SupervisorError::AlreadyStopping));

    let outcome = first.await.expect("join").expect("first stop");
    assert!(matches!(outcome, StopOutcome::Stopped(_)));
}

#[tokio::test]
async fn stdout_lines_are_classified_in_order() {
    let script = r#"
        echo '{"type":"frame","data":"X"}'
        echo 'Opening camera'
        echo '{"type":"info","data":"Successfully connected to camera"}'
        echo ''
        printf 'no newline'
    "#;
    let (supervisor, mut events) = supervisor(settings(script, "exit 0"));
    supervisor.start_primary().await.expect("start");

    let seen = collect_until(&mut events, is_primary_exit).await;
    let stdout: Vec<_> = seen
        .into_iter()
        .filter(|event| !matches!(event, SupervisorEvent::ProcessStatus(StatusUpdate::Stderr { .. })))
        .collect();

    assert_eq!(
        stdout,
        vec![
            SupervisorEvent::StreamData(json!("X")),
            SupervisorEvent::ProcessStatus(StatusUpdate::info("Opening camera")),
            SupervisorEvent::ProcessStatus(StatusUpdate::success(CONNECTED_NOTICE)),
            SupervisorEvent::ProcessStatus(StatusUpdate::Data {
                data: json!({"type": "info", "data": "Successfully connected to camera"})
            }),
            SupervisorEvent::ProcessStatus(StatusUpdate::Exit { code: Some(0) }),
        ]
    );
}

#[tokio::test]
async fn connected_notice_is_emitted_once() {
    let script = r#"
        echo 'Successfully connected'
        echo 'Successfully connected'
    "#;
    let (supervisor, mut events) = supervisor(settings(script, "exit 0"));
    supervisor.start_primary().await.expect("start");

    let seen = collect_until(&mut events, is_primary_exit).await;
    let notices = seen
        .iter()
        .filter(|event| {
            **event == SupervisorEvent::ProcessStatus(StatusUpdate::success(CONNECTED_NOTICE))
        })
        .count();
    assert_eq!(notices, 1);
}

#[tokio::test]
async fn stderr_goes_to_process_status() {
    let (supervisor, mut events) = supervisor(settings("echo 'camera busy' >&2; exit 0", "exit 0"));
    supervisor.start_primary().await.expect("start");

    let seen = collect_until(&mut events, is_primary_exit).await;
    let stderr: String = seen
        .iter()
        .filter_map(|event| match event {
            SupervisorEvent::ProcessStatus(StatusUpdate::Stderr { data }) => Some(data.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stderr, "camera busy\n");
}

#[tokio::test]
async fn abnormal_exit_frees_the_slot() {
    let (supervisor, mut events) = supervisor(settings("exit 3", "exit 0"));
    supervisor.start_primary().await.expect("start");

    let event = next_event(&mut events).await;
    assert_eq!(
        event,
        SupervisorEvent::ProcessStatus(StatusUpdate::Exit { code: Some(3) })
    );
    assert!(!supervisor.is_running().await);

    // A new session can start once the exit is reported
    supervisor.start_primary().await.expect("restart");
    let event = next_event(&mut events).await;
    assert_eq!(
        event,
        SupervisorEvent::ProcessStatus(StatusUpdate::Exit { code: Some(3) })
    );
}

#[tokio::test]
async fn spawn_failure_leaves_slot_empty() {
    let mut settings = settings(IDLE_UNTIL_TERM, "exit 0");
    settings.primary = visitor_flow::worker::WorkerCommand::new("/nonexistent/visitor-worker");
    let (supervisor, _events) = supervisor(settings);

    let err = supervisor.start_primary().await.expect_err("spawn fails");
    assert!(matches!(
        err,
        SupervisorError::Spawn(SpawnError::NotFound(_))
    ));
    assert!(!supervisor.is_running().await);
}

#[tokio::test]
async fn recognition_failure_reports_code() {
    let (supervisor, mut events) = supervisor(settings(IDLE_UNTIL_TERM, "exit 4"));
    supervisor.start_primary().await.expect("start");
    supervisor.stop_primary().await.expect("stop");

    let seen = collect_until(&mut events, is_recognition_end).await;
    assert_eq!(
        seen.last(),
        Some(&SupervisorEvent::RecognitionStatus(StatusUpdate::error(
            "Recognition failed with code 4"
        )))
    );
}

#[tokio::test]
async fn recognition_spawn_failure_is_reported() {
    let mut settings = settings(IDLE_UNTIL_TERM, "exit 0");
    settings.secondary = visitor_flow::worker::WorkerCommand::new("/nonexistent/recognizer");
    let (supervisor, mut events) = supervisor(settings);

    supervisor.start_primary().await.expect("start");
    supervisor.stop_primary().await.expect("stop");

    let seen = collect_until(&mut events, is_recognition_end).await;
    match seen.last() {
        Some(SupervisorEvent::RecognitionStatus(StatusUpdate::Error { data })) => {
            assert!(data.starts_with("Failed to start recognition"), "{data}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_kills_a_worker_ignoring_sigterm() {
    let stubborn = "trap '' TERM; while :; do sleep 0.05; done";
    let (supervisor, mut events) = supervisor(settings(stubborn, "exit 0"));
    supervisor.start_primary().await.expect("start");

    supervisor.shutdown().await;
    assert!(!supervisor.is_running().await);

    let seen = collect_until(&mut events, is_primary_exit).await;
    assert_eq!(
        seen.last(),
        Some(&SupervisorEvent::ProcessStatus(StatusUpdate::Exit { code: None }))
    );
}
