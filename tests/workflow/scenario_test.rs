//! End-to-end runs of the workflow against real worker processes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use visitor_flow::supervisor::Supervisor;
use visitor_flow::worker::SupervisorEvent;
use visitor_flow::workflow::{Workflow, WorkflowPhase, WorkflowSettings};

use super::FixedMetrics;
use crate::support::{next_event, settings, supervisor};

const CAPTURE: &str = r#"
    trap 'exit 0' TERM
    echo '{"type":"info","data":"Successfully connected. Frame size: (720, 1280, 3)"}'
    for i in 1 2 3; do echo "{\"type\":\"frame\",\"data\":\"f$i\"}"; done
    while :; do sleep 0.05; done
"#;

const RECOGNIZE: &str = "echo 'Processing 3 images'; echo 'Stored 7 visitors'; exit 0";

fn workflow(
    supervisor: Arc<Supervisor>,
    metrics: Arc<FixedMetrics>,
    reenable_delay: Duration,
) -> Workflow {
    Workflow::new(supervisor, metrics, WorkflowSettings { reenable_delay })
}

async fn pump_until<F>(
    workflow: &mut Workflow,
    events: &mut mpsc::UnboundedReceiver<SupervisorEvent>,
    done: F,
) where
    F: Fn(&Workflow) -> bool,
{
    while !done(workflow) {
        let event = next_event(events).await;
        workflow.handle_event(event).await;
    }
}

fn is_settled(workflow: &Workflow) -> bool {
    matches!(
        workflow.phase(),
        WorkflowPhase::Completed | WorkflowPhase::Error
    )
}

#[tokio::test]
async fn full_run_reaches_completed_with_count() {
    let (supervisor, mut events) = supervisor(settings(CAPTURE, RECOGNIZE));
    let metrics = Arc::new(FixedMetrics::count(7));
    let mut workflow = workflow(supervisor, metrics.clone(), Duration::from_millis(100));
    let mut status_rx = workflow.subscribe();

    workflow.start().await.expect("start");
    assert_eq!(workflow.phase(), WorkflowPhase::Capturing);
    assert!(workflow.controls_enabled());

    pump_until(&mut workflow, &mut events, |w| w.status().frames == 3).await;

    workflow.stop().await.expect("stop");
    assert_eq!(workflow.phase(), WorkflowPhase::Recognizing);
    assert!(!workflow.controls_enabled());

    pump_until(&mut workflow, &mut events, is_settled).await;

    assert_eq!(workflow.phase(), WorkflowPhase::Completed);
    assert_eq!(workflow.visitor_count(), Some(7));
    assert_eq!(metrics.calls(), 1);
    assert!(!workflow.controls_enabled());

    let status = status_rx.borrow_and_update().clone();
    assert_eq!(status.phase, WorkflowPhase::Completed);
    assert_eq!(status.step, 3);
    assert_eq!(status.frames, 3);
    assert!(status.capture_ended.is_some());

    let reenable_at = workflow.reenable_at().expect("re-enable pending");
    assert!(!workflow.poll_controls(reenable_at - Duration::from_millis(1)));
    assert!(workflow.poll_controls(Instant::now() + Duration::from_millis(100)));
    assert!(workflow.controls_enabled());
}

#[tokio::test]
async fn abnormal_capture_exit_moves_to_error() {
    let (supervisor, mut events) =
        supervisor(settings("echo 'Failed to setup stream' >&2; exit 2", RECOGNIZE));
    let mut workflow = workflow(supervisor, Arc::new(FixedMetrics::count(7)), Duration::ZERO);

    workflow.start().await.expect("start");
    pump_until(&mut workflow, &mut events, is_settled).await;

    let status = workflow.status();
    assert_eq!(status.phase, WorkflowPhase::Error);
    assert_eq!(status.step, 1);
    assert!(status.controls_enabled);
    assert_eq!(
        status.last_error.as_deref(),
        Some("Capture process exited with code 2")
    );
    assert!(status.capture_ended.is_some());
}

#[tokio::test]
async fn recognition_failure_moves_to_error() {
    let (supervisor, mut events) = supervisor(settings(CAPTURE, "exit 5"));
    let metrics = Arc::new(FixedMetrics::count(7));
    let mut workflow = workflow(supervisor, metrics.clone(), Duration::ZERO);

    workflow.start().await.expect("start");
    workflow.stop().await.expect("stop");
    pump_until(&mut workflow, &mut events, is_settled).await;

    let status = workflow.status();
    assert_eq!(status.phase, WorkflowPhase::Error);
    assert_eq!(status.step, 2);
    assert_eq!(
        status.last_error.as_deref(),
        Some("Recognition failed with code 5")
    );
    assert_eq!(metrics.calls(), 0);
}

#[tokio::test]
async fn metrics_failure_moves_to_error() {
    let (supervisor, mut events) = supervisor(settings(CAPTURE, RECOGNIZE));
    let mut workflow = workflow(supervisor, Arc::new(FixedMetrics::failing()), Duration::ZERO);

    workflow.start().await.expect("start");
    workflow.stop().await.expect("stop");
    pump_until(&mut workflow, &mut events, is_settled).await;

    let status = workflow.status();
    assert_eq!(status.phase, WorkflowPhase::Error);
    assert_eq!(status.step, 3);
    assert!(status.controls_enabled);
    assert!(status.visitor_count.is_none());
}

#[tokio::test]
async fn restart_after_completion_resets_counters() {
    let (supervisor, mut events) = supervisor(settings(CAPTURE, RECOGNIZE));
    let mut workflow = workflow(supervisor, Arc::new(FixedMetrics::count(7)), Duration::ZERO);

    workflow.start().await.expect("start");
    pump_until(&mut workflow, &mut events, |w| w.status().frames == 3).await;
    workflow.stop().await.expect("stop");
    pump_until(&mut workflow, &mut events, is_settled).await;
    assert_eq!(workflow.phase(), WorkflowPhase::Completed);
    assert!(workflow.controls_enabled());

    workflow.start().await.expect("restart");
    let status = workflow.status();
    assert_eq!(status.phase, WorkflowPhase::Capturing);
    assert_eq!(status.frames, 0);
    assert_eq!(status.visitor_count, None);
    assert_eq!(status.last_error, None);

    workflow.supervisor().shutdown().await;
}
