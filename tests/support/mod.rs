//! Shared helpers for the integration tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use visitor_flow::supervisor::{EventBus, Supervisor, SupervisorSettings, WatchdogConfig};
use visitor_flow::worker::{SupervisorEvent, WorkerCommand};

/// Upper bound for waiting on any single worker event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capture worker that idles until SIGTERM, then exits cleanly.
pub const IDLE_UNTIL_TERM: &str = "trap 'exit 0' TERM; while :; do sleep 0.05; done";

/// A worker running `script` under `sh -c`.
pub fn sh(script: &str) -> WorkerCommand {
    WorkerCommand::new("sh").arg("-c").arg(script)
}

pub fn settings(primary: &str, secondary: &str) -> SupervisorSettings {
    SupervisorSettings {
        primary: sh(primary),
        secondary: sh(secondary),
        watchdog: WatchdogConfig::default(),
        connected_marker: "Successfully connected".to_string(),
    }
}

/// A supervisor wired to a fresh bus, plus the bus's workflow queue.
pub fn supervisor(
    settings: SupervisorSettings,
) -> (Arc<Supervisor>, mpsc::UnboundedReceiver<SupervisorEvent>) {
    let (bus, events) = EventBus::new(64);
    (Arc::new(Supervisor::new(settings, Arc::new(bus))), events)
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<SupervisorEvent>) -> SupervisorEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("Timed out waiting for event")
        .expect("Event channel closed")
}

/// Collect events up to and including the first one matching `done`.
pub async fn collect_until<F>(
    events: &mut mpsc::UnboundedReceiver<SupervisorEvent>,
    done: F,
) -> Vec<SupervisorEvent>
where
    F: Fn(&SupervisorEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}
