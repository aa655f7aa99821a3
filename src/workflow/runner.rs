//! Workflow driver: turns user commands and supervisor events into phase
//! transitions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::metrics::{today, MetricsClient};
use crate::supervisor::{StopOutcome, Supervisor, SupervisorError};
use crate::worker::{StatusUpdate, SupervisorEvent};
use crate::workflow::{PhaseMachine, WorkflowError, WorkflowPhase};

/// Default delay before controls come back after a completed run.
pub const DEFAULT_REENABLE_DELAY: Duration = Duration::from_millis(2000);

/// Workflow timing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub reenable_delay: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            reenable_delay: DEFAULT_REENABLE_DELAY,
        }
    }
}

/// User commands accepted by [`Workflow::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowCommand {
    Start,
    Stop,
    Shutdown,
}

/// Snapshot of the workflow for projections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowStatus {
    pub phase: WorkflowPhase,
    /// Step to highlight; keeps the failed step while in Error.
    pub step: u8,
    pub controls_enabled: bool,
    pub frames: u64,
    pub fps: Option<u32>,
    pub visitor_count: Option<u64>,
    pub last_error: Option<String>,
    pub capture_started: Option<Instant>,
    pub capture_ended: Option<Instant>,
}

impl WorkflowStatus {
    /// Capture runtime as of `now`.
    #[must_use]
    pub fn runtime_at(&self, now: Instant) -> Duration {
        match self.capture_started {
            Some(started) => self
                .capture_ended
                .unwrap_or(now)
                .saturating_duration_since(started),
            None => Duration::ZERO,
        }
    }

    /// Capture runtime as of `now`, formatted `HH:MM:SS`.
    #[must_use]
    pub fn runtime_hms(&self, now: Instant) -> String {
        format_runtime(self.runtime_at(now))
    }
}

/// Format a duration as `HH:MM:SS`.
#[must_use]
pub fn format_runtime(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Frames per second implied by the gap between two frames.
fn fps_from_gap(gap: Duration) -> Option<u32> {
    let millis = gap.as_millis();
    if millis == 0 {
        return None;
    }
    u32::try_from((1000 + millis / 2) / millis).ok()
}

/// The three-phase visitor-counting workflow.
///
/// Single writer of the phase; projections observe it through
/// [`Workflow::subscribe`].
pub struct Workflow {
    supervisor: Arc<Supervisor>,
    metrics: Arc<dyn MetricsClient>,
    settings: WorkflowSettings,
    machine: PhaseMachine,
    controls_enabled: bool,
    capture_started: Option<Instant>,
    capture_ended: Option<Instant>,
    frames: u64,
    last_frame_at: Option<Instant>,
    fps: Option<u32>,
    visitor_count: Option<u64>,
    last_error: Option<String>,
    reenable_at: Option<Instant>,
    status_tx: watch::Sender<WorkflowStatus>,
}

impl Workflow {
    #[must_use]
    pub fn new(
        supervisor: Arc<Supervisor>,
        metrics: Arc<dyn MetricsClient>,
        settings: WorkflowSettings,
    ) -> Self {
        let (status_tx, _) = watch::channel(WorkflowStatus {
            controls_enabled: true,
            ..WorkflowStatus::default()
        });
        Self {
            supervisor,
            metrics,
            settings,
            machine: PhaseMachine::new(),
            controls_enabled: true,
            capture_started: None,
            capture_ended: None,
            frames: 0,
            last_frame_at: None,
            fps: None,
            visitor_count: None,
            last_error: None,
            reenable_at: None,
            status_tx,
        }
    }

    /// Watch status snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WorkflowStatus> {
        self.status_tx.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> WorkflowPhase {
        self.machine.phase()
    }

    #[must_use]
    pub fn controls_enabled(&self) -> bool {
        self.controls_enabled
    }

    #[must_use]
    pub fn visitor_count(&self) -> Option<u64> {
        self.visitor_count
    }

    #[must_use]
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Current snapshot.
    #[must_use]
    pub fn status(&self) -> WorkflowStatus {
        WorkflowStatus {
            phase: self.machine.phase(),
            step: self.machine.last_step(),
            controls_enabled: self.controls_enabled,
            frames: self.frames,
            fps: self.fps,
            visitor_count: self.visitor_count,
            last_error: self.last_error.clone(),
            capture_started: self.capture_started,
            capture_ended: self.capture_ended,
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }

    /// User start: reset and begin capturing.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::ControlsDisabled` while controls are off,
    /// `WorkflowError::InvalidTransition` while a run is in progress, and
    /// `WorkflowError::Supervisor` if a capture process is still alive or
    /// cannot be spawned. Only a spawn failure changes the phase (to Error).
    pub async fn start(&mut self) -> Result<(), WorkflowError> {
        let phase = self.machine.phase();
        if !self.controls_enabled {
            return Err(WorkflowError::ControlsDisabled(phase));
        }
        if !phase.accepts_start() {
            return Err(WorkflowError::InvalidTransition {
                from: phase,
                to: WorkflowPhase::Capturing,
            });
        }
        if self.supervisor.is_running().await {
            tracing::warn!(%phase, "Start rejected, capture process still running");
            return Err(SupervisorError::AlreadyRunning.into());
        }

        self.reset();
        self.machine.transition(WorkflowPhase::Capturing)?;

        match self.supervisor.start_primary().await {
            Ok(started) => {
                tracing::info!(session = %started.session, pid = ?started.pid, "Capture started");
                self.capture_started = Some(Instant::now());
                self.publish();
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e.into())
            }
        }
    }

    /// User stop: end capture and chain recognition.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::ControlsDisabled` or
    /// `WorkflowError::InvalidTransition` outside Capturing, and
    /// `WorkflowError::Supervisor` if the supervisor fails to stop the
    /// process (the workflow is then in Error).
    pub async fn stop(&mut self) -> Result<(), WorkflowError> {
        let phase = self.machine.phase();
        if phase != WorkflowPhase::Capturing {
            if !self.controls_enabled {
                return Err(WorkflowError::ControlsDisabled(phase));
            }
            return Err(WorkflowError::InvalidTransition {
                from: phase,
                to: WorkflowPhase::Recognizing,
            });
        }

        self.machine.transition(WorkflowPhase::Recognizing)?;
        self.controls_enabled = false;
        self.capture_ended = Some(Instant::now());
        self.publish();

        match self.supervisor.stop_primary().await {
            Ok(StopOutcome::Stopped(report)) => {
                tracing::info!(code = ?report.code, "Capture stopped, recognition chained");
                Ok(())
            }
            Ok(StopOutcome::NotRunning) => {
                self.fail("Capture process was not running".to_string());
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Apply one supervisor event.
    pub async fn handle_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::StreamData(_) => {
                if self.machine.phase() == WorkflowPhase::Capturing {
                    self.record_frame(Instant::now());
                }
            }
            SupervisorEvent::ProcessStatus(update) => self.handle_process_status(&update),
            SupervisorEvent::RecognitionStatus(update) => {
                self.handle_recognition_status(&update).await;
            }
        }
        self.publish();
    }

    fn record_frame(&mut self, now: Instant) {
        if let Some(last) = self.last_frame_at {
            if let Some(fps) = fps_from_gap(now.saturating_duration_since(last)) {
                self.fps = Some(fps);
            }
        }
        self.last_frame_at = Some(now);
        self.frames = self.frames.saturating_add(1);
    }

    fn handle_process_status(&mut self, update: &StatusUpdate) {
        if self.machine.phase() != WorkflowPhase::Capturing {
            return;
        }
        // Other capture statuses are advisory
        if let StatusUpdate::Exit { code } = update {
            if *code != Some(0) {
                self.fail(format!("Capture process exited with code {}", describe_code(*code)));
            }
        }
    }

    async fn handle_recognition_status(&mut self, update: &StatusUpdate) {
        if self.machine.phase() != WorkflowPhase::Recognizing {
            return;
        }
        match update {
            StatusUpdate::Success { .. } => self.report().await,
            StatusUpdate::Error { data } => self.fail(data.clone()),
            StatusUpdate::Exit { code } if *code != Some(0) => {
                self.fail(format!("Recognition exited with code {}", describe_code(*code)));
            }
            _ => {}
        }
    }

    /// Reporting phase: fetch today's count.
    async fn report(&mut self) {
        if let Err(e) = self.machine.transition(WorkflowPhase::Reporting) {
            tracing::warn!(error = %e, "Cannot enter reporting");
            return;
        }
        self.publish();

        let date = today();
        match self.metrics.fetch_metrics(date).await {
            Ok(metrics) => {
                self.visitor_count = Some(metrics.unique_visitors);
                if let Err(e) = self.machine.transition(WorkflowPhase::Completed) {
                    tracing::warn!(error = %e, "Cannot complete workflow");
                    return;
                }
                tracing::info!(
                    unique_visitors = metrics.unique_visitors,
                    %date,
                    "Workflow completed"
                );
                if self.settings.reenable_delay.is_zero() {
                    self.controls_enabled = true;
                } else {
                    self.reenable_at = Some(Instant::now() + self.settings.reenable_delay);
                }
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    /// Enter Error: stop the runtime counter and give controls back.
    fn fail(&mut self, reason: String) {
        let from = self.machine.phase();
        if self.machine.transition(WorkflowPhase::Error).is_err() {
            return;
        }
        tracing::error!(%from, %reason, "Workflow failed");
        if self.capture_started.is_some() && self.capture_ended.is_none() {
            self.capture_ended = Some(Instant::now());
        }
        self.last_error = Some(reason);
        self.controls_enabled = true;
        self.reenable_at = None;
        self.publish();
    }

    /// Re-enable controls once the post-completion delay has passed.
    ///
    /// Returns `true` if controls were re-enabled by this call.
    pub fn poll_controls(&mut self, now: Instant) -> bool {
        match self.reenable_at {
            Some(at) if at <= now => {
                self.reenable_at = None;
                self.controls_enabled = true;
                tracing::debug!("Controls re-enabled");
                self.publish();
                true
            }
            _ => false,
        }
    }

    /// When controls are due to come back, if pending.
    #[must_use]
    pub fn reenable_at(&self) -> Option<Instant> {
        self.reenable_at
    }

    fn reset(&mut self) {
        self.machine.reset();
        self.controls_enabled = true;
        self.capture_started = None;
        self.capture_ended = None;
        self.frames = 0;
        self.last_frame_at = None;
        self.fps = None;
        self.visitor_count = None;
        self.last_error = None;
        self.reenable_at = None;
    }

    /// Drive the workflow until `Shutdown` or the command channel closes,
    /// then force-kill any capture process.
    ///
    /// A pending stop or metrics fetch is abandoned when `Shutdown` arrives,
    /// so recognition is never started during teardown.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
        mut commands: mpsc::Receiver<WorkflowCommand>,
    ) {
        self.publish();

        loop {
            let reenable_at = self.reenable_at;
            let shutdown = tokio::select! {
                Some(event) = events.recv() => tokio::select! {
                    biased;
                    () = self.handle_event(event) => false,
                    () = shutdown_requested(&mut commands) => true,
                },
                command = commands.recv() => match command {
                    Some(WorkflowCommand::Start) => {
                        let result = self.start().await;
                        self.log_rejection(result);
                        false
                    }
                    Some(WorkflowCommand::Stop) => tokio::select! {
                        biased;
                        result = self.stop() => {
                            self.log_rejection(result);
                            false
                        }
                        () = shutdown_requested(&mut commands) => true,
                    },
                    Some(WorkflowCommand::Shutdown) | None => true,
                },
                () = tokio::time::sleep_until(reenable_at.unwrap_or_else(Instant::now)),
                    if reenable_at.is_some() =>
                {
                    self.poll_controls(Instant::now());
                    false
                }
            };
            if shutdown {
                break;
            }
        }

        tracing::info!(phase = %self.phase(), "Workflow shutting down");
        self.supervisor.shutdown().await;
    }

    fn log_rejection(&self, result: Result<(), WorkflowError>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, phase = %self.phase(), "Command rejected");
        }
    }
}

/// Resolve once `Shutdown` arrives or the command channel closes. Other
/// commands are dropped while a stop or report is in flight.
async fn shutdown_requested(commands: &mut mpsc::Receiver<WorkflowCommand>) {
    while let Some(command) = commands.recv().await {
        if command == WorkflowCommand::Shutdown {
            return;
        }
        tracing::warn!(?command, "Command rejected, workflow busy");
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("phase", &self.machine.phase())
            .field("controls_enabled", &self.controls_enabled)
            .finish_non_exhaustive()
    }
}

fn describe_code(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |code| code.to_string())
}
