//! Supervisor for the capture and recognition workers.
//!
//! This module owns the single primary (capture) process slot, wires the
//! worker's output through the framer and classifier into an [`EventSink`],
//! and chains the secondary (recognition) worker after a requested stop.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::supervisor::{EventSink, Watchdog, WatchdogConfig};
use crate::worker::{
    classify, is_connected_line, ClassifiedEvent, LineFramer, SpawnError, StatusUpdate,
    SupervisorEvent, WorkerCommand, WorkerProcess,
};

/// Default marker the capture worker prints once its video source is open.
pub const DEFAULT_CONNECTED_MARKER: &str = "Successfully connected";

/// Size of the buffer used to read worker output.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Published as `success` the first time the connected marker is seen.
pub const CONNECTED_NOTICE: &str = "Camera connection established successfully.";

/// Published as `info` after a requested stop, before recognition starts.
pub const STOPPED_NOTICE: &str = "Camera stream stopped. Starting recognition...";

/// Published on `recognition-status` when the recognition worker starts.
pub const RECOGNITION_STARTED_NOTICE: &str = "Starting recognition...";

pub const RECOGNITION_DONE_NOTICE: &str = "Recognition completed successfully";

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// A primary process is already running.
    #[error("Capture process already running")]
    AlreadyRunning,
    /// A stop is already waiting for the primary to exit.
    #[error("Capture process is already stopping")]
    AlreadyStopping,
    /// The worker could not be launched.
    #[error("Failed to start capture process: {0}")]
    Spawn(#[from] SpawnError),
    /// Process stdout was not available.
    #[error("Process stdout not available")]
    NoStdout,
    /// The exit monitor went away without reporting an exit.
    #[error("Process monitor closed unexpectedly")]
    ChannelClosed,
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl ExitReport {
    /// Whether the process exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Returned by a successful [`Supervisor::start_primary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    /// Identifier of this capture session.
    pub session: Uuid,
    /// OS process id of the capture worker.
    pub pid: Option<u32>,
}

/// Returned by [`Supervisor::stop_primary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running; recognition was not started.
    NotRunning,
    /// The primary exited and recognition was launched.
    Stopped(ExitReport),
}

/// Commands delivered to a primary's exit monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    /// Graceful termination request.
    Terminate,
    /// Forced kill, used on teardown.
    Kill,
}

/// The single live primary process.
#[derive(Debug)]
struct PrimaryHandle {
    session: Uuid,
    pid: Option<u32>,
    control_tx: mpsc::UnboundedSender<ControlSignal>,
    exit_rx: watch::Receiver<Option<ExitReport>>,
    stop_requested: bool,
}

/// Worker commands and timer settings.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub primary: WorkerCommand,
    pub secondary: WorkerCommand,
    pub watchdog: WatchdogConfig,
    pub connected_marker: String,
}

type PrimarySlot = Arc<Mutex<Option<PrimaryHandle>>>;

/// Owns the primary process slot and launches the recognition worker.
///
/// Each instance is independent; tests construct one per case.
pub struct Supervisor {
    settings: SupervisorSettings,
    sink: Arc<dyn EventSink>,
    slot: PrimarySlot,
}

impl Supervisor {
    /// Create a supervisor publishing into `sink`.
    #[must_use]
    pub fn new(settings: SupervisorSettings, sink: Arc<dyn EventSink>) -> Self {
        Self {
            settings,
            sink,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Get the settings this supervisor was built with.
    #[must_use]
    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Whether a primary process currently occupies the slot.
    pub async fn is_running(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Process id of the running primary, if any.
    pub async fn primary_pid(&self) -> Option<u32> {
        self.slot.lock().await.as_ref().and_then(|handle| handle.pid)
    }

    /// Spawn the capture worker.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyRunning` if a primary is alive, or
    /// `SupervisorError::Spawn` if the worker cannot be launched. The slot
    /// stays empty on failure.
    pub async fn start_primary(&self) -> Result<Started, SupervisorError> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            tracing::warn!("Capture process already running");
            return Err(SupervisorError::AlreadyRunning);
        }

        let mut process = WorkerProcess::spawn(&self.settings.primary).map_err(|e| {
            tracing::error!(error = %e, "Failed to spawn capture process");
            SupervisorError::Spawn(e)
        })?;
        let stdout = process.take_stdout().ok_or(SupervisorError::NoStdout)?;
        let stderr = process.take_stderr();

        let session = Uuid::new_v4();
        let pid = process.id();
        let watchdog = Arc::new(Watchdog::arm(
            self.settings.watchdog,
            Arc::clone(&self.sink),
        ));

        let stdout_task = tokio::spawn(pump_primary_stdout(
            stdout,
            Arc::clone(&watchdog),
            Arc::clone(&self.sink),
            self.settings.connected_marker.clone(),
        ));
        let stderr_task = stderr.map(|stderr| {
            tokio::spawn(pump_stderr(stderr, Arc::clone(&self.sink), |text| {
                SupervisorEvent::ProcessStatus(StatusUpdate::stderr(text))
            }))
        });

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(monitor_primary(PrimaryMonitor {
            process,
            control_rx,
            readers: [Some(stdout_task), stderr_task],
            watchdog,
            slot: Arc::clone(&self.slot),
            session,
            exit_tx,
            sink: Arc::clone(&self.sink),
        }));

        *slot = Some(PrimaryHandle {
            session,
            pid,
            control_tx,
            exit_rx,
            stop_requested: false,
        });

        tracing::info!(%session, ?pid, "Capture process started");
        Ok(Started { session, pid })
    }

    /// Stop the capture worker and chain the recognition worker.
    ///
    /// Sends a graceful termination request and waits for the exit
    /// notification; the process is never force-killed here. Once it has
    /// exited the recognition worker is launched exactly once.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyStopping` if another stop is pending,
    /// or `SupervisorError::ChannelClosed` if the exit monitor vanished.
    pub async fn stop_primary(&self) -> Result<StopOutcome, SupervisorError> {
        let (control_tx, mut exit_rx) = {
            let mut slot = self.slot.lock().await;
            let Some(handle) = slot.as_mut() else {
                tracing::debug!("No capture process to stop");
                return Ok(StopOutcome::NotRunning);
            };
            if handle.stop_requested {
                return Err(SupervisorError::AlreadyStopping);
            }
            handle.stop_requested = true;
            (handle.control_tx.clone(), handle.exit_rx.clone())
        };

        tracing::info!("Stopping capture process");
        if control_tx.send(ControlSignal::Terminate).is_err() {
            tracing::debug!("Capture process exited before the stop request");
        }

        let report = *exit_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        let report = report.unwrap_or_default();

        tracing::info!(code = ?report.code, "Capture process stopped");
        self.sink
            .emit(SupervisorEvent::ProcessStatus(StatusUpdate::info(STOPPED_NOTICE)));

        self.start_secondary();
        Ok(StopOutcome::Stopped(report))
    }

    /// Spawn the recognition worker.
    ///
    /// Its output goes to `recognition-status`; its exit is reported as
    /// `success` for code 0 and `error` otherwise. A spawn failure is also
    /// reported as `error`. Returns the worker's process id.
    pub fn start_secondary(&self) -> Option<u32> {
        tracing::info!("Starting recognition process");

        let mut process = match WorkerProcess::spawn(&self.settings.secondary) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start recognition process");
                self.sink.emit(SupervisorEvent::RecognitionStatus(StatusUpdate::error(
                    format!("Failed to start recognition: {e}"),
                )));
                return None;
            }
        };

        let pid = process.id();
        self.sink.emit(SupervisorEvent::RecognitionStatus(StatusUpdate::info(
            RECOGNITION_STARTED_NOTICE,
        )));

        let stdout_task = process
            .take_stdout()
            .map(|stdout| tokio::spawn(pump_secondary_stdout(stdout, Arc::clone(&self.sink))));
        let stderr_task = process.take_stderr().map(|stderr| {
            tokio::spawn(pump_stderr(stderr, Arc::clone(&self.sink), |text| {
                SupervisorEvent::RecognitionStatus(StatusUpdate::stderr(text))
            }))
        });

        tokio::spawn(monitor_secondary(
            process,
            [stdout_task, stderr_task],
            Arc::clone(&self.sink),
        ));

        pid
    }

    /// Force-kill a still-running primary and wait for its exit.
    ///
    /// Used on application teardown.
    pub async fn shutdown(&self) {
        let handle = {
            let slot = self.slot.lock().await;
            slot.as_ref()
                .map(|handle| (handle.control_tx.clone(), handle.exit_rx.clone()))
        };

        let Some((control_tx, mut exit_rx)) = handle else {
            return;
        };

        tracing::info!("Killing capture process on shutdown");
        let _ = control_tx.send(ControlSignal::Kill);
        let _ = exit_rx.wait_for(Option::is_some).await;
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Everything the primary's exit monitor owns.
struct PrimaryMonitor {
    process: WorkerProcess,
    control_rx: mpsc::UnboundedReceiver<ControlSignal>,
    readers: [Option<JoinHandle<()>>; 2],
    watchdog: Arc<Watchdog>,
    slot: PrimarySlot,
    session: Uuid,
    exit_tx: watch::Sender<Option<ExitReport>>,
    sink: Arc<dyn EventSink>,
}

async fn monitor_primary(monitor: PrimaryMonitor) {
    let PrimaryMonitor {
        mut process,
        mut control_rx,
        readers,
        watchdog,
        slot,
        session,
        exit_tx,
        sink,
    } = monitor;

    let report = wait_with_control(&mut process, &mut control_rx).await;

    // Output is fully drained before the exit is reported
    join_readers(readers).await;

    watchdog.cancel();
    {
        let mut slot = slot.lock().await;
        if slot.as_ref().is_some_and(|handle| handle.session == session) {
            *slot = None;
        }
    }

    tracing::info!(%session, code = ?report.code, "Capture process exited");
    sink.emit(SupervisorEvent::ProcessStatus(StatusUpdate::Exit {
        code: report.code,
    }));
    exit_tx.send_replace(Some(report));
}

/// Wait for the process to exit while applying control signals.
async fn wait_with_control(
    process: &mut WorkerProcess,
    control_rx: &mut mpsc::UnboundedReceiver<ControlSignal>,
) -> ExitReport {
    let mut control_open = true;

    loop {
        let signal = tokio::select! {
            status = process.wait() => {
                return match status {
                    Ok(status) => ExitReport { code: status.code() },
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to wait for capture process");
                        ExitReport { code: None }
                    }
                };
            }
            signal = control_rx.recv(), if control_open => signal,
        };

        let result = match signal {
            Some(ControlSignal::Terminate) => process.terminate(),
            Some(ControlSignal::Kill) => process.start_kill(),
            None => {
                control_open = false;
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, ?signal, "Failed to signal capture process");
        }
    }
}

async fn join_readers(readers: [Option<JoinHandle<()>>; 2]) {
    for reader in readers.into_iter().flatten() {
        if let Err(e) = reader.await {
            tracing::warn!(error = %e, "Output reader task failed");
        }
    }
}

async fn pump_primary_stdout<R>(
    mut stdout: R,
    watchdog: Arc<Watchdog>,
    sink: Arc<dyn EventSink>,
    connected_marker: String,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read capture stdout");
                break;
            }
        };

        watchdog.record_data().await;

        for line in framer.feed(&buf[..n]) {
            let Some(event) = classify(&line) else {
                continue;
            };

            if matches!(event, ClassifiedEvent::StatusUpdate(_))
                && is_connected_line(&line, &connected_marker)
                && watchdog.mark_connected().await
            {
                sink.emit(SupervisorEvent::ProcessStatus(StatusUpdate::success(
                    CONNECTED_NOTICE,
                )));
            }

            sink.emit(event.into());
        }
    }

    if !framer.fragment().is_empty() {
        tracing::debug!(
            bytes = framer.fragment().len(),
            "Discarding unterminated capture output"
        );
    }
}

async fn pump_secondary_stdout<R>(mut stdout: R, sink: Arc<dyn EventSink>)
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        for line in framer.feed(&buf[..n]) {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            tracing::debug!(line = %trimmed, "Recognition output");
            sink.emit(ClassifiedEvent::PlainText(trimmed.to_string()).into_recognition());
        }
    }
}

async fn pump_stderr<R, F>(mut stderr: R, sink: Arc<dyn EventSink>, wrap: F)
where
    R: AsyncRead + Unpin,
    F: Fn(String) -> SupervisorEvent,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
        tracing::debug!(stderr = %text.trim(), "Worker stderr");
        sink.emit(wrap(text));
    }
}

async fn monitor_secondary(
    mut process: WorkerProcess,
    readers: [Option<JoinHandle<()>>; 2],
    sink: Arc<dyn EventSink>,
) {
    let report = match process.wait().await {
        Ok(status) => ExitReport {
            code: status.code(),
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to wait for recognition process");
            ExitReport { code: None }
        }
    };

    join_readers(readers).await;

    tracing::info!(code = ?report.code, "Recognition process exited");
    let update = if report.success() {
        StatusUpdate::success(RECOGNITION_DONE_NOTICE)
    } else {
        let code = report
            .code
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        StatusUpdate::error(format!("Recognition failed with code {code}"))
    };
    sink.emit(SupervisorEvent::RecognitionStatus(update));
}
