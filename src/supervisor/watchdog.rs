//! Connection and staleness watchdogs for the capture worker.
//!
//! [`WatchdogState`] holds the pure bookkeeping and takes the current time
//! as an argument. [`Watchdog`] arms the two timers on the tokio clock and
//! publishes advisories through an [`EventSink`]. Neither ever stops the
//! worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::supervisor::EventSink;
use crate::worker::{StatusUpdate, SupervisorEvent};

/// Default delay before the "establishing connection" advisory.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default period of the staleness check.
pub const DEFAULT_STALE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Default silence after which the stream is considered stale.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(5);

/// Timer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub connect_timeout: Duration,
    pub stale_check_interval: Duration,
    pub stale_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stale_check_interval: DEFAULT_STALE_CHECK_INTERVAL,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
        }
    }
}

/// A non-fatal advisory raised by a watchdog timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    /// Still no connection when the connection timer fired.
    EstablishingConnection,
    /// Connected, but no output for longer than the threshold.
    StreamInterrupted,
}

impl Advisory {
    /// The status update published for this advisory.
    #[must_use]
    pub fn to_status(self) -> StatusUpdate {
        match self {
            Self::EstablishingConnection => StatusUpdate::info("Establishing camera connection..."),
            Self::StreamInterrupted => {
                StatusUpdate::warning("Camera stream interrupted. Attempting to reconnect...")
            }
        }
    }
}

/// Per-session watchdog bookkeeping.
#[derive(Debug, Clone)]
pub struct WatchdogState {
    last_data: Instant,
    initializing: bool,
}

impl WatchdogState {
    /// Start a session at `now`, in the initializing state.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            last_data: now,
            initializing: true,
        }
    }

    /// Record that output arrived at `now`.
    pub fn record_data(&mut self, now: Instant) {
        self.last_data = now;
    }

    /// Leave the initializing state.
    ///
    /// Returns `true` only for the call that made the change.
    pub fn mark_connected(&mut self) -> bool {
        std::mem::replace(&mut self.initializing, false)
    }

    #[must_use]
    pub fn is_initializing(&self) -> bool {
        self.initializing
    }

    /// Evaluate the connection timer firing.
    #[must_use]
    pub fn connect_deadline_elapsed(&self) -> Option<Advisory> {
        self.initializing.then_some(Advisory::EstablishingConnection)
    }

    /// Evaluate one staleness check at `now`.
    #[must_use]
    pub fn check_staleness(&self, now: Instant, threshold: Duration) -> Option<Advisory> {
        if self.initializing {
            return None;
        }
        (now.saturating_duration_since(self.last_data) > threshold)
            .then_some(Advisory::StreamInterrupted)
    }
}

/// Armed watchdog timers for one capture session.
#[derive(Debug)]
pub struct Watchdog {
    state: Arc<Mutex<WatchdogState>>,
    connect_timer: CancellationToken,
    session: CancellationToken,
}

impl Watchdog {
    /// Arm both timers, starting now.
    #[must_use]
    pub fn arm(config: WatchdogConfig, sink: Arc<dyn EventSink>) -> Self {
        let now = Instant::now();
        let state = Arc::new(Mutex::new(WatchdogState::new(now)));
        let session = CancellationToken::new();
        let connect_timer = session.child_token();

        tokio::spawn(run_connect_timer(
            Arc::clone(&state),
            connect_timer.clone(),
            config.connect_timeout,
            Arc::clone(&sink),
        ));
        tokio::spawn(run_staleness_checker(
            Arc::clone(&state),
            session.clone(),
            now,
            config,
            sink,
        ));

        Self {
            state,
            connect_timer,
            session,
        }
    }

    /// Record that a stdout chunk arrived.
    pub async fn record_data(&self) {
        self.state.lock().await.record_data(Instant::now());
    }

    /// Mark the session connected and cancel the connection timer.
    ///
    /// Returns `true` only the first time.
    pub async fn mark_connected(&self) -> bool {
        let changed = self.state.lock().await.mark_connected();
        if changed {
            self.connect_timer.cancel();
            tracing::debug!("Connection established, connection timer cancelled");
        }
        changed
    }

    pub async fn is_initializing(&self) -> bool {
        self.state.lock().await.is_initializing()
    }

    /// Cancel both timers.
    pub fn cancel(&self) {
        self.session.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.session.cancel();
    }
}

async fn run_connect_timer(
    state: Arc<Mutex<WatchdogState>>,
    cancel: CancellationToken,
    timeout: Duration,
    sink: Arc<dyn EventSink>,
) {
    tokio::select! {
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(timeout) => {
            let advisory = state.lock().await.connect_deadline_elapsed();
            if let Some(advisory) = advisory {
                tracing::info!("Waiting for camera connection");
                sink.emit(SupervisorEvent::ProcessStatus(advisory.to_status()));
            }
        }
    }
}

async fn run_staleness_checker(
    state: Arc<Mutex<WatchdogState>>,
    cancel: CancellationToken,
    armed_at: Instant,
    config: WatchdogConfig,
    sink: Arc<dyn EventSink>,
) {
    let period = config.stale_check_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(armed_at + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let advisory = state
                    .lock()
                    .await
                    .check_staleness(Instant::now(), config.stale_threshold);
                if let Some(advisory) = advisory {
                    tracing::warn!("Camera stream appears to be down");
                    sink.emit(SupervisorEvent::ProcessStatus(advisory.to_status()));
                }
            }
        }
    }
}
