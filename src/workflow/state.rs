//! Workflow phase state machine.

use serde::{Deserialize, Serialize};

use crate::supervisor::SupervisorError;

/// Current phase of the visitor-counting workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowPhase {
    #[default]
    Idle,
    /// Step 1: the capture worker is streaming.
    Capturing,
    /// Step 2: the recognition worker is running.
    Recognizing,
    /// Step 3: the final count is being fetched.
    Reporting,
    Error,
    Completed,
}

impl WorkflowPhase {
    /// Progress step shown to the user; 0 outside the three active steps.
    #[must_use]
    pub fn step(self) -> u8 {
        match self {
            Self::Capturing => 1,
            Self::Recognizing => 2,
            Self::Reporting => 3,
            Self::Idle | Self::Error | Self::Completed => 0,
        }
    }

    /// Whether a user start is accepted in this phase.
    #[must_use]
    pub fn accepts_start(self) -> bool {
        matches!(self, Self::Idle | Self::Error | Self::Completed)
    }

    /// Whether one of the three steps is in progress.
    #[must_use]
    pub fn is_active(self) -> bool {
        self.step() > 0
    }

    /// Whether `to` is a legal next phase.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle | Self::Error | Self::Completed, Self::Capturing)
                | (Self::Capturing, Self::Recognizing)
                | (Self::Recognizing, Self::Reporting)
                | (Self::Reporting, Self::Completed)
                | (Self::Idle | Self::Capturing | Self::Recognizing | Self::Reporting, Self::Error)
                | (Self::Error | Self::Completed, Self::Idle)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Recognizing => "recognizing",
            Self::Reporting => "reporting",
            Self::Error => "error",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from workflow commands.
#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    /// Controls are disabled while recognition or reporting is in progress.
    #[error("Controls are disabled during {0}")]
    ControlsDisabled(WorkflowPhase),
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: WorkflowPhase,
        to: WorkflowPhase,
    },
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Tracks the current phase and the last step that was reached.
#[derive(Debug, Clone, Default)]
pub struct PhaseMachine {
    phase: WorkflowPhase,
    last_step: u8,
}

impl PhaseMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> WorkflowPhase {
        self.phase
    }

    /// The step that was active most recently, kept after Error so the
    /// failed step can be shown.
    #[must_use]
    pub fn last_step(&self) -> u8 {
        self.last_step
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidTransition` if the move is not allowed.
    /// The phase is unchanged on error.
    pub fn transition(&mut self, to: WorkflowPhase) -> Result<(), WorkflowError> {
        if !self.phase.can_transition_to(to) {
            tracing::warn!(from = %self.phase, to = %to, "Rejected phase transition");
            return Err(WorkflowError::InvalidTransition {
                from: self.phase,
                to,
            });
        }

        tracing::debug!(from = %self.phase, to = %to, "Phase transition");
        self.phase = to;
        if to.is_active() {
            self.last_step = to.step();
        }
        Ok(())
    }

    /// Return to Idle from any phase.
    pub fn reset(&mut self) {
        tracing::debug!(from = %self.phase, "Phase reset");
        self.phase = WorkflowPhase::Idle;
        self.last_step = 0;
    }
}
