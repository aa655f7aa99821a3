//! Event types produced from worker output.
//!
//! Every line a worker prints ends up as at most one [`ClassifiedEvent`],
//! which is then routed onto one of the outbound [`Channel`]s as a
//! [`SupervisorEvent`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outbound channel an event is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Frame payloads from the capture worker.
    StreamData,
    /// Status updates from the capture worker and its supervisor.
    ProcessStatus,
    /// Status updates from the recognition worker.
    RecognitionStatus,
}

impl Channel {
    /// Wire name of the channel.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StreamData => "stream-data",
            Self::ProcessStatus => "process-status",
            Self::RecognitionStatus => "recognition-status",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of a [`StatusUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Info,
    Data,
    Stderr,
    Error,
    Exit,
    Success,
    Warning,
}

impl StatusKind {
    /// Value of the `type` tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Data => "data",
            Self::Stderr => "stderr",
            Self::Error => "error",
            Self::Exit => "exit",
            Self::Success => "success",
            Self::Warning => "warning",
        }
    }
}

/// A status message on the `process-status` or `recognition-status` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StatusUpdate {
    /// Plain informational text.
    Info { data: String },
    /// A structured line that was not a frame.
    Data { data: serde_json::Value },
    /// Raw stderr output.
    Stderr { data: String },
    /// A fatal condition reported by a worker or its supervisor.
    Error { data: String },
    /// The worker exited. `None` means it was terminated by a signal.
    Exit { code: Option<i32> },
    /// A positive milestone (connection established, recognition finished).
    Success { data: String },
    /// An advisory that does not stop anything.
    Warning { data: String },
}

impl StatusUpdate {
    /// Create an `Info` update.
    #[must_use]
    pub fn info(data: impl Into<String>) -> Self {
        Self::Info { data: data.into() }
    }

    /// Create a `Stderr` update.
    #[must_use]
    pub fn stderr(data: impl Into<String>) -> Self {
        Self::Stderr { data: data.into() }
    }

    /// Create an `Error` update.
    #[must_use]
    pub fn error(data: impl Into<String>) -> Self {
        Self::Error { data: data.into() }
    }

    /// Create a `Success` update.
    #[must_use]
    pub fn success(data: impl Into<String>) -> Self {
        Self::Success { data: data.into() }
    }

    /// Create a `Warning` update.
    #[must_use]
    pub fn warning(data: impl Into<String>) -> Self {
        Self::Warning { data: data.into() }
    }

    /// Returns the kind of this update.
    #[must_use]
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::Info { .. } => StatusKind::Info,
            Self::Data { .. } => StatusKind::Data,
            Self::Stderr { .. } => StatusKind::Stderr,
            Self::Error { .. } => StatusKind::Error,
            Self::Exit { .. } => StatusKind::Exit,
            Self::Success { .. } => StatusKind::Success,
            Self::Warning { .. } => StatusKind::Warning,
        }
    }

    /// Returns the textual payload, if this update carries one.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Info { data }
            | Self::Stderr { data }
            | Self::Error { data }
            | Self::Success { data }
            | Self::Warning { data } => Some(data),
            Self::Data { .. } | Self::Exit { .. } => None,
        }
    }

    /// Returns the exit code if this is an `Exit` update.
    #[must_use]
    pub fn exit_code(&self) -> Option<Option<i32>> {
        match self {
            Self::Exit { code } => Some(*code),
            _ => None,
        }
    }
}

/// Result of classifying one complete output line.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedEvent {
    /// A structured line of type `frame`; holds its `data` field.
    Frame(serde_json::Value),
    /// Any other line, structured or not.
    StatusUpdate(StatusUpdate),
    /// An unclassified line from a worker whose stdout is not structured.
    PlainText(String),
}

/// An event published by the supervisor on one of its channels.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    StreamData(serde_json::Value),
    ProcessStatus(StatusUpdate),
    RecognitionStatus(StatusUpdate),
}

impl SupervisorEvent {
    /// The channel this event belongs to.
    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            Self::StreamData(_) => Channel::StreamData,
            Self::ProcessStatus(_) => Channel::ProcessStatus,
            Self::RecognitionStatus(_) => Channel::RecognitionStatus,
        }
    }

    /// The status update carried by this event, if any.
    #[must_use]
    pub fn status(&self) -> Option<&StatusUpdate> {
        match self {
            Self::StreamData(_) => None,
            Self::ProcessStatus(update) | Self::RecognitionStatus(update) => Some(update),
        }
    }
}

impl ClassifiedEvent {
    /// Route a recognition-worker line onto `recognition-status`.
    #[must_use]
    pub fn into_recognition(self) -> SupervisorEvent {
        let update = match self {
            Self::Frame(data) => StatusUpdate::Data { data },
            Self::StatusUpdate(update) => update,
            Self::PlainText(text) => StatusUpdate::Info { data: text },
        };
        SupervisorEvent::RecognitionStatus(update)
    }
}

impl From<ClassifiedEvent> for SupervisorEvent {
    /// Route a classified capture-worker line to its channel.
    fn from(event: ClassifiedEvent) -> Self {
        match event {
            ClassifiedEvent::Frame(payload) => Self::StreamData(payload),
            ClassifiedEvent::StatusUpdate(update) => Self::ProcessStatus(update),
            ClassifiedEvent::PlainText(text) => Self::ProcessStatus(StatusUpdate::info(text)),
        }
    }
}
