//! Line classification for capture-worker stdout.
//!
//! Lines are either structured JSON or free text. A parse failure is not an
//! error: the line simply takes the free-text path.

use crate::worker::{ClassifiedEvent, StatusUpdate};

/// `type` value marking a structured line as a video frame.
pub const FRAME_TYPE: &str = "frame";

/// Parse a trimmed line as structured data.
///
/// Returns the raw line back in `Err` when it is not valid JSON.
pub fn parse_structured(line: &str) -> Result<serde_json::Value, &str> {
    serde_json::from_str(line).map_err(|_| line)
}

/// Classify one complete line.
///
/// Returns `None` for lines that are empty after trimming.
#[must_use]
pub fn classify(line: &str) -> Option<ClassifiedEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let event = match parse_structured(trimmed) {
        Ok(mut value) if value.get("type").and_then(serde_json::Value::as_str) == Some(FRAME_TYPE) => {
            let data = value
                .get_mut("data")
                .map(serde_json::Value::take)
                .unwrap_or_default();
            ClassifiedEvent::Frame(data)
        }
        Ok(value) => ClassifiedEvent::StatusUpdate(StatusUpdate::Data { data: value }),
        Err(raw) => ClassifiedEvent::StatusUpdate(StatusUpdate::info(raw)),
    };

    tracing::trace!(?event, "Classified worker line");
    Some(event)
}

/// Whether a line reports that the worker reached its video source.
#[must_use]
pub fn is_connected_line(line: &str, marker: &str) -> bool {
    !marker.is_empty() && line.contains(marker)
}
