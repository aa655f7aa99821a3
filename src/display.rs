//! Colored terminal projection of supervisor events and workflow status.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;
use tokio::time::Instant;

use crate::metrics::VisitorMetrics;
use crate::worker::{StatusUpdate, SupervisorEvent};
use crate::workflow::{WorkflowPhase, WorkflowStatus};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 120;

/// Step labels shown in the progress tracker.
const STEP_LABELS: [&str; 3] = ["capture", "recognize", "report"];

/// Truncate a string to a maximum length, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.len() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let mut end = max_len - 3;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Format a status update's payload for one line of output.
#[must_use]
pub fn format_payload(update: &StatusUpdate, raw_mode: bool) -> String {
    match update {
        StatusUpdate::Data { data } => truncate(&data.to_string(), DEFAULT_MAX_LEN, raw_mode),
        StatusUpdate::Exit { code } => match code {
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_string(),
        },
        other => truncate(
            other.text().unwrap_or_default().trim_end(),
            DEFAULT_MAX_LEN,
            raw_mode,
        ),
    }
}

fn label(update: &StatusUpdate) -> String {
    let tag = format!("[{}]", update.kind().as_str().to_uppercase());
    match update {
        StatusUpdate::Error { .. } => tag.red().bold().to_string(),
        StatusUpdate::Exit { code } if *code != Some(0) => tag.red().bold().to_string(),
        StatusUpdate::Warning { .. } | StatusUpdate::Stderr { .. } => {
            tag.yellow().bold().to_string()
        }
        StatusUpdate::Success { .. } => tag.green().bold().to_string(),
        _ => tag.blue().bold().to_string(),
    }
}

/// Format one event, or `None` for frame payloads.
#[must_use]
pub fn format_event(event: &SupervisorEvent, raw_mode: bool) -> Option<String> {
    let update = event.status()?;
    Some(format!(
        "{} {} {}",
        event.channel().as_str().dimmed(),
        label(update),
        format_payload(update, raw_mode)
    ))
}

/// Print one supervisor event. Frames are counted, not printed.
pub fn print_event(event: &SupervisorEvent, raw_mode: bool) {
    if let Some(line) = format_event(event, raw_mode) {
        println!("{} {line}", timestamp().dimmed());
        let _ = io::stdout().flush();
    }
}

/// Render the three-step progress tracker.
#[must_use]
pub fn format_progress(status: &WorkflowStatus) -> String {
    let failed = status.phase == WorkflowPhase::Error;
    let completed = status.phase == WorkflowPhase::Completed;

    STEP_LABELS
        .iter()
        .zip(1u8..)
        .map(|(name, step)| {
            let text = format!("{step} {name}");
            if completed || step < status.step {
                text.green().to_string()
            } else if step == status.step && failed {
                text.red().bold().to_string()
            } else if step == status.step {
                text.cyan().bold().to_string()
            } else {
                text.dimmed().to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" > ")
}

/// Print the workflow status line.
pub fn print_status(status: &WorkflowStatus, now: Instant) {
    let controls = if status.controls_enabled {
        "ready".green().to_string()
    } else {
        "busy".yellow().to_string()
    };
    let fps = status.fps.map_or_else(|| "- FPS".to_string(), |fps| format!("{fps} FPS"));

    println!(
        "{} {} {} [{}] {} frames={} {}",
        timestamp().dimmed(),
        "[WORKFLOW]".magenta().bold(),
        format_progress(status),
        controls,
        status.runtime_hms(now).cyan(),
        status.frames,
        fps.dimmed()
    );
    if let Some(count) = status.visitor_count {
        println!("{} {}", "[VISITORS]".green().bold(), count.bold());
    }
    if status.phase == WorkflowPhase::Error {
        if let Some(error) = &status.last_error {
            print_error(&format!("{error}. Start again to retry."));
        }
    }
    let _ = io::stdout().flush();
}

/// Print a metrics lookup result.
pub fn print_count(metrics: &VisitorMetrics) {
    println!(
        "{} {} unique visitors on {}",
        "[VISITORS]".green().bold(),
        metrics.unique_visitors.bold(),
        metrics.date.cyan()
    );
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}
