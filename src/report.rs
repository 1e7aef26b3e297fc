//! Console rendering of attempt events.

use hbrunner_av::{AttemptOutcome, AttemptResult, Event, EventPayload};

/// Process exit status for a finished attempt.
///
/// Non-zero HandBrakeCLI exits map to 1; the killed and never-started cases
/// reuse the codes shells use for the same situations.
pub fn exit_status(result: &AttemptResult) -> u8 {
    match result.outcome() {
        AttemptOutcome::Completed if result.succeeded() => 0,
        AttemptOutcome::Completed => 1,
        AttemptOutcome::Canceled => 130,
        AttemptOutcome::TimedOut => 124,
        AttemptOutcome::LaunchFailed => 127,
    }
}

/// One-line summary of a finished attempt.
pub fn summarize(result: &AttemptResult) -> String {
    let secs = result.elapsed.as_secs();
    match result.outcome() {
        AttemptOutcome::Completed => match result.exit_code {
            Some(code) => format!("Completed with exit code {} after {}s", code, secs),
            None => format!("Completed after {}s (exit code unknown)", secs),
        },
        AttemptOutcome::Canceled => format!("Canceled after {}s", secs),
        AttemptOutcome::TimedOut => format!("Timed out after {}s", secs),
        AttemptOutcome::LaunchFailed => format!(
            "Launch failed: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Render an event for the console.
///
/// Progress lines are always shown; other output only when `show_log` is
/// set.
pub fn render_event(event: &Event, show_log: bool) -> Option<String> {
    match &event.payload {
        EventPayload::AttemptStarted {
            setting,
            source,
            program,
        } => {
            let mut line = format!("Starting {}", program);
            if let Some(setting) = setting {
                line.push_str(&format!(" with setting '{}'", setting));
            }
            if let Some(source) = source {
                line.push_str(&format!(" on {}", source.display()));
            }
            Some(line)
        }
        EventPayload::Output { line, .. } => match (line.progress, &line.status) {
            (Some(pct), Some(status)) => Some(format!("[{:>3}%] {}", pct, status)),
            (Some(pct), None) => Some(format!("[{:>3}%]", pct)),
            (None, _) if show_log => Some(line.log.clone()),
            (None, _) => None,
        },
        EventPayload::AttemptFinished { result } => Some(summarize(result)),
    }
}
