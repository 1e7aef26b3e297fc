//! Attempt identifiers and terminal results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Exit code reported when the process could not be started.
pub const LAUNCH_FAILED_EXIT_CODE: i32 = -1;

/// Unique identifier for one conversion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(Uuid);

impl AttemptId {
    /// Create a new random ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The process exited or closed both output streams.
    Completed,
    /// Cancellation was observed and the process was killed.
    Canceled,
    /// The absolute timeout elapsed and the process was killed.
    TimedOut,
    /// The process never started.
    LaunchFailed,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptOutcome::Completed => "completed",
            AttemptOutcome::Canceled => "canceled",
            AttemptOutcome::TimedOut => "timed out",
            AttemptOutcome::LaunchFailed => "launch failed",
        };
        f.write_str(s)
    }
}

/// Terminal record of one conversion attempt.
///
/// `completed` and `canceled` are never both true; both false means the
/// attempt timed out or failed to launch (the latter carries
/// `error_message`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt_id: AttemptId,
    pub completed: bool,
    pub canceled: bool,
    /// Present when the process exited normally, or `-1` on launch failure.
    pub exit_code: Option<i32>,
    /// Present only on launch failure.
    pub error_message: Option<String>,
    /// Accumulated poll time.
    pub elapsed: Duration,
}

impl AttemptResult {
    pub(crate) fn completed(attempt_id: AttemptId, exit_code: Option<i32>, elapsed: Duration) -> Self {
        Self {
            attempt_id,
            completed: true,
            canceled: false,
            exit_code,
            error_message: None,
            elapsed,
        }
    }

    pub(crate) fn canceled(attempt_id: AttemptId, elapsed: Duration) -> Self {
        Self {
            attempt_id,
            completed: false,
            canceled: true,
            exit_code: None,
            error_message: None,
            elapsed,
        }
    }

    pub(crate) fn timed_out(attempt_id: AttemptId, elapsed: Duration) -> Self {
        Self {
            attempt_id,
            completed: false,
            canceled: false,
            exit_code: None,
            error_message: None,
            elapsed,
        }
    }

    pub(crate) fn launch_failed(attempt_id: AttemptId, message: impl Into<String>) -> Self {
        Self {
            attempt_id,
            completed: false,
            canceled: false,
            exit_code: Some(LAUNCH_FAILED_EXIT_CODE),
            error_message: Some(message.into()),
            elapsed: Duration::ZERO,
        }
    }

    pub fn outcome(&self) -> AttemptOutcome {
        if self.completed {
            AttemptOutcome::Completed
        } else if self.canceled {
            AttemptOutcome::Canceled
        } else if self.error_message.is_some() {
            AttemptOutcome::LaunchFailed
        } else {
            AttemptOutcome::TimedOut
        }
    }

    /// Completed with exit code 0.
    pub fn succeeded(&self) -> bool {
        self.completed && self.exit_code == Some(0)
    }
}
