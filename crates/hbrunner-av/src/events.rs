//! Attempt event broadcasting.
//!
//! [`EventBus`] fans events out over `tokio::sync::broadcast`. Nothing is
//! retained: a subscriber sees only what is published after it subscribed.
//! A bus is handed to each [`crate::JobDriver`] at construction; every event carries
//! the [`AttemptId`] it belongs to, so one bus can serve concurrent attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::classify::OutputLine;
use crate::process::StreamKind;
use crate::result::{AttemptId, AttemptResult};

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// What happened during an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    AttemptStarted {
        setting: Option<String>,
        source: Option<PathBuf>,
        program: String,
    },
    /// One captured, non-empty line.
    Output {
        stream: StreamKind,
        #[serde(flatten)]
        line: OutputLine,
    },
    AttemptFinished {
        result: AttemptResult,
    },
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub attempt_id: AttemptId,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(attempt_id: AttemptId, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// The classified line, if this is an output event.
    pub fn output(&self) -> Option<&OutputLine> {
        match &self.payload {
            EventPayload::Output { line, .. } => Some(line),
            _ => None,
        }
    }

    /// Progress percentage, if this is an output event that carried one.
    pub fn progress(&self) -> Option<u8> {
        self.output().and_then(|l| l.progress)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Per-attempt event fan-out shared by any number of drivers.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// A subscriber more than `capacity` events behind loses the oldest
    /// ones.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Send to current subscribers. Never blocks.
    pub fn publish(&self, attempt_id: AttemptId, payload: EventPayload) {
        // Err only means nobody is listening.
        let _ = self.tx.send(Event::new(attempt_id, payload));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
