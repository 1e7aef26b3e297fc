//! Classification of captured HandBrakeCLI output lines.
//!
//! Every non-empty line becomes exactly one [`OutputLine`] carrying the raw
//! text. Lines matching the progress patterns additionally carry a rounded
//! percentage and, for the combined pattern, the status text HandBrake prints
//! in parentheses after the percentage.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Percentage followed by a parenthesised status, e.g.
/// `Encoding: task 1 of 1, 42.50 % (31.23 fps, avg 30.11 fps, ETA 00h12m34s)`.
pub const PROGRESS_AND_STATUS_PATTERN: &str = r"(\d+\.\d+) % \((.+)\)";

/// Percentage alone, e.g. `Encoding: task 1 of 1, 5.23 %`.
pub const PROGRESS_PATTERN: &str = r"(\d+\.\d+) %";

static PROGRESS_AND_STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PROGRESS_AND_STATUS_PATTERN).expect("valid regex"));

static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PROGRESS_PATTERN).expect("valid regex"));

/// One classified line of output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    /// The line exactly as captured.
    pub log: String,
    /// Rounded percentage in `0..=100`.
    pub progress: Option<u8>,
    /// Status text from the combined pattern.
    pub status: Option<String>,
}

/// Result of classifying one delivery from a capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// The stream closed.
    EndOfStream,
    /// Empty or whitespace-only line.
    Ignored,
    Event(OutputLine),
}

/// Classify one delivery; `None` is the end-of-stream sentinel.
pub fn classify_line(raw: Option<&str>) -> LineClass {
    let Some(line) = raw else {
        return LineClass::EndOfStream;
    };

    if line.trim().is_empty() {
        return LineClass::Ignored;
    }

    let mut event = OutputLine {
        log: line.to_string(),
        progress: None,
        status: None,
    };

    if let Some(caps) = PROGRESS_AND_STATUS_RE.captures(line) {
        event.progress = parse_percentage(&caps[1]);
        event.status = Some(caps[2].to_string());
    } else if let Some(caps) = PROGRESS_RE.captures(line) {
        event.progress = parse_percentage(&caps[1]);
    }

    LineClass::Event(event)
}

/// Parse a decimal percentage and round half-to-even into `0..=100`.
///
/// Parsing goes through `f64`. A tie (`N.5`, `N.50`) is exactly
/// representable, so for HandBrakeCLI's two-decimal output this agrees
/// with decimal half-even rounding.
pub fn parse_percentage(text: &str) -> Option<u8> {
    let value: f64 = text.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.round_ties_even().clamp(0.0, 100.0) as u8)
}
