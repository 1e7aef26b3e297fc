//! Process launch capability.
//!
//! The driver only sees the [`ProcessLauncher`] and [`ProcessHandle`] traits;
//! [`TokioLauncher`] is the real implementation over `tokio::process`.
//! Output of both streams arrives on one channel as [`CapturedLine`]s, each
//! stream finishing with exactly one end-of-stream sentinel.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{Error, Result};

// ---------------------------------------------------------------------------
// Captured output
// ---------------------------------------------------------------------------

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One delivery from a capture stream. `text: None` is the end-of-stream
/// sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLine {
    pub stream: StreamKind,
    pub text: Option<String>,
}

impl CapturedLine {
    pub fn line(stream: StreamKind, text: impl Into<String>) -> Self {
        Self {
            stream,
            text: Some(text.into()),
        }
    }

    pub fn closed(stream: StreamKind) -> Self {
        Self { stream, text: None }
    }
}

// ---------------------------------------------------------------------------
// LaunchCommand
// ---------------------------------------------------------------------------

/// Program and argv for one launch.
///
/// # Example
///
/// ```
/// use hbrunner_av::LaunchCommand;
///
/// let cmd = LaunchCommand::from_command_line(
///     "HandBrakeCLI",
///     r#"-i "/in/My Movie.mkv" -o /out/movie.mp4 --preset "Fast 1080p30""#,
/// )?;
/// assert_eq!(cmd.get_args(), ["-i", "/in/My Movie.mkv", "-o", "/out/movie.mp4", "--preset", "Fast 1080p30"]);
/// # Ok::<(), hbrunner_av::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Build a command from a single argument string, splitting on
    /// whitespace outside double quotes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on an unterminated quote.
    pub fn from_command_line(program: impl Into<PathBuf>, command_line: &str) -> Result<Self> {
        let mut cmd = Self::new(program);
        cmd.args(split_command_line(command_line)?);
        Ok(cmd)
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn get_program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// File name of the program, for messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }
}

/// Split an argument string into argv.
///
/// Whitespace separates arguments; double quotes group, and `\"` is a literal
/// quote. Other backslashes are kept so Windows paths pass through.
pub fn split_command_line(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
                has_token = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if in_quotes {
        return Err(Error::InvalidInput(format!(
            "unterminated quote in command line: {line}"
        )));
    }
    if has_token {
        args.push(current);
    }

    Ok(args)
}

// ---------------------------------------------------------------------------
// Launch traits
// ---------------------------------------------------------------------------

/// Control over a running process.
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process id, if known.
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit and return its exit code (`None` when it
    /// was terminated by a signal). Must be cancel-safe: the driver races it
    /// against other signals and drops it between polls.
    async fn wait(&mut self) -> Result<Option<i32>>;

    /// Forcibly terminate the process.
    async fn kill(&mut self) -> Result<()>;
}

/// A started process plus the receiving end of its output capture.
pub struct LaunchedProcess {
    pub handle: Box<dyn ProcessHandle>,
    pub lines: mpsc::UnboundedReceiver<CapturedLine>,
}

/// Starts processes for the driver.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start `command` with stdout and stderr captured line by line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] if the process could not be started.
    async fn launch(&self, command: &LaunchCommand) -> Result<LaunchedProcess>;
}

// ---------------------------------------------------------------------------
// Tokio implementation
// ---------------------------------------------------------------------------

/// [`ProcessLauncher`] backed by `tokio::process`.
///
/// No shell is involved and stdin is null. Dropping the handle kills the
/// child and stops its output readers, even when a grandchild still holds
/// the pipes open.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, command: &LaunchCommand) -> Result<LaunchedProcess> {
        let mut cmd = Command::new(command.get_program());
        cmd.args(command.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::launch(command.program_name(), e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        match child.stdout.take() {
            Some(stdout) => readers.push(spawn_capture(StreamKind::Stdout, stdout, tx.clone())),
            None => {
                let _ = tx.send(CapturedLine::closed(StreamKind::Stdout));
            }
        }
        match child.stderr.take() {
            Some(stderr) => readers.push(spawn_capture(StreamKind::Stderr, stderr, tx)),
            None => {
                let _ = tx.send(CapturedLine::closed(StreamKind::Stderr));
            }
        }

        Ok(LaunchedProcess {
            handle: Box::new(TokioProcess { child, readers }),
            lines: rx,
        })
    }
}

struct TokioProcess {
    child: Child,
    readers: Vec<JoinHandle<()>>,
}

impl Drop for TokioProcess {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

#[async_trait]
impl ProcessHandle for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}

fn spawn_capture<R>(
    stream: StreamKind,
    reader: R,
    tx: mpsc::UnboundedSender<CapturedLine>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut splitter = LineSplitter::default();

        loop {
            let buf = match reader.fill_buf().await {
                Ok(buf) => buf,
                Err(e) => {
                    debug!(?stream, error = %e, "Output capture read failed");
                    break;
                }
            };
            if buf.is_empty() {
                break;
            }
            let len = buf.len();
            for text in splitter.push(buf) {
                let _ = tx.send(CapturedLine::line(stream, text));
            }
            reader.consume(len);
        }

        if let Some(text) = splitter.finish() {
            let _ = tx.send(CapturedLine::line(stream, text));
        }
        let _ = tx.send(CapturedLine::closed(stream));
    })
}

/// Splits a byte stream into lines on `\n`, `\r` or `\r\n`.
///
/// HandBrakeCLI rewrites its progress line with bare carriage returns, so
/// `\r` has to end a line too. Invalid UTF-8 is replaced, not fatal.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
    last_was_cr: bool,
}

impl LineSplitter {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            match b {
                b'\n' if self.last_was_cr => {
                    self.last_was_cr = false;
                }
                b'\r' | b'\n' => {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                    self.last_was_cr = b == b'\r';
                }
                _ => {
                    self.pending.push(b);
                    self.last_was_cr = false;
                }
            }
        }
        lines
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}
