//! Supervision of one HandBrakeCLI conversion attempt.
//!
//! [`JobDriver`] launches the process, relays every captured line through
//! [`classify_line`] onto the [`EventBus`], and reconciles three signals into
//! one [`AttemptResult`]:
//!
//! 1. the process exits, or both output streams close,
//! 2. cancellation is requested,
//! 3. the accumulated poll time exceeds the attempt timeout.
//!
//! Each poll waits at most [`POLL_INTERVAL`] for (1), waking early on (2), so
//! a cancellation request takes effect within one poll interval. Checks run
//! in the order above: a process that finished in the same tick as a cancel
//! or timeout is reported as completed, not killed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{classify_line, LineClass};
use crate::events::{EventBus, EventPayload};
use crate::process::{
    CapturedLine, LaunchCommand, LaunchedProcess, ProcessHandle, ProcessLauncher, StreamKind,
    TokioLauncher,
};
use crate::result::{AttemptId, AttemptResult};
use crate::settings::SettingResolver;
use crate::template::TemplateContext;
use crate::{Error, Result};

/// Interval at which the supervision loop re-checks process state.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Absolute bound on accumulated poll time before the process is killed.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_millis(1_440_000);

/// Timing parameters of the supervision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisionLimits {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for SupervisionLimits {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            timeout: ATTEMPT_TIMEOUT,
        }
    }
}

/// Cloneable handle for requesting cancellation from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    /// Request cancellation. Repeated calls have no further effect.
    pub fn request_cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Runs conversion attempts, one at a time.
///
/// Cancellation and completion belong to one attempt. A cancel requested
/// while idle applies to the next attempt; once that attempt ends, the
/// driver arms a fresh cancellation token for the one after it.
pub struct JobDriver {
    program: PathBuf,
    resolver: Arc<dyn SettingResolver>,
    launcher: Arc<dyn ProcessLauncher>,
    bus: Arc<EventBus>,
    limits: SupervisionLimits,
    cancel: Mutex<CancellationToken>,
    active: AtomicBool,
    completed: AtomicBool,
}

impl JobDriver {
    /// Create a driver for `program` that launches real processes.
    pub fn new(
        program: impl Into<PathBuf>,
        resolver: Arc<dyn SettingResolver>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            program: program.into(),
            resolver,
            launcher: Arc::new(TokioLauncher),
            bus,
            limits: SupervisionLimits::default(),
            cancel: Mutex::new(CancellationToken::new()),
            active: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }

    /// Replace the process launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replace the supervision timing.
    pub fn with_limits(mut self, limits: SupervisionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn limits(&self) -> SupervisionLimits {
        self.limits
    }

    /// Request cancellation of the running (or next) attempt.
    pub fn request_cancel(&self) {
        let cancel = self.cancel.lock();
        if !cancel.is_cancelled() {
            info!("Cancellation requested");
        }
        cancel.cancel();
    }

    /// Cancellation flag of the running (or next) attempt.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.lock().is_cancelled()
    }

    /// Handle bound to the running (or next) attempt; it has no effect on
    /// attempts started after that one ends.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.lock().clone())
    }

    /// Whether the most recent call to `execute_convert` or `execute`
    /// reached a normal exit. False while an attempt is running.
    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Resolve `setting_name` and run one attempt on `source`.
    ///
    /// `params` fills `{placeholder}` tokens of the setting's command line on
    /// top of the variables derived from `source` (`{input}`, `{filestem}`,
    /// ...).
    ///
    /// # Errors
    ///
    /// - [`Error::SettingNotFound`] if the resolver does not know the name.
    /// - [`Error::InvalidInput`] if the resolved command line cannot be split.
    /// - [`Error::AttemptInProgress`] if this driver is already running.
    ///
    /// Launch failure, cancellation and timeout are not errors; they are
    /// reported in the returned [`AttemptResult`].
    pub async fn execute_convert(
        &self,
        setting_name: &str,
        source: &Path,
        params: &HashMap<String, String>,
    ) -> Result<AttemptResult> {
        self.completed.store(false, Ordering::SeqCst);

        let ctx = TemplateContext::new().with_source(source).with_vars(params);
        let command_line = self.resolver.resolve(setting_name, &ctx)?;
        let command = LaunchCommand::from_command_line(self.program.clone(), &command_line)?;

        self.run_attempt(command, Some(setting_name), Some(source)).await
    }

    /// Run one attempt for an already-resolved command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AttemptInProgress`] if this driver is already running.
    pub async fn execute(&self, command: LaunchCommand) -> Result<AttemptResult> {
        self.completed.store(false, Ordering::SeqCst);
        self.run_attempt(command, None, None).await
    }

    async fn run_attempt(
        &self,
        command: LaunchCommand,
        setting: Option<&str>,
        source: Option<&Path>,
    ) -> Result<AttemptResult> {
        let _active = ActiveGuard::acquire(&self.active)?;
        let _rearm = RearmCancel(&self.cancel);
        let cancel = self.cancel.lock().clone();
        let attempt_id = AttemptId::new();

        info!(
            "Starting attempt {}: {:?} (setting={:?}, source={:?})",
            attempt_id,
            command.get_program(),
            setting,
            source
        );
        debug!("Arguments: {:?}", command.get_args());

        self.bus.publish(
            attempt_id,
            EventPayload::AttemptStarted {
                setting: setting.map(str::to_string),
                source: source.map(Path::to_path_buf),
                program: command.program_name(),
            },
        );

        let result = match self.launcher.launch(&command).await {
            Ok(launched) => self.supervise(attempt_id, launched, &cancel).await,
            Err(e) => {
                warn!("Attempt {} failed to launch: {}", attempt_id, e);
                AttemptResult::launch_failed(attempt_id, e.to_string())
            }
        };

        self.completed.store(result.completed, Ordering::SeqCst);
        info!(
            "Attempt {} {} after {:?} (exit code {:?})",
            attempt_id,
            result.outcome(),
            result.elapsed,
            result.exit_code
        );

        self.bus.publish(
            attempt_id,
            EventPayload::AttemptFinished {
                result: result.clone(),
            },
        );

        Ok(result)
    }

    async fn supervise(
        &self,
        attempt_id: AttemptId,
        launched: LaunchedProcess,
        cancel: &CancellationToken,
    ) -> AttemptResult {
        let LaunchedProcess { mut handle, lines } = launched;
        debug!("Attempt {} running as pid {:?}", attempt_id, handle.id());

        let (closed_tx, mut output_closed) = oneshot::channel();
        let mut capture = tokio::spawn(capture_output(
            attempt_id,
            lines,
            Arc::clone(&self.bus),
            closed_tx,
        ));

        let poll = self.limits.poll_interval;
        let mut elapsed = Duration::ZERO;

        let result = loop {
            let signal = tokio::select! {
                biased;
                status = handle.wait() => Signal::Exited(status),
                _ = &mut output_closed => Signal::OutputClosed,
                _ = cancel.cancelled() => Signal::Tick,
                _ = tokio::time::sleep(poll) => Signal::Tick,
            };
            elapsed += poll;

            match signal {
                Signal::Exited(status) => {
                    let exit_code = status.unwrap_or_else(|e| {
                        warn!("Attempt {}: waiting for exit failed: {}", attempt_id, e);
                        None
                    });
                    debug!("Attempt {}: process exited ({:?})", attempt_id, exit_code);
                    break AttemptResult::completed(attempt_id, exit_code, elapsed);
                }
                Signal::OutputClosed => {
                    debug!("Attempt {}: output streams closed", attempt_id);
                    let exit_code = reap(&mut *handle, poll).await;
                    break AttemptResult::completed(attempt_id, exit_code, elapsed);
                }
                Signal::Tick => {}
            }

            if cancel.is_cancelled() {
                debug!("Attempt {}: cancellation observed", attempt_id);
                terminate(&mut *handle).await;
                break AttemptResult::canceled(attempt_id, elapsed);
            }

            if elapsed > self.limits.timeout {
                warn!(
                    "Attempt {} exceeded timeout of {:?}",
                    attempt_id, self.limits.timeout
                );
                terminate(&mut *handle).await;
                break AttemptResult::timed_out(attempt_id, elapsed);
            }
        };

        // Let the capture task publish whatever is still buffered so all
        // output events precede the finished event.
        if tokio::time::timeout(poll, &mut capture).await.is_err() {
            debug!("Attempt {}: output capture still open, abandoning it", attempt_id);
            capture.abort();
        }

        result
    }
}

enum Signal {
    Exited(Result<Option<i32>>),
    OutputClosed,
    Tick,
}

/// Marks a driver busy for the lifetime of one attempt.
struct ActiveGuard<'a>(&'a AtomicBool);

impl<'a> ActiveGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::AttemptInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Installs a fresh cancellation token when an attempt ends, on any path.
struct RearmCancel<'a>(&'a Mutex<CancellationToken>);

impl Drop for RearmCancel<'_> {
    fn drop(&mut self) {
        *self.0.lock() = CancellationToken::new();
    }
}

/// Collect the exit code after the output streams closed.
async fn reap(handle: &mut dyn ProcessHandle, within: Duration) -> Option<i32> {
    match tokio::time::timeout(within, handle.wait()).await {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            warn!("Waiting for exit failed: {}", e);
            None
        }
        Err(_) => {
            debug!("Process still running after its output closed");
            None
        }
    }
}

/// Best-effort kill; failure does not change the outcome.
async fn terminate(handle: &mut dyn ProcessHandle) {
    if let Err(e) = handle.kill().await {
        warn!("Failed to kill process {:?}: {}", handle.id(), e);
    }
}

/// Classify captured lines and publish them until both streams close.
///
/// `closed_tx` fires once both end-of-stream sentinels arrived; if the
/// channel closes first it is dropped, which the driver treats the same way.
async fn capture_output(
    attempt_id: AttemptId,
    mut lines: mpsc::UnboundedReceiver<CapturedLine>,
    bus: Arc<EventBus>,
    closed_tx: oneshot::Sender<()>,
) {
    let mut stdout_open = true;
    let mut stderr_open = true;

    while let Some(captured) = lines.recv().await {
        match classify_line(captured.text.as_deref()) {
            LineClass::EndOfStream => {
                match captured.stream {
                    StreamKind::Stdout => stdout_open = false,
                    StreamKind::Stderr => stderr_open = false,
                }
                if !stdout_open && !stderr_open {
                    let _ = closed_tx.send(());
                    return;
                }
            }
            LineClass::Ignored => {}
            LineClass::Event(line) => {
                bus.publish(
                    attempt_id,
                    EventPayload::Output {
                        stream: captured.stream,
                        line,
                    },
                );
            }
        }
    }
}
