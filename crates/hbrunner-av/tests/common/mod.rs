//! Scripted fake process launcher for driver tests.
//!
//! [`FakeLauncher`] hands out [`FakeProcess`]es that replay a fixed list of
//! output lines, optionally close both streams, and exit at a scheduled
//! (virtual) time or never. Kill calls are counted.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hbrunner_av::{
    CapturedLine, Error, EventBus, LaunchCommand, LaunchedProcess, ProcessHandle,
    ProcessLauncher, Result, SettingCatalog, StreamKind,
};
use hbrunner_av::{Event, EventPayload, JobDriver};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

/// What a fake process does once launched.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub lines: Vec<CapturedLine>,
    /// Send both end-of-stream sentinels after the lines.
    pub close_streams: bool,
    /// Exit code and delay after launch; `None` runs forever.
    pub exit: Option<(Duration, i32)>,
    pub kill_fails: bool,
    pub launch_error: Option<String>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.lines.push(CapturedLine::line(StreamKind::Stdout, text));
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.lines.push(CapturedLine::line(StreamKind::Stderr, text));
        self
    }

    pub fn close_streams(mut self) -> Self {
        self.close_streams = true;
        self
    }

    pub fn exit_after(mut self, delay: Duration, code: i32) -> Self {
        self.exit = Some((delay, code));
        self
    }

    pub fn kill_fails(mut self) -> Self {
        self.kill_fails = true;
        self
    }

    pub fn launch_error(mut self, message: &str) -> Self {
        self.launch_error = Some(message.to_string());
        self
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    pub launches: AtomicUsize,
    pub kills: AtomicUsize,
    pub commands: Mutex<Vec<LaunchCommand>>,
}

impl Counters {
    pub fn last_command(&self) -> Option<LaunchCommand> {
        self.commands.lock().unwrap().last().cloned()
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

pub struct FakeLauncher {
    script: Script,
    pub counters: Arc<Counters>,
}

impl FakeLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            counters: Arc::new(Counters::default()),
        }
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, command: &LaunchCommand) -> Result<LaunchedProcess> {
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        self.counters.commands.lock().unwrap().push(command.clone());

        if let Some(message) = &self.script.launch_error {
            return Err(Error::launch(command.program_name(), message.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for line in &self.script.lines {
            let _ = tx.send(line.clone());
        }

        let tx = if self.script.close_streams {
            let _ = tx.send(CapturedLine::closed(StreamKind::Stdout));
            let _ = tx.send(CapturedLine::closed(StreamKind::Stderr));
            None
        } else {
            Some(tx)
        };

        let exit = self
            .script
            .exit
            .map(|(delay, code)| (Instant::now() + delay, code));

        Ok(LaunchedProcess {
            handle: Box::new(FakeProcess {
                exit,
                killed: false,
                kill_fails: self.script.kill_fails,
                tx,
                counters: Arc::clone(&self.counters),
            }),
            lines: rx,
        })
    }
}

pub struct FakeProcess {
    exit: Option<(Instant, i32)>,
    killed: bool,
    kill_fails: bool,
    tx: Option<mpsc::UnboundedSender<CapturedLine>>,
    counters: Arc<Counters>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        if self.killed {
            return Ok(None);
        }
        match self.exit {
            Some((at, code)) => {
                if Instant::now() < at {
                    tokio::time::sleep_until(at).await;
                }
                Ok(Some(code))
            }
            None => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> Result<()> {
        self.counters.kills.fetch_add(1, Ordering::SeqCst);
        if self.kill_fails {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "operation not permitted",
            )));
        }
        self.killed = true;
        // A killed process closes its pipes.
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(CapturedLine::closed(StreamKind::Stdout));
            let _ = tx.send(CapturedLine::closed(StreamKind::Stderr));
        }
        Ok(())
    }
}

/// Driver wired to a fake launcher and a fresh bus.
pub fn fake_driver(script: Script) -> (JobDriver, Arc<Counters>, Arc<EventBus>) {
    fake_driver_with(script, SettingCatalog::new(), Arc::new(EventBus::default()))
}

/// Driver wired to a fake launcher, the given settings and bus.
pub fn fake_driver_with(
    script: Script,
    catalog: SettingCatalog,
    bus: Arc<EventBus>,
) -> (JobDriver, Arc<Counters>, Arc<EventBus>) {
    let launcher = FakeLauncher::new(script);
    let counters = Arc::clone(&launcher.counters);
    let driver = JobDriver::new("HandBrakeCLI", Arc::new(catalog), Arc::clone(&bus))
        .with_launcher(Arc::new(launcher));
    (driver, counters, bus)
}

/// Drain everything currently buffered on a subscription.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn is_finished(event: &Event) -> bool {
    matches!(event.payload, EventPayload::AttemptFinished { .. })
}
