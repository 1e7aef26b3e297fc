//! # hbrunner-av
//!
//! Supervision of HandBrakeCLI conversion attempts.
//!
//! This crate provides:
//!
//! - **Job driver** ([`JobDriver`]) -- launches one conversion, relays its
//!   output as typed events, and settles exit, cancellation and timeout into
//!   one [`AttemptResult`].
//! - **Output classification** ([`classify_line`]) -- extracts progress
//!   percentage and status text from HandBrakeCLI log lines.
//! - **Event broadcasting** ([`EventBus`]) -- per-attempt events for any
//!   number of subscribers.
//! - **Process launching** ([`ProcessLauncher`], [`TokioLauncher`]) -- the
//!   seam between the driver and the operating system.
//! - **Settings** ([`SettingResolver`], [`SettingCatalog`]) -- named argument
//!   templates with `{placeholder}` substitution.
//! - **Tool discovery** ([`check_tool`], [`get_tool_path`]).
//!
//! ## Example
//!
//! ```no_run
//! use hbrunner_av::{ConvertSetting, EventBus, JobDriver, SettingCatalog};
//! use std::collections::HashMap;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> hbrunner_av::Result<()> {
//! let catalog = SettingCatalog::from_settings([ConvertSetting {
//!     name: "fast".into(),
//!     command_line: r#"-i "{input}" -o "{output}" --preset "Fast 1080p30""#.into(),
//!     description: None,
//! }]);
//! let bus = Arc::new(EventBus::default());
//! let mut events = bus.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let Some(pct) = event.progress() {
//!             println!("{pct}%");
//!         }
//!     }
//! });
//!
//! let driver = JobDriver::new("HandBrakeCLI", Arc::new(catalog), bus);
//! let mut params = HashMap::new();
//! params.insert("output".to_string(), "/out/movie.mp4".to_string());
//! let result = driver
//!     .execute_convert("fast", Path::new("/in/movie.mkv"), &params)
//!     .await?;
//! println!("{}", result.outcome());
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod driver;
mod error;
pub mod events;
pub mod process;
pub mod result;
pub mod settings;
pub mod template;
pub mod tools;

// Re-exports
pub use classify::{classify_line, LineClass, OutputLine};
pub use driver::{CancelHandle, JobDriver, SupervisionLimits, ATTEMPT_TIMEOUT, POLL_INTERVAL};
pub use error::{Error, Result};
pub use events::{Event, EventBus, EventPayload};
pub use process::{
    CapturedLine, LaunchCommand, LaunchedProcess, ProcessHandle, ProcessLauncher, StreamKind,
    TokioLauncher,
};
pub use result::{AttemptId, AttemptOutcome, AttemptResult};
pub use settings::{ConvertSetting, SettingCatalog, SettingResolver};
pub use template::TemplateContext;
pub use tools::{check_tool, get_tool_path, require_tool, ToolInfo, HANDBRAKE_CLI};
