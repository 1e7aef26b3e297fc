//! Supervision loop tests against a scripted fake process.
//!
//! All tests run with a paused clock so the 1 s poll interval and the
//! attempt timeout elapse instantly.

mod common;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{drain, fake_driver, fake_driver_with, is_finished, Script};
use hbrunner_av::{
    AttemptId, AttemptOutcome, ConvertSetting, Error, EventBus, EventPayload, LaunchCommand, SettingCatalog,
    StreamKind, SupervisionLimits,
};

fn command() -> LaunchCommand {
    LaunchCommand::new("HandBrakeCLI")
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn exit_zero_completes() {
    let (driver, counters, _bus) = fake_driver(Script::new().exit_after(Duration::from_millis(1500), 0));

    let result = driver.execute(command()).await.unwrap();

    assert!(result.completed);
    assert!(!result.canceled);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.error_message, None);
    assert_eq!(result.elapsed, Duration::from_secs(2));
    assert_eq!(result.outcome(), AttemptOutcome::Completed);
    assert!(result.succeeded());
    assert!(driver.completed());
    assert_eq!(counters.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn nonzero_exit_is_still_completed() {
    let (driver, _counters, _bus) = fake_driver(Script::new().exit_after(Duration::from_millis(10), 3));

    let result = driver.execute(command()).await.unwrap();

    assert!(result.completed);
    assert_eq!(result.exit_code, Some(3));
    assert!(!result.succeeded());
}

#[tokio::test(start_paused = true)]
async fn progress_events_arrive_in_order_before_result() {
    let script = Script::new()
        .stdout("Encoding: task 1 of 1, 10.00 %")
        .stdout("Encoding: task 1 of 1, 55.50 %")
        .close_streams()
        .exit_after(Duration::from_millis(200), 0);
    let (driver, _counters, bus) = fake_driver(script);
    let mut rx = bus.subscribe();

    let result = driver.execute(command()).await.unwrap();

    // End of output alone ended the loop in the first poll.
    assert!(result.completed);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.elapsed, Duration::from_secs(1));

    let events = drain(&mut rx);
    assert_matches!(events[0].payload, EventPayload::AttemptStarted { .. });

    let progress: Vec<u8> = events.iter().filter_map(|e| e.progress()).collect();
    assert_eq!(progress, vec![10, 56]);

    let last = events.last().unwrap();
    assert!(is_finished(last));
    assert_matches!(
        &last.payload,
        EventPayload::AttemptFinished { result: finished } if finished == &result
    );
    assert!(events.iter().all(|e| e.attempt_id == result.attempt_id));
}

#[tokio::test(start_paused = true)]
async fn output_closed_without_exit_completes_without_code() {
    let (driver, counters, _bus) = fake_driver(Script::new().stdout("Muxing: this may take awhile...").close_streams());

    let result = driver.execute(command()).await.unwrap();

    assert!(result.completed);
    assert_eq!(result.exit_code, None);
    assert_eq!(counters.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn every_nonblank_line_yields_one_event() {
    let script = Script::new()
        .stdout("")
        .stderr("   ")
        .stderr("[10:00:00] libhb: scan thread found 1 valid title(s)")
        .stdout("Encoding: task 1 of 1, 42.50 % (31.23 fps, avg 30.11 fps, ETA 00h12m34s)")
        .close_streams()
        .exit_after(Duration::ZERO, 0);
    let (driver, _counters, bus) = fake_driver(script);
    let mut rx = bus.subscribe();

    driver.execute(command()).await.unwrap();

    let outputs: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::Output { stream, line } => Some((stream, line)),
            _ => None,
        })
        .collect();
    assert_eq!(outputs.len(), 2);

    let (stream, line) = &outputs[0];
    assert_eq!(*stream, StreamKind::Stderr);
    assert_eq!(line.log, "[10:00:00] libhb: scan thread found 1 valid title(s)");
    assert_eq!(line.progress, None);
    assert_eq!(line.status, None);

    let (stream, line) = &outputs[1];
    assert_eq!(*stream, StreamKind::Stdout);
    assert_eq!(line.progress, Some(42));
    assert_eq!(line.status.as_deref(), Some("31.23 fps, avg 30.11 fps, ETA 00h12m34s"));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_kills_once_within_one_poll() {
    let (driver, counters, _bus) = fake_driver(Script::new());
    let driver = Arc::new(driver);

    let running = Arc::clone(&driver);
    let task = tokio::spawn(async move { running.execute(command()).await });

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let requested_at = tokio::time::Instant::now();
    driver.request_cancel();
    driver.request_cancel();
    driver.cancel_handle().request_cancel();

    let result = task.await.unwrap().unwrap();

    assert!(!result.completed);
    assert!(result.canceled);
    assert_eq!(result.exit_code, None);
    assert_eq!(result.outcome(), AttemptOutcome::Canceled);
    assert_eq!(result.elapsed, Duration::from_secs(3));
    assert_eq!(counters.kills(), 1);
    assert!(requested_at.elapsed() <= Duration::from_secs(2));
    assert!(!driver.completed());
    // The next attempt starts with a fresh flag.
    assert!(!driver.is_cancel_requested());
}

#[tokio::test(start_paused = true)]
async fn cancel_before_start_cancels_first_poll() {
    let (driver, counters, _bus) = fake_driver(Script::new());
    driver.request_cancel();

    let result = driver.execute(command()).await.unwrap();

    assert!(result.canceled);
    assert_eq!(result.elapsed, Duration::from_secs(1));
    assert_eq!(counters.kills(), 1);
}

#[tokio::test(start_paused = true)]
async fn completion_wins_over_cancel_in_same_tick() {
    let (driver, counters, _bus) = fake_driver(Script::new().exit_after(Duration::ZERO, 0));
    driver.request_cancel();

    let result = driver.execute(command()).await.unwrap();

    assert!(result.completed);
    assert!(!result.canceled);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(counters.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_does_not_carry_into_next_attempt() {
    let (driver, counters, _bus) = fake_driver(Script::new().exit_after(Duration::from_millis(1500), 0));
    driver.request_cancel();

    let first = driver.execute(command()).await.unwrap();
    assert!(first.canceled);
    assert!(!driver.is_cancel_requested());

    let second = driver.execute(command()).await.unwrap();
    assert!(second.completed);
    assert!(!second.canceled);
    assert_eq!(second.exit_code, Some(0));
    assert!(driver.completed());
    assert_eq!(counters.launches(), 2);
    assert_eq!(counters.kills(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_cancel_handle_has_no_effect() {
    let (driver, counters, _bus) = fake_driver(Script::new().exit_after(Duration::from_millis(1500), 0));

    let first_handle = driver.cancel_handle();
    assert!(driver.execute(command()).await.unwrap().completed);

    first_handle.request_cancel();
    assert!(first_handle.is_cancel_requested());
    assert!(!driver.is_cancel_requested());

    let second = driver.execute(command()).await.unwrap();
    assert!(second.completed);
    assert_eq!(counters.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn kill_failure_is_swallowed() {
    let (driver, counters, _bus) = fake_driver(Script::new().kill_fails());
    driver.request_cancel();

    let result = driver.execute(command()).await.unwrap();

    assert!(result.canceled);
    assert!(!result.completed);
    assert_eq!(counters.kills(), 1);
}

// ---------------------------------------------------------------------------
// Timeout
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn timeout_kills_after_limit() {
    let (driver, counters, _bus) = fake_driver(Script::new());

    let result = driver.execute(command()).await.unwrap();

    assert!(!result.completed);
    assert!(!result.canceled);
    assert_eq!(result.outcome(), AttemptOutcome::TimedOut);
    assert_eq!(result.elapsed, Duration::from_millis(1_441_000));
    assert_eq!(counters.kills(), 1);
}

#[tokio::test(start_paused = true)]
async fn exit_in_final_tick_beats_timeout() {
    let (driver, counters, _bus) = fake_driver(Script::new().exit_after(Duration::from_millis(3500), 0));
    let driver = driver.with_limits(SupervisionLimits {
        poll_interval: Duration::from_secs(1),
        timeout: Duration::from_secs(3),
    });

    let result = driver.execute(command()).await.unwrap();

    assert!(result.completed);
    assert_eq!(result.elapsed, Duration::from_secs(4));
    assert_eq!(counters.kills(), 0);
}

#[tokio::test(start_paused = true)]
async fn custom_limits_time_out() {
    let (driver, counters, _bus) = fake_driver(Script::new());
    let driver = driver.with_limits(SupervisionLimits {
        poll_interval: Duration::from_millis(250),
        timeout: Duration::from_secs(1),
    });

    let result = driver.execute(command()).await.unwrap();

    assert_eq!(result.outcome(), AttemptOutcome::TimedOut);
    assert_eq!(result.elapsed, Duration::from_millis(1250));
    assert_eq!(counters.kills(), 1);
}

// ---------------------------------------------------------------------------
// Launch failure
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn launch_failure_skips_loop() {
    let (driver, counters, bus) = fake_driver(Script::new().launch_error("No such file or directory"));
    let mut rx = bus.subscribe();

    let result = driver.execute(command()).await.unwrap();

    assert!(!result.completed);
    assert!(!result.canceled);
    assert_eq!(result.exit_code, Some(-1));
    let message = result.error_message.as_deref().unwrap();
    assert!(message.contains("No such file or directory"), "unexpected message: {message}");
    assert_eq!(result.elapsed, Duration::ZERO);
    assert_eq!(result.outcome(), AttemptOutcome::LaunchFailed);
    assert_eq!(counters.launches(), 1);
    assert_eq!(counters.kills(), 0);
    assert!(!driver.completed());

    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(is_finished(&events[1]));
}

// ---------------------------------------------------------------------------
// Driver lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn second_attempt_while_running_is_rejected() {
    let (driver, _counters, _bus) = fake_driver(Script::new());
    let driver = Arc::new(driver);

    let running = Arc::clone(&driver);
    let task = tokio::spawn(async move { running.execute(command()).await });
    tokio::time::sleep(Duration::from_millis(500)).await;

    let err = driver.execute(command()).await.unwrap_err();
    assert_matches!(err, Error::AttemptInProgress);

    driver.request_cancel();
    let result = task.await.unwrap().unwrap();
    assert!(result.canceled);
}

#[tokio::test(start_paused = true)]
async fn execute_convert_resolves_setting() {
    let catalog = SettingCatalog::from_settings([ConvertSetting {
        name: "fast".to_string(),
        command_line: r#"-i "{input}" -o "{output}" --preset "Fast 1080p30""#.to_string(),
        description: None,
    }]);
    let (driver, counters, _bus) = fake_driver_with(
        Script::new().exit_after(Duration::ZERO, 0),
        catalog,
        Arc::new(EventBus::default()),
    );

    let mut params = HashMap::new();
    params.insert("output".to_string(), "/out/My Movie.mp4".to_string());
    let result = driver
        .execute_convert("fast", Path::new("/in/My Movie.mkv"), &params)
        .await
        .unwrap();

    assert!(result.completed);
    let command = counters.last_command().unwrap();
    assert_eq!(command.get_program(), Path::new("HandBrakeCLI"));
    assert_eq!(
        command.get_args(),
        ["-i", "/in/My Movie.mkv", "-o", "/out/My Movie.mp4", "--preset", "Fast 1080p30"]
    );
}

#[tokio::test(start_paused = true)]
async fn execute_convert_unknown_setting_never_launches() {
    let (driver, counters, _bus) = fake_driver(Script::new());

    let err = driver
        .execute_convert("missing", Path::new("/in/a.mkv"), &HashMap::new())
        .await
        .unwrap_err();

    assert_matches!(err, Error::SettingNotFound { ref name } if name == "missing");
    assert_eq!(counters.launches(), 0);
}

#[tokio::test(start_paused = true)]
async fn completed_flag_resets_when_setting_fails_to_resolve() {
    let (driver, _counters, _bus) = fake_driver(Script::new().exit_after(Duration::ZERO, 0));

    assert!(driver.execute(command()).await.unwrap().succeeded());
    assert!(driver.completed());

    let err = driver
        .execute_convert("missing", Path::new("/in/a.mkv"), &HashMap::new())
        .await
        .unwrap_err();
    assert_matches!(err, Error::SettingNotFound { .. });
    assert!(!driver.completed());
}

#[tokio::test(start_paused = true)]
async fn completed_flag_is_false_while_running() {
    let (driver, _counters, _bus) = fake_driver(Script::new().exit_after(Duration::from_millis(2500), 0));
    let driver = Arc::new(driver);

    assert!(driver.execute(command()).await.unwrap().completed);
    assert!(driver.completed());

    let running = Arc::clone(&driver);
    let task = tokio::spawn(async move { running.execute(command()).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!driver.completed());

    assert!(task.await.unwrap().unwrap().completed);
    assert!(driver.completed());
}

#[tokio::test(start_paused = true)]
async fn concurrent_drivers_share_a_bus() {
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let (a, _, _) = fake_driver_with(
        Script::new().stdout("Encoding: task 1 of 1, 20.00 %").close_streams(),
        SettingCatalog::new(),
        Arc::clone(&bus),
    );
    let (b, _, _) = fake_driver_with(
        Script::new().stdout("Encoding: task 1 of 1, 80.00 %").close_streams(),
        SettingCatalog::new(),
        Arc::clone(&bus),
    );

    let (ra, rb) = tokio::join!(a.execute(command()), b.execute(command()));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_ne!(ra.attempt_id, rb.attempt_id);

    let events = drain(&mut rx);
    let progress_of = |id: AttemptId| -> Vec<u8> {
        events
            .iter()
            .filter(|e| e.attempt_id == id)
            .filter_map(|e| e.progress())
            .collect()
    };
    assert_eq!(progress_of(ra.attempt_id), vec![20]);
    assert_eq!(progress_of(rb.attempt_id), vec![80]);
}
