use super::{
    EXIT_FAILURES, EXIT_OK, EXIT_SETUP, Pipeline, RunOptions, RunPhase, RunState, exit_code, feed,
};
use crate::config::Settings;
use crate::delivery::memory::MemoryTransport;
use crate::delivery::DeliveryClient;
use crate::persistence::Ledger;
use crate::source::SourceDir;
use crate::utils::PipelineError;
use std::collections::HashSet;
use std::convert::Infallible;
use std::fs;
use std::future::{pending, ready};
use std::path::Path;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

fn image_dir(names: &[&str]) -> TempDir {
    let dir = tempdir().unwrap();
    for name in names {
        fs::write(dir.path().join(name), format!("image data for {name}")).unwrap();
    }
    dir
}

fn options(max_in_flight: usize) -> RunOptions {
    RunOptions {
        topic: "imgtest".into(),
        max_in_flight,
        drain_timeout: Duration::from_secs(2),
        interrupt_drain_timeout: Duration::from_millis(50),
        stall_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(1),
    }
}

fn pipeline(
    options: RunOptions,
    script: impl FnOnce(MemoryTransport) -> MemoryTransport,
) -> Pipeline<MemoryTransport> {
    let (client, reports) = DeliveryClient::build(options.max_in_flight, |handle| {
        Ok::<_, Infallible>(script(MemoryTransport::new(handle)))
    })
    .unwrap();
    Pipeline::new(client, reports, options).unwrap()
}

fn settings_for(dir: &Path, max_in_flight: usize) -> Settings {
    let mut settings = Settings::default();
    settings.pipeline.source_dir = dir.to_str().unwrap().to_string();
    settings.pipeline.max_in_flight = max_in_flight;
    settings.pipeline.drain_timeout_secs = 2;
    settings.broker.poll_interval_ms = 1;
    settings.ledger.enabled = false;
    settings
}

#[test]
fn test_state_machine_accepts_the_normal_path() {
    let mut state = RunState::new();
    for phase in [
        RunPhase::Enumerating,
        RunPhase::Admitting,
        RunPhase::Draining,
        RunPhase::Completed,
    ] {
        state.advance(phase).unwrap();
    }
    assert!(state.phase().is_terminal());
    assert_eq!(state.history().len(), 5);
}

#[test]
fn test_state_machine_never_skips_draining() {
    for from in [RunPhase::Enumerating, RunPhase::Admitting] {
        for to in [RunPhase::Completed, RunPhase::CompletedWithFailures] {
            assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
        }
    }
    assert!(!RunPhase::Idle.can_transition_to(RunPhase::Draining));
    assert!(RunPhase::Enumerating.can_transition_to(RunPhase::Draining));

    let mut state = RunState::new();
    state.advance(RunPhase::Enumerating).unwrap();
    let err = state.advance(RunPhase::Completed).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    assert_eq!(state.phase(), RunPhase::Enumerating);
}

#[tokio::test]
async fn test_all_files_delivered_with_single_slot() {
    let dir = image_dir(&["a.png", "b.png", "c.png"]);
    let source = SourceDir::open(dir.path()).await.unwrap();
    let mut pipeline = pipeline(options(1), |t| t);

    let report = pipeline.run(&source, pending()).await.unwrap();

    assert_eq!(report.exit_code(), EXIT_OK);
    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.drain.delivered_count(), 3);
    assert_eq!(report.drain.failed_count(), 0);
    assert_eq!(report.drain.pending_count(), 0);
    assert_eq!(report.peak_in_flight, 1);
    assert_eq!(
        pipeline.state().history(),
        &[
            RunPhase::Idle,
            RunPhase::Enumerating,
            RunPhase::Admitting,
            RunPhase::Draining,
            RunPhase::Completed
        ]
    );
}

#[tokio::test]
async fn test_every_file_is_admitted_exactly_once() {
    let names: Vec<String> = (0..25).map(|i| format!("frame-{i:03}.png")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let dir = image_dir(&refs);
    let source = SourceDir::open(dir.path()).await.unwrap();
    let mut pipeline = pipeline(options(4), |t| t.delay_key("frame-003.png", Duration::from_millis(10)));

    let report = pipeline.run(&source, pending()).await.unwrap();

    let admitted = pipeline.client().transport().admitted();
    let admitted_set: HashSet<&str> = admitted.iter().map(String::as_str).collect();
    let source_set: HashSet<&str> = source.keys().collect();
    assert_eq!(admitted.len(), source.len());
    assert_eq!(admitted_set, source_set);
    assert!(report.peak_in_flight <= 4);
    assert_eq!(report.exit_code(), EXIT_OK);
}

#[tokio::test]
async fn test_failed_delivery_is_reported_by_key() {
    let dir = image_dir(&["a.png", "b.png", "c.png"]);
    let settings = settings_for(dir.path(), 1);

    let result = feed(
        &settings,
        None,
        |handle| Ok(MemoryTransport::new(handle).fail_key("b.png", "Broker: Unknown topic or partition")),
        None,
        pending(),
    )
    .await;

    assert_eq!(exit_code(&result), EXIT_FAILURES);
    let report = result.unwrap();
    assert_eq!(report.phase, RunPhase::CompletedWithFailures);
    assert_eq!(report.drain.delivered_count(), 2);
    assert_eq!(report.drain.failed_count(), 1);
    assert_eq!(report.drain.pending_count(), 0);
    assert_eq!(report.drain.failed[0].key, "b.png");
    assert!(report.to_string().contains("b.png: Broker: Unknown topic or partition"));
}

#[tokio::test]
async fn test_unreadable_directory_exits_before_connecting() {
    let dir = tempdir().unwrap();
    let settings = settings_for(&dir.path().join("missing"), 1);
    let mut connected = false;

    let result = feed(
        &settings,
        None,
        |handle| {
            connected = true;
            Ok(MemoryTransport::new(handle))
        },
        None,
        pending(),
    )
    .await;

    assert_eq!(exit_code(&result), EXIT_SETUP);
    assert!(matches!(result, Err(PipelineError::Source(_))));
    assert!(!connected);
}

#[tokio::test]
async fn test_zero_capacity_is_a_setup_error() {
    let dir = image_dir(&["a.png"]);
    let settings = settings_for(dir.path(), 0);

    let result = feed(&settings, None, |h| Ok(MemoryTransport::new(h)), None, pending()).await;
    assert_eq!(exit_code(&result), EXIT_SETUP);
}

#[tokio::test]
async fn test_withheld_callbacks_are_pending_after_drain_timeout() {
    let dir = image_dir(&["a.png", "b.png", "c.png"]);
    let source = SourceDir::open(dir.path()).await.unwrap();
    let mut opts = options(3);
    opts.drain_timeout = Duration::from_millis(100);
    let mut pipeline = pipeline(opts, |t| t.withhold_key("a.png").withhold_key("c.png"));

    let report = pipeline.run(&source, pending()).await.unwrap();

    assert_eq!(report.drain.pending, vec!["a.png", "c.png"]);
    assert_eq!(report.drain.delivered, vec!["b.png"]);
    assert_eq!(report.exit_code(), EXIT_FAILURES);
}

#[tokio::test]
async fn test_interrupt_before_start_still_drains() {
    let dir = image_dir(&["a.png", "b.png", "c.png"]);
    let source = SourceDir::open(dir.path()).await.unwrap();
    let mut pipeline = pipeline(options(2), |t| t);

    let report = pipeline.run(&source, ready(())).await.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.unsent, vec!["a.png", "b.png", "c.png"]);
    assert_eq!(report.phase, RunPhase::CompletedWithFailures);
    assert!(pipeline.state().history().contains(&RunPhase::Draining));
    assert!(pipeline.client().transport().admitted().is_empty());
}

#[tokio::test]
async fn test_interrupt_while_waiting_for_capacity() {
    let dir = image_dir(&["a.png", "b.png", "c.png"]);
    let source = SourceDir::open(dir.path()).await.unwrap();
    let ledger_dir = tempdir().unwrap();
    let ledger = Ledger::open(ledger_dir.path().to_str().unwrap()).unwrap();
    let mut pipeline =
        pipeline(options(1), |t| t.withhold_key("a.png")).with_ledger(ledger.clone());

    let shutdown = tokio::time::sleep(Duration::from_millis(50));
    let report = pipeline.run(&source, shutdown).await.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.drain.pending, vec!["a.png"]);
    assert_eq!(report.unsent, vec!["b.png", "c.png"]);
    assert_eq!(pipeline.client().transport().admitted(), vec!["a.png"]);
    assert_eq!(report.exit_code(), EXIT_FAILURES);
    assert!(report.to_string().contains("not sent   c.png"));

    let retry_keys = ledger.retry_keys("imgtest").unwrap();
    assert_eq!(
        retry_keys,
        HashSet::from(["a.png".to_string(), "b.png".to_string(), "c.png".to_string()])
    );
}

#[tokio::test]
async fn test_interrupt_while_draining_cuts_the_wait_short() {
    let dir = image_dir(&["a.png", "b.png"]);
    let source = SourceDir::open(dir.path()).await.unwrap();
    let mut opts = options(2);
    opts.drain_timeout = Duration::from_secs(30);
    let mut pipeline = pipeline(opts, |t| t.withhold_key("a.png"));

    let shutdown = tokio::time::sleep(Duration::from_millis(50));
    let report = pipeline.run(&source, shutdown).await.unwrap();

    assert!(report.interrupted);
    assert!(report.unsent.is_empty());
    assert_eq!(report.drain.delivered, vec!["b.png"]);
    assert_eq!(report.drain.pending, vec!["a.png"]);
    assert!(report.elapsed < Duration::from_secs(5));
    assert_eq!(report.exit_code(), EXIT_FAILURES);
}

#[tokio::test]
async fn test_stalled_admission_aborts_into_draining() {
    let dir = image_dir(&["a.png", "b.png"]);
    let source = SourceDir::open(dir.path()).await.unwrap();
    let mut opts = options(1);
    opts.stall_timeout = Duration::from_millis(50);
    opts.drain_timeout = Duration::from_millis(50);
    let ledger_dir = tempdir().unwrap();
    let ledger = Ledger::open(ledger_dir.path().to_str().unwrap()).unwrap();
    let mut pipeline = pipeline(opts, |t| t.withhold_key("a.png")).with_ledger(ledger.clone());

    let report = pipeline.run(&source, pending()).await.unwrap();

    assert!(report.aborted.as_deref().unwrap().contains("admission stalled"));
    assert_eq!(report.drain.pending, vec!["a.png"]);
    assert_eq!(report.unsent, vec!["b.png"]);
    assert_eq!(report.phase, RunPhase::CompletedWithFailures);
    assert!(report.to_string().contains("not sent   b.png"));

    let retry_keys = ledger.retry_keys("imgtest").unwrap();
    assert_eq!(
        retry_keys,
        HashSet::from(["a.png".to_string(), "b.png".to_string()])
    );
}

#[tokio::test]
async fn test_rejected_message_is_recorded_and_run_continues() {
    let dir = image_dir(&["a.png", "b.png", "c.png"]);
    let source = SourceDir::open(dir.path()).await.unwrap();
    let mut pipeline = pipeline(options(2), |t| t.reject_key("b.png", "Message size too large"));

    let report = pipeline.run(&source, pending()).await.unwrap();

    assert_eq!(report.drain.delivered_count(), 2);
    assert_eq!(report.drain.failed[0].key, "b.png");
    assert!(report.aborted.is_none());
    assert_eq!(report.exit_code(), EXIT_FAILURES);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_file_is_reported_and_skipped() {
    let dir = image_dir(&["a.png", "c.png"]);
    std::os::unix::fs::symlink(dir.path().join("gone.png"), dir.path().join("b.png")).unwrap();
    let source = SourceDir::open(dir.path()).await.unwrap();
    let mut pipeline = pipeline(options(2), |t| t);

    let report = pipeline.run(&source, pending()).await.unwrap();

    assert_eq!(report.drain.delivered_count(), 2);
    assert_eq!(report.read_failures.len(), 1);
    assert_eq!(report.read_failures[0].key, "b.png");
    assert_eq!(report.exit_code(), EXIT_FAILURES);
}

#[tokio::test]
async fn test_retry_resends_only_failed_keys() {
    let dir = image_dir(&["a.png", "b.png", "c.png"]);
    let ledger_dir = tempdir().unwrap();
    let ledger = Ledger::open(ledger_dir.path().to_str().unwrap()).unwrap();
    let settings = settings_for(dir.path(), 2);

    let first = feed(
        &settings,
        None,
        |h| Ok(MemoryTransport::new(h).fail_key("b.png", "Broker: Request timed out")),
        Some(ledger.clone()),
        pending(),
    )
    .await
    .unwrap();
    assert_eq!(first.exit_code(), EXIT_FAILURES);

    let retry_keys = ledger.retry_keys("imgtest").unwrap();
    assert_eq!(retry_keys, HashSet::from(["b.png".to_string()]));

    let second = feed(
        &settings,
        Some(&retry_keys),
        |h| Ok(MemoryTransport::new(h)),
        Some(ledger.clone()),
        pending(),
    )
    .await
    .unwrap();

    assert_eq!(second.exit_code(), EXIT_OK);
    assert_eq!(second.drain.delivered, vec!["b.png"]);
    assert!(ledger.retry_keys("imgtest").unwrap().is_empty());
}

#[tokio::test]
async fn test_second_run_on_same_pipeline_is_rejected() {
    let dir = image_dir(&["a.png"]);
    let source = SourceDir::open(dir.path()).await.unwrap();
    let mut pipeline = pipeline(options(1), |t| t);

    pipeline.run(&source, pending()).await.unwrap();
    let err = pipeline.run(&source, pending()).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    assert_eq!(exit_code(&Err(err)), EXIT_FAILURES);
}
