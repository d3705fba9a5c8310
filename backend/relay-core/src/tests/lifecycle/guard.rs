use crate::lifecycle::{LivenessRecord, MAX_SPAWN_ATTEMPTS, WorkerLifecycle, WorkerStatus};
use crate::pipe::{PipeMessage, Rendezvous, listen};
use crate::tests::support::{CountingLauncher, relay_settings};

use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;

fn lifecycle(dir: &TempDir, launcher: Arc<CountingLauncher>, attempts: u32) -> (WorkerLifecycle, Rendezvous) {
    let rendezvous = Rendezvous::new("Acme", dir.path());
    let lifecycle = WorkerLifecycle::new(
        &rendezvous,
        LivenessRecord::in_dir(dir.path()),
        launcher,
        attempts,
    );
    (lifecycle, rendezvous)
}

/// **VALUE**: A worker that never completes its handshake is respawned at
/// most ten times.
///
/// **WHY THIS MATTERS**: A worker that crashes on startup would otherwise be
/// relaunched on every Initialize forever.
///
/// **BUG THIS CATCHES**: Resetting the counter on timeout instead of only on
/// a completed handshake.
#[tokio::test]
async fn given_failing_handshakes_when_ensure_worker_repeats_then_stops_after_limit() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(CountingLauncher::default());
    let (lifecycle, _) = lifecycle(&dir, launcher.clone(), 0);
    let settings = relay_settings();

    // WHEN
    for _ in 0..MAX_SPAWN_ATTEMPTS {
        let status = lifecycle.ensure_worker(&settings).await.unwrap();
        assert!(matches!(status, WorkerStatus::Spawned(_)));
        lifecycle.mark_failed();
    }
    let result = lifecycle.ensure_worker(&settings).await;

    // THEN
    let error = result.expect_err("eleventh spawn must be refused");
    assert!(error.is_limit());
    assert_eq!(launcher.launches(), MAX_SPAWN_ATTEMPTS);
    assert!(!lifecycle.is_spawning(), "Refusal must not leave the guard held");
}

#[tokio::test]
async fn given_inherited_counter_at_limit_when_ensure_worker_then_nothing_is_launched() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(CountingLauncher::default());
    let (lifecycle, _) = lifecycle(&dir, launcher.clone(), MAX_SPAWN_ATTEMPTS);

    // WHEN
    let result = lifecycle.ensure_worker(&relay_settings()).await;

    // THEN
    assert!(result.is_err_and(|e| e.is_limit()));
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn given_successful_handshake_when_marked_ready_then_counter_resets() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(CountingLauncher::default());
    let (lifecycle, _) = lifecycle(&dir, launcher.clone(), 5);

    // WHEN
    lifecycle.ensure_worker(&relay_settings()).await.unwrap();
    assert_eq!(lifecycle.attempts(), 6);
    lifecycle.mark_ready();

    // THEN
    assert_eq!(lifecycle.attempts(), 0);
    assert!(lifecycle.is_initialized());
    assert!(!lifecycle.is_spawning());
    assert_eq!(launcher.last_args().unwrap()[2], "$cout:6");
}

/// **VALUE**: Concurrent Initialize calls launch one worker.
///
/// **BUG THIS CATCHES**: Two controllers racing past the probe and both
/// spawning, leaving two workers holding relay connections.
#[tokio::test]
async fn given_spawn_in_progress_when_ensure_worker_called_again_then_reports_in_progress() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(CountingLauncher::default());
    let (lifecycle, _) = lifecycle(&dir, launcher.clone(), 0);
    let settings = relay_settings();
    let first = lifecycle.ensure_worker(&settings).await.unwrap();

    // WHEN
    let second = lifecycle.ensure_worker(&settings).await.unwrap();

    // THEN
    assert!(matches!(first, WorkerStatus::Spawned(_)));
    assert_eq!(second, WorkerStatus::InProgress);
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn given_worker_endpoint_answering_when_ensure_worker_then_running_without_launch() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(CountingLauncher::default());
    let (lifecycle, rendezvous) = lifecycle(&dir, launcher.clone(), 0);
    let (sink, _inbox) = mpsc::channel::<PipeMessage>(8);
    let _server = listen(rendezvous.worker(), sink).await.unwrap();

    // WHEN
    let status = lifecycle.ensure_worker(&relay_settings()).await.unwrap();

    // THEN
    assert_eq!(status, WorkerStatus::Running);
    assert_eq!(launcher.launches(), 0);
    assert!(lifecycle.is_initialized());
}

#[tokio::test]
async fn given_record_naming_non_worker_when_spawning_then_record_cleared_and_process_untouched() {
    // GIVEN: the record names this test process, which is not a worker
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(CountingLauncher::default());
    let (lifecycle, _) = lifecycle(&dir, launcher.clone(), 0);
    lifecycle.record().write(std::process::id()).unwrap();

    // WHEN
    let status = lifecycle.ensure_worker(&relay_settings()).await.unwrap();

    // THEN
    assert!(matches!(status, WorkerStatus::Spawned(_)));
    assert_eq!(lifecycle.record().read(), None);
}
