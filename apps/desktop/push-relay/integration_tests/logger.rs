use push_relay::logger::{CRASH_BLOCK_END, LogRole, initialize};

use relay_core::CRASH_LOG_FILE;

use std::fs::read_to_string;

use log::{error, info};
use tempfile::TempDir;

/// **VALUE**: Error records land in the crash log as closed blocks, and
/// lower levels stay out of it.
///
/// **WHY THIS MATTERS**: The crash log is the only trace a detached worker
/// leaves behind when it dies.
///
/// **BUG THIS CATCHES**: A crash dispatch without the Error level filter
/// (flooding the file), or one that drops the end marker.
#[test]
fn given_worker_logger_when_error_logged_then_crash_block_appended() {
    // GIVEN
    let logs = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    initialize(LogRole::Worker, logs.path(), state.path()).unwrap();

    // WHEN
    info!("routine line");
    error!("worker lost its endpoint");
    log::logger().flush();

    // THEN
    let crash = read_to_string(state.path().join(CRASH_LOG_FILE)).unwrap();
    assert!(crash.contains("worker lost its endpoint"));
    assert!(crash.contains(CRASH_BLOCK_END));
    assert!(!crash.contains("routine line"));

    let worker_log = read_to_string(logs.path().join("push-relay-worker.log")).unwrap();
    assert!(worker_log.contains("routine line"));
}
