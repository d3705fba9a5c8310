use relay_core::CHILD_MARKER;
use relay_core::lifecycle::process::{is_alive, is_worker_process, terminate_pid};

use std::fs::write;
use std::process::{Child, Command};
use std::thread::{JoinHandle, spawn};

use serial_test::serial;
use tempfile::TempDir;

// ============================================================================
// Process scans for the liveness record's stale-holder path.
// These read the live process table, so they run one at a time.
// ============================================================================

/// Keeps the child reaped once it dies, so it does not linger as a zombie.
fn reaped(mut child: Child) -> (u32, JoinHandle<()>) {
    let pid = child.id();
    let reaper = spawn(move || {
        let _ = child.wait();
    });
    (pid, reaper)
}

/// A shell whose argv[1] is the worker marker, like a spawned worker.
#[cfg(unix)]
fn fake_worker(dir: &TempDir) -> (u32, JoinHandle<()>) {
    write(dir.path().join(CHILD_MARKER), "while :; do sleep 1; done\n").unwrap();
    let child = Command::new("sh")
        .arg(CHILD_MARKER)
        .current_dir(dir.path())
        .spawn()
        .unwrap();
    reaped(child)
}

#[test]
#[serial]
fn given_own_pid_when_checked_then_alive_but_not_a_worker() {
    // GIVEN
    let pid = std::process::id();

    // WHEN / THEN
    assert!(is_alive(pid));
    assert!(!is_worker_process(pid), "The test runner has no worker marker");
}

#[test]
#[serial]
fn given_nonexistent_pid_when_checked_then_dead_and_not_killable() {
    // GIVEN
    let fake_pid = u32::MAX;

    // WHEN / THEN
    assert!(!is_alive(fake_pid));
    assert!(!is_worker_process(fake_pid));
    assert!(!terminate_pid(fake_pid), "Nothing to kill should report false");
}

/// **VALUE**: The kill path refuses init and the calling process.
///
/// **BUG THIS CATCHES**: A liveness record holding 1 or our own pid (a
/// recycled or corrupted record) taking down the system or the controller.
#[test]
#[serial]
fn given_pid_1_or_self_when_terminate_called_then_refuses() {
    assert!(!terminate_pid(1));
    assert!(!terminate_pid(std::process::id()));
    assert!(is_alive(std::process::id()));
}

/// **VALUE**: A process launched with the worker marker is recognized and
/// can be killed, and the kill waits until it is really gone.
///
/// **WHY THIS MATTERS**: This is how a stale worker that stopped answering
/// its endpoint is cleared before a replacement is launched.
///
/// **BUG THIS CATCHES**: Reading the marker from the wrong argv slot, or
/// reporting success while the process is still running.
#[cfg(unix)]
#[test]
#[serial]
fn given_marked_process_when_terminated_then_recognized_and_gone() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let (pid, reaper) = fake_worker(&dir);
    assert!(is_alive(pid));
    assert!(is_worker_process(pid), "argv[1] carries the worker marker");

    // WHEN
    let terminated = terminate_pid(pid);

    // THEN
    assert!(terminated);
    assert!(!is_alive(pid));
    reaper.join().unwrap();
}

#[cfg(unix)]
#[test]
#[serial]
fn given_unmarked_process_when_checked_then_not_a_worker() {
    // GIVEN
    let (pid, reaper) = reaped(Command::new("sleep").arg("30").spawn().unwrap());

    // WHEN / THEN
    assert!(is_alive(pid));
    assert!(!is_worker_process(pid));

    assert!(terminate_pid(pid));
    reaper.join().unwrap();
}
