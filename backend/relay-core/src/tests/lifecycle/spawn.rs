use crate::lifecycle::spawn::build_spawn_command;

use std::fs::read_to_string;
use std::path::Path;

/// Process group id from `/proc/<pid>/stat`.
///
/// Fields after the command's closing paren are: state ppid pgrp session.
fn process_group_of(stat_path: &str) -> String {
    let stat = read_to_string(stat_path).unwrap();
    let (_, rest) = stat.rsplit_once(')').unwrap();
    rest.split_whitespace().nth(2).unwrap().to_string()
}

/// **VALUE**: The worker does not share the controller's process group.
///
/// **WHY THIS MATTERS**: The worker outlives the controller. Ctrl-C in the
/// controller's terminal is delivered to the whole foreground group.
///
/// **BUG THIS CATCHES**: A terminal interrupt aimed at the controller also
/// killing the long-lived worker.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn given_spawned_worker_when_inspected_then_runs_in_its_own_process_group() {
    // GIVEN
    let args = vec!["5".to_string()];
    let mut child = build_spawn_command(Path::new("/bin/sleep"), &args)
        .spawn()
        .unwrap();
    let pid = child.id().unwrap();

    // WHEN
    let worker_group = process_group_of(&format!("/proc/{pid}/stat"));
    let own_group = process_group_of("/proc/self/stat");

    // THEN
    assert_eq!(worker_group, pid.to_string(), "Worker leads its own group");
    assert_ne!(worker_group, own_group);

    child.kill().await.unwrap();
}
