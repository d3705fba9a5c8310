use crate::CHILD_MARKER;

use std::thread::sleep;
use std::time::Duration;

use backoff::{ExponentialBackoff, backoff::Backoff};
use log::{debug, trace, warn};
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

const KILL_VERIFY_MAX_ELAPSED: Duration = Duration::from_secs(2);

pub(crate) fn with_process<F, R>(pid: u32, f: F) -> Option<R>
where
    F: FnOnce(&Process) -> R,
{
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );

    sys.process(pid).map(f)
}

pub(crate) fn format_command(process: &Process) -> String {
    process
        .cmd()
        .iter()
        .map(|s| s.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `pid` is alive.
pub fn is_alive(pid: u32) -> bool {
    with_process(pid, |_| true).unwrap_or(false)
}

/// Whether `pid` is alive and was launched with the worker marker.
///
/// Guards against killing an unrelated process that inherited a recycled
/// pid from an old liveness record.
pub fn is_worker_process(pid: u32) -> bool {
    with_process(pid, |p| {
        let is_worker = p
            .cmd()
            .get(1)
            .is_some_and(|arg| arg.to_string_lossy() == CHILD_MARKER);
        trace!("PID {pid} command: {}", format_command(p));
        is_worker
    })
    .unwrap_or(false)
}

/// Force-kill `pid` and wait for it to disappear.
///
/// Refuses pid 0, pid 1 and the calling process. Blocks for up to two
/// seconds, so call it from a blocking context.
///
/// # Returns
///
/// * `true` - The process is gone
/// * `false` - The process was not found, refused, or survived the kill
pub fn terminate_pid(pid: u32) -> bool {
    if pid <= 1 || pid == std::process::id() {
        warn!("Refusing to terminate PID {pid}");
        return false;
    }

    let killed = with_process(pid, |p| {
        let killed = p.kill();
        debug!("Sent kill to PID {pid}: success={killed}");
        killed
    })
    .unwrap_or_else(|| {
        debug!("Process {pid} not found");
        false
    });

    if !killed {
        return false;
    }

    let mut backoff = ExponentialBackoff {
        max_elapsed_time: Some(KILL_VERIFY_MAX_ELAPSED),
        ..Default::default()
    };

    loop {
        if !is_alive(pid) {
            debug!("Process {pid} terminated");
            return true;
        }

        match backoff.next_backoff() {
            Some(duration) => {
                trace!("Process {pid} still alive, retrying after {duration:?}");
                sleep(duration);
            }
            None => {
                warn!("Process {pid} still running after {KILL_VERIFY_MAX_ELAPSED:?}");
                return false;
            }
        }
    }
}
