//! Launching the worker process image.

use crate::error::spawn::SpawnError;

use common::ErrorLocation;

use std::env::current_exe;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, info};
use tokio::process::Command as TokioCommand;

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Starts a worker process and reports its pid.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, args: &[String]) -> Result<u32, SpawnError>;
}

/// Re-executes a program image (normally the current executable) detached
/// from the caller's console and stdio.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[track_caller]
    pub fn current_exe() -> Result<Self, SpawnError> {
        let program = current_exe().map_err(|e| SpawnError::Spawn {
            message: format!("Failed to get current executable path: {e}"),
            location: ErrorLocation::from(Location::caller()),
            source: Box::new(e),
        })?;
        Ok(Self::new(program))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, args: &[String]) -> Result<u32, SpawnError> {
        debug!("Launching worker from {}", self.program.display());

        let child = build_spawn_command(&self.program, args)
            .spawn()
            .map_err(|e| SpawnError::Spawn {
                message: format!("Failed to spawn {}: {e}", self.program.display()),
                location: ErrorLocation::from(Location::caller()),
                source: Box::new(e),
            })?;

        let pid = child.id().ok_or_else(|| SpawnError::Spawn {
            message: "Worker exited before its PID could be read".to_string(),
            location: ErrorLocation::from(Location::caller()),
            source: Box::new(std::io::Error::other("no pid")),
        })?;

        info!("Worker launched (PID: {pid})");

        // The worker outlives us; dropping the handle does not kill it.
        drop(child);

        Ok(pid)
    }
}

pub(crate) fn build_spawn_command(program: &Path, args: &[String]) -> TokioCommand {
    let mut cmd = TokioCommand::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false);

    if let Some(dir) = program.parent().filter(|d| !d.as_os_str().is_empty()) {
        cmd.current_dir(dir);
    }

    #[cfg(windows)]
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);

    // Out of the controller's foreground group, so a terminal Ctrl-C
    // reaches the controller only
    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}
