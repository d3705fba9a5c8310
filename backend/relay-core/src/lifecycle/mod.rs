//! Worker lifecycle: find, spawn, hand off, clean up.
//!
//! One worker slot moves through Absent, Spawning, Handshaking and Ready.
//! The pipe probe is the only authority on whether a worker is alive; the
//! liveness record is consulted only to kill a stale holder before a
//! replacement is launched.
//!
//! # Guards
//!
//! - `spawning` is taken with a compare-and-set so concurrent callers never
//!   both launch a process. Losers get [`WorkerStatus::InProgress`].
//! - `attempts` counts launches without a completed handshake. It survives
//!   handshake timeouts and is only reset by [`WorkerLifecycle::mark_ready`],
//!   so a crash-looping worker stops being respawned after
//!   [`MAX_SPAWN_ATTEMPTS`].

pub mod launch;
pub mod process;
pub mod record;
pub mod spawn;

pub use launch::{LaunchMode, worker_args};
pub use record::LivenessRecord;
pub use spawn::{ProcessLauncher, WorkerLauncher};

use crate::error::spawn::SpawnError;
use crate::lifecycle::process::{is_worker_process, terminate_pid};
use crate::pipe::{PipeEndpoint, Rendezvous, probe_liveness};
use crate::settings::Settings;

use common::ErrorLocation;

use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{debug, error, info, warn};

pub const MAX_SPAWN_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// A worker answered the probe.
    Running,
    /// A new worker was launched and must now complete the handshake.
    Spawned(u32),
    /// Another caller is already spawning.
    InProgress,
}

pub struct WorkerLifecycle {
    worker_endpoint: PipeEndpoint,
    record: LivenessRecord,
    launcher: Arc<dyn WorkerLauncher>,
    spawning: AtomicBool,
    initialized: AtomicBool,
    attempts: AtomicU32,
}

impl WorkerLifecycle {
    /// `attempts` seeds the retry counter, normally from our own `$cout:`.
    pub fn new(
        rendezvous: &Rendezvous,
        record: LivenessRecord,
        launcher: Arc<dyn WorkerLauncher>,
        attempts: u32,
    ) -> Self {
        Self {
            worker_endpoint: rendezvous.worker(),
            record,
            launcher,
            spawning: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            attempts: AtomicU32::new(attempts),
        }
    }

    pub fn record(&self) -> &LivenessRecord {
        &self.record
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    pub fn is_spawning(&self) -> bool {
        self.spawning.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub async fn probe_liveness(&self) -> bool {
        probe_liveness(&self.worker_endpoint).await
    }

    /// Make sure a worker exists, launching one if the probe finds none.
    ///
    /// # Errors
    ///
    /// * [`SpawnError::Limit`] - [`MAX_SPAWN_ATTEMPTS`] launches have not produced a ready worker
    /// * [`SpawnError::Spawn`] - The OS refused to start the process
    pub async fn ensure_worker(&self, settings: &Settings) -> Result<WorkerStatus, SpawnError> {
        if self.probe_liveness().await {
            debug!("Worker answered on {}", self.worker_endpoint);
            self.initialized.store(true, Ordering::Release);
            return Ok(WorkerStatus::Running);
        }

        if self
            .spawning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Worker spawn already in progress");
            return Ok(WorkerStatus::InProgress);
        }

        self.initialized.store(false, Ordering::Release);

        match self.spawn(settings).await {
            Ok(pid) => Ok(WorkerStatus::Spawned(pid)),
            Err(e) => {
                self.spawning.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Handshake completed: release the guard and reset the retry budget.
    pub fn mark_ready(&self) {
        self.spawning.store(false, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
        self.attempts.store(0, Ordering::Release);
    }

    /// Handshake timed out: release the guard so a later call can retry.
    pub fn mark_failed(&self) {
        self.spawning.store(false, Ordering::Release);
        self.initialized.store(false, Ordering::Release);
    }

    async fn spawn(&self, settings: &Settings) -> Result<u32, SpawnError> {
        let attempts = self.attempts();
        if attempts >= MAX_SPAWN_ATTEMPTS {
            error!("Worker spawn abandoned after {attempts} attempts");
            return Err(SpawnError::Limit {
                attempts,
                location: ErrorLocation::from(Location::caller()),
            });
        }

        self.clear_stale_worker().await;

        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        let args = worker_args(settings, attempt).map_err(|e| SpawnError::Spawn {
            message: format!("Failed to encode worker settings: {e}"),
            location: ErrorLocation::from(Location::caller()),
            source: Box::new(e),
        })?;

        let pid = self.launcher.launch(&args)?;
        info!("Spawned worker PID {pid} (attempt {attempt}/{MAX_SPAWN_ATTEMPTS})");
        Ok(pid)
    }

    async fn clear_stale_worker(&self) {
        let Some(pid) = self.record.read() else {
            return;
        };

        if pid == std::process::id() {
            self.record.clear();
            return;
        }

        let outcome = tokio::task::spawn_blocking(move || {
            is_worker_process(pid).then(|| terminate_pid(pid))
        })
        .await;

        match outcome {
            Ok(Some(true)) => info!("Terminated stale worker PID {pid}"),
            Ok(Some(false)) => warn!("Stale worker PID {pid} could not be terminated"),
            Ok(None) => debug!("Liveness record PID {pid} is not a running worker"),
            Err(e) => warn!("Stale worker check for PID {pid} failed: {e}"),
        }

        self.record.clear();
    }
}
