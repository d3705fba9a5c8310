//! Process-wide logging for both push-relay roles.
//!
//! Colored stdout, a per-role log file, and an error-only crash log that is
//! appended to and never rotated.

use crate::error::RelayError;

use common::ErrorLocation;

use relay_core::{APP_NAME, CRASH_LOG_FILE};

use std::io::stdout;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use fern::Dispatch;
use fern::colors::Color::{Blue, Green, Magenta, Red, Yellow};
use fern::colors::ColoredLevelConfig;
use humantime::format_rfc3339;
use log::{LevelFilter, info, warn};

/// Thread-safe initialization guard.
static INIT_LOGGER_ONCE: Once = Once::new();

/// Tracks if logger initialization was already attempted.
static LOGGER_ALREADY_CALLED: AtomicBool = AtomicBool::new(false);

/// Closes every block appended to the crash log.
pub const CRASH_BLOCK_END: &str = "================ end ========";

const LOGGER_INITIALIZED_MESSAGE_PREFIX: &str = "Logger initialized with level: ";

const LOGGER_ALREADY_INITIALIZED_MESSAGE: &str = "Logger already initialized";

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Which process is logging; the roles write to separate files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRole {
    Controller,
    Worker,
}

impl LogRole {
    pub fn file_name(self) -> &'static str {
        match self {
            LogRole::Controller => "push-relay.log",
            LogRole::Worker => "push-relay-worker.log",
        }
    }
}

/// `{data_local_dir}/push-relay/logs`.
#[track_caller]
pub fn default_log_dir() -> Result<PathBuf, RelayError> {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_NAME).join("logs"))
        .ok_or_else(|| RelayError::Startup {
            message: "Failed to resolve the local data directory".to_string(),
            location: ErrorLocation::from(Location::caller()),
        })
}

/// Initialize the logger.
///
/// Safe to call more than once: later calls log a warning and return Ok.
///
/// # Errors
///
/// Returns an error if:
/// - The log file or crash log cannot be opened
/// - A global logger was already installed by someone else
pub fn initialize(role: LogRole, log_dir: &Path, crash_dir: &Path) -> Result<(), RelayError> {
    if LOGGER_ALREADY_CALLED.swap(true, Ordering::SeqCst) {
        warn!("{LOGGER_ALREADY_INITIALIZED_MESSAGE}");
        return Ok(());
    }

    let mut result = Ok(());

    INIT_LOGGER_ONCE.call_once(|| {
        result = initialize_internal(role, log_dir, crash_dir);
        if result.is_ok() {
            info!("{LOGGER_INITIALIZED_MESSAGE_PREFIX}{LOG_LEVEL:?} ({role:?})");
        }
    });

    result
}

#[track_caller]
fn initialize_internal(role: LogRole, log_dir: &Path, crash_dir: &Path) -> Result<(), RelayError> {
    let color_configuration = ColoredLevelConfig::new()
        .debug(Blue)
        .info(Green)
        .warn(Yellow)
        .error(Red)
        .trace(Magenta);

    let base_dispatch = Dispatch::new().level(LOG_LEVEL);

    let stdout_dispatch = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{date} - {level}] {message} [{file}:{line}]",
                date = format_rfc3339(SystemTime::now()),
                level = color_configuration.color(record.level()),
                message = message,
                file = record.file().unwrap_or("unknown"),
                line = record.line().unwrap_or(0),
            ))
        })
        .chain(stdout());

    let file_dispatch = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{date} - {level}] {message} [{file}:{line}]",
                date = format_rfc3339(SystemTime::now()),
                level = record.level(),
                message = message,
                file = record.file().unwrap_or("unknown"),
                line = record.line().unwrap_or(0)
            ))
        })
        .chain(open_log_file(&log_dir.join(role.file_name()))?);

    // One block per error record
    let crash_dispatch = Dispatch::new()
        .level(LevelFilter::Error)
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{date}] {message} [{file}:{line}]\n{CRASH_BLOCK_END}",
                date = format_rfc3339(SystemTime::now()),
                message = message,
                file = record.file().unwrap_or("unknown"),
                line = record.line().unwrap_or(0)
            ))
        })
        .chain(open_log_file(&crash_dir.join(CRASH_LOG_FILE))?);

    base_dispatch
        .chain(stdout_dispatch)
        .chain(file_dispatch)
        .chain(crash_dispatch)
        .apply()
        .map_err(|e| RelayError::Startup {
            message: format!("Failed to initialize logger: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

    Ok(())
}

#[track_caller]
fn open_log_file(path: &Path) -> Result<std::fs::File, RelayError> {
    fern::log_file(path).map_err(|e| RelayError::Startup {
        message: format!("Failed to open log file {}: {e}", path.display()),
        location: ErrorLocation::from(Location::caller()),
    })
}
