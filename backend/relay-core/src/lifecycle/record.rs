//! On-disk liveness record: `[process] pid = "0x<hex>"`.
//!
//! Written by the worker once it is up, read by the controller before it
//! decides to spawn. Anything unreadable is the same as no record.

use crate::LIVENESS_RECORD_FILE;
use crate::error::spawn::SpawnError;

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    process: ProcessSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProcessSection {
    pid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessRecord {
    path: PathBuf,
}

impl LivenessRecord {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(LIVENESS_RECORD_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[track_caller]
    pub fn write(&self, pid: u32) -> Result<(), SpawnError> {
        let contents = toml::to_string(&RecordFile {
            process: ProcessSection {
                pid: format!("{pid:#x}"),
            },
        })
        .map_err(|e| SpawnError::Record {
            message: format!("Failed to serialize liveness record: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SpawnError::Record {
                message: format!("Failed to create {}: {e}", parent.display()),
                location: ErrorLocation::from(Location::caller()),
            })?;
        }

        let temp_path = self.path.with_extension("ini.tmp");
        std::fs::write(&temp_path, contents).map_err(|e| SpawnError::Record {
            message: format!("Failed to write {}: {e}", temp_path.display()),
            location: ErrorLocation::from(Location::caller()),
        })?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| SpawnError::Record {
            message: format!("Failed to replace {}: {e}", self.path.display()),
            location: ErrorLocation::from(Location::caller()),
        })?;

        info!("Liveness record written: PID {pid} -> {}", self.path.display());
        Ok(())
    }

    pub fn read(&self) -> Option<u32> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("No liveness record at {}: {e}", self.path.display());
                return None;
            }
        };

        let record: RecordFile = match toml::from_str(&contents) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring unreadable liveness record {}: {e}", self.path.display());
                return None;
            }
        };

        parse_pid(&record.process.pid)
    }

    pub fn clear(&self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove {}: {e}", self.path.display());
        }
    }
}

fn parse_pid(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).ok().filter(|pid| *pid != 0)
}
