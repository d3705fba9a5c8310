//! Stable machine identifier used in the register payload.

use crate::error::settings::SettingsError;

use common::ErrorLocation;

use std::panic::Location;

use once_cell::sync::Lazy;
use regex::Regex;

#[cfg(not(windows))]
const MACHINE_ID_FILES: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

static BRACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[{}]").expect("valid regex pattern"));

/// Source of the device identifier reported to the relay.
pub trait DeviceIdentity: Send + Sync {
    fn machine_id(&self) -> Result<String, SettingsError>;
}

/// Reads the OS machine id (registry on Windows, machine-id file elsewhere).
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineIdentity;

impl DeviceIdentity for MachineIdentity {
    fn machine_id(&self) -> Result<String, SettingsError> {
        read_machine_id().map(|raw| normalize_machine_id(&raw))
    }
}

/// Fixed identifier, for hosts that manage their own device ids.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub String);

impl DeviceIdentity for StaticIdentity {
    fn machine_id(&self) -> Result<String, SettingsError> {
        Ok(normalize_machine_id(&self.0))
    }
}

pub fn normalize_machine_id(raw: &str) -> String {
    BRACES.replace_all(raw.trim(), "").into_owned()
}

#[cfg(not(windows))]
#[track_caller]
fn read_machine_id() -> Result<String, SettingsError> {
    for path in MACHINE_ID_FILES {
        if let Ok(contents) = std::fs::read_to_string(path)
            && !contents.trim().is_empty()
        {
            return Ok(contents);
        }
    }

    Err(SettingsError::Decode {
        message: format!("No machine id found in {MACHINE_ID_FILES:?}"),
        location: ErrorLocation::from(Location::caller()),
    })
}

#[cfg(windows)]
#[track_caller]
fn read_machine_id() -> Result<String, SettingsError> {
    use crate::pipe::win32::to_wide;

    use windows_sys::Win32::Foundation::ERROR_SUCCESS;
    use windows_sys::Win32::System::Registry::{
        HKEY_LOCAL_MACHINE, RRF_RT_REG_SZ, RRF_SUBKEY_WOW6464KEY, RegGetValueW,
    };

    let subkey = to_wide(r"SOFTWARE\Microsoft\SQMClient");
    let value = to_wide("MachineId");
    let mut buffer = [0u16; 128];
    let mut size = std::mem::size_of_val(&buffer) as u32;

    // SAFETY: both name buffers are null-terminated and outlive the call;
    // `size` holds the byte capacity of `buffer`.
    let status = unsafe {
        RegGetValueW(
            HKEY_LOCAL_MACHINE,
            subkey.as_ptr(),
            value.as_ptr(),
            RRF_RT_REG_SZ | RRF_SUBKEY_WOW6464KEY,
            std::ptr::null_mut(),
            buffer.as_mut_ptr().cast(),
            &mut size,
        )
    };

    if status != ERROR_SUCCESS {
        return Err(SettingsError::Decode {
            message: format!("Failed to read MachineId from registry (error {status})"),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    let chars = (size as usize / 2).saturating_sub(1);
    Ok(String::from_utf16_lossy(&buffer[..chars]))
}
