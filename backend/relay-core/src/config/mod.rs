use crate::APP_NAME;
use crate::connection::ConnectionTiming;
use crate::error::config::ConfigError;
use crate::facade::types::{ConnectionMode, ConnectionType, PlatformSettings, User};
use crate::handshake::HandshakeTiming;

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_VERSION: u32 = 1;

// ============================================
// CONFIG STRUCTS
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub system_type: i64,
    pub state_dir: Option<PathBuf>,
    pub runtime_dir: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            title: default_title(),
            system_type: 0,
            state_dir: None,
            runtime_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSection {
    #[serde(default)]
    pub bundle_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub icon_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub scheme: ConnectionType,
    pub public_has_key: Option<String>,
    pub path: Option<String>,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            scheme: ConnectionType::default(),
            public_has_key: None,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSection {
    pub connector_id: Option<String>,
    pub connector_tag: Option<String>,
}

/// Timing overrides in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSection {
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub app: AppSection,

    #[serde(default)]
    pub platform: PlatformSection,

    #[serde(default)]
    pub connection: ConnectionSection,

    #[serde(default)]
    pub user: UserSection,

    #[serde(default)]
    pub timing: TimingSection,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            app: AppSection::default(),
            platform: PlatformSection::default(),
            connection: ConnectionSection::default(),
            user: UserSection::default(),
            timing: TimingSection::default(),
        }
    }
}

// ============================================
// DEFAULT FUNCTIONS
// ============================================

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_title() -> String {
    APP_NAME.to_string()
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_heartbeat_ms() -> u64 {
    5_000
}
fn default_pong_timeout_ms() -> u64 {
    45_000
}
fn default_reconnect_delay_ms() -> u64 {
    3_000
}
fn default_handshake_timeout_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}

// ============================================
// IMPLEMENTATION
// ============================================

impl RelayConfig {
    /// `{config_dir}/push-relay`, where `config.json` lives.
    #[track_caller]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_NAME))
            .ok_or_else(|| ConfigError::DirectoryNotFound {
                location: ErrorLocation::from(Location::caller()),
                reason: "No per-user config directory on this platform".to_string(),
            })
    }

    /// Load config from {config_dir}/config.json.
    ///
    /// # Returns
    ///
    /// Returns defaults if the file is missing.
    /// Returns `Err(ConfigError)` if the file exists but is corrupted or invalid.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            info!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Read {
            location: ErrorLocation::from(Location::caller()),
            path: config_path.clone(),
            source: e,
        })?;

        let config: RelayConfig = serde_json::from_str(&contents).map_err(|e| {
            warn!("Failed to parse config JSON: {e}");
            ConfigError::Parse {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        config.validate()?;

        info!("Config loaded from {}", config_path.display());
        Ok(config)
    }

    /// Save config to {config_dir}/config.json through a temp file and rename.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::Write {
            location: ErrorLocation::from(Location::caller()),
            path: config_dir.to_path_buf(),
            source: e,
        })?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let temp_path = config_dir.join(format!("{CONFIG_FILE_NAME}.tmp"));

        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize {
            location: ErrorLocation::from(Location::caller()),
            reason: e.to_string(),
        })?;

        std::fs::write(&temp_path, json).map_err(|e| ConfigError::Write {
            location: ErrorLocation::from(Location::caller()),
            path: temp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&temp_path, &config_path).map_err(|e| ConfigError::Write {
            location: ErrorLocation::from(Location::caller()),
            path: config_path.clone(),
            source: e,
        })?;

        info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version == 0 || self.version > CONFIG_VERSION {
            return Err(invalid(format!(
                "Invalid version: {} (expected 1-{CONFIG_VERSION})",
                self.version
            )));
        }

        let title = &self.app.title;
        if title.trim().is_empty() {
            return Err(invalid("app.title cannot be empty".to_string()));
        }
        if title.contains(['/', '\\']) {
            return Err(invalid(format!("app.title cannot contain path separators: {title}")));
        }

        if self.connection.host.trim().is_empty() {
            return Err(invalid("connection.host cannot be empty".to_string()));
        }
        if self.connection.port == 0 {
            return Err(invalid("connection.port must be 1-65535".to_string()));
        }

        let timing = &self.timing;
        for (name, value) in [
            ("heartbeat_ms", timing.heartbeat_ms),
            ("pong_timeout_ms", timing.pong_timeout_ms),
            ("reconnect_delay_ms", timing.reconnect_delay_ms),
            ("handshake_timeout_ms", timing.handshake_timeout_ms),
            ("connect_timeout_ms", timing.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(format!("timing.{name} must be non-zero")));
            }
        }

        Ok(())
    }

    // ============================================
    // VIEWS
    // ============================================

    /// Override, else `{data_local_dir}/push-relay`, else the temp dir.
    pub fn state_dir(&self) -> PathBuf {
        self.app.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_NAME)
        })
    }

    /// Where Unix socket endpoints are created.
    pub fn runtime_dir(&self) -> PathBuf {
        self.app.runtime_dir.clone().unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_NAME)
        })
    }

    pub fn platform_settings(&self) -> PlatformSettings {
        PlatformSettings {
            bundle_id: self.platform.bundle_id.clone(),
            display_name: self.platform.display_name.clone(),
            icon: self.platform.icon.clone(),
            icon_content: self.platform.icon_content.clone(),
        }
    }

    pub fn connection_mode(&self) -> ConnectionMode {
        ConnectionMode {
            host: self.connection.host.clone(),
            port: self.connection.port,
            connection_type: self.connection.scheme,
            public_has_key: self.connection.public_has_key.clone(),
            path: self.connection.path.clone(),
        }
    }

    /// The configured user, when both halves of the identity are present.
    pub fn user(&self) -> Option<User> {
        match (&self.user.connector_id, &self.user.connector_tag) {
            (Some(connector_id), Some(connector_tag)) => Some(User {
                connector_id: connector_id.clone(),
                connector_tag: connector_tag.clone(),
            }),
            _ => None,
        }
    }

    pub fn connection_timing(&self) -> ConnectionTiming {
        ConnectionTiming {
            heartbeat_interval: Duration::from_millis(self.timing.heartbeat_ms),
            pong_timeout: Duration::from_millis(self.timing.pong_timeout_ms),
            reconnect_delay: Duration::from_millis(self.timing.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.timing.connect_timeout_ms),
        }
    }

    pub fn handshake_timing(&self) -> HandshakeTiming {
        HandshakeTiming {
            timeout: Duration::from_millis(self.timing.handshake_timeout_ms),
            ..HandshakeTiming::default()
        }
    }
}

#[track_caller]
fn invalid(reason: String) -> ConfigError {
    ConfigError::Validation {
        location: ErrorLocation::from(Location::caller()),
        reason,
    }
}
