//! The Settings Record shared between controller and worker.
//!
//! The controller owns the authoritative copy; the worker receives it once
//! through its launch token and afterwards through `set_url` pushes. Field
//! names on the wire are kept stable so either side can be upgraded alone.

pub mod identity;

use crate::NOTIFICATION_SUFFIX;
use crate::error::settings::SettingsError;

use common::ErrorLocation;

use std::panic::Location;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const SCHEME_SECURE: &str = "wss";
const SCHEME_PLAIN: &str = "ws";
const REGISTER_MESSAGE_TYPE: &str = "register";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "appPid")]
    pub app_pid: u32,
    pub title: String,
    pub title_notification: String,
    #[serde(rename = "appBundle")]
    pub app_bundle: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "iconPath")]
    pub icon_path: String,
    #[serde(rename = "iconContent")]
    pub icon_content: String,
    pub host: String,
    pub port: u16,
    #[serde(rename = "systemType")]
    pub system_type: i64,
    #[serde(rename = "publicHasKey")]
    pub public_has_key: String,
    pub wss: bool,
    pub path: String,
    pub tcp: bool,
    pub connector_tag: String,
    pub connector_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPayload<'a> {
    message_type: &'static str,
    system_type: i64,
    sender: RegisterSender<'a>,
    data: Map<String, Value>,
}

#[derive(Serialize)]
struct RegisterSender<'a> {
    #[serde(rename = "connectorID")]
    connector_id: &'a str,
    #[serde(rename = "connectorTag")]
    connector_tag: &'a str,
    #[serde(rename = "deviceID")]
    device_id: &'a str,
}

impl Settings {
    pub fn new(title: impl Into<String>) -> Self {
        let mut settings = Self::default();
        settings.set_title(title);
        settings
    }

    /// Sets the app title and re-derives the notification title from it.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.title_notification = notification_title(&self.title);
    }

    /// Upstream address, `ws[s]://host:port/path`.
    pub fn uri(&self) -> String {
        let scheme = if self.wss { SCHEME_SECURE } else { SCHEME_PLAIN };
        let path = if self.path.is_empty() || self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{scheme}://{}:{}{path}", self.host, self.port)
    }

    /// JSON announcing this device to the relay.
    ///
    /// Empty when either half of the connector identity is missing; an empty
    /// payload means "connect but do not register".
    pub fn register_payload(&self, device_id: &str) -> String {
        if self.connector_id.is_empty() || self.connector_tag.is_empty() {
            return String::new();
        }

        let payload = RegisterPayload {
            message_type: REGISTER_MESSAGE_TYPE,
            system_type: self.system_type,
            sender: RegisterSender {
                connector_id: &self.connector_id,
                connector_tag: &self.connector_tag,
                device_id,
            },
            data: Map::new(),
        };

        serde_json::to_string(&payload).unwrap_or_else(|e| {
            warn!("Failed to serialize register payload: {e}");
            String::new()
        })
    }

    /// Base64 of the JSON record, safe to pass as a single command-line token.
    #[track_caller]
    pub fn encode_launch_token(&self) -> Result<String, SettingsError> {
        let json = serde_json::to_string(self).map_err(|e| SettingsError::Encode {
            message: format!("Failed to serialize settings: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;
        Ok(BASE64.encode(json))
    }

    /// Accepts either base64-of-JSON or plain JSON.
    #[track_caller]
    pub fn decode_launch_token(token: &str) -> Result<Self, SettingsError> {
        let token = token.trim();

        let json = match BASE64.decode(token) {
            Ok(bytes) => String::from_utf8(bytes).map_err(|e| SettingsError::Decode {
                message: format!("Launch token is not UTF-8: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?,
            Err(_) => {
                debug!("Launch token is not base64, trying plain JSON");
                token.to_string()
            }
        };

        let mut settings: Settings = serde_json::from_str(&json)?;
        let title = std::mem::take(&mut settings.title);
        settings.set_title(title);
        Ok(settings)
    }
}

pub fn notification_title(title: &str) -> String {
    format!("{title}{NOTIFICATION_SUFFIX}")
}
