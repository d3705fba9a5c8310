use crate::settings::Settings;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Placeholder stored when no relay key is configured.
pub const NO_PUBLIC_KEY: &str = "-";

const ASSET_DIR: [&str; 2] = ["data", "flutter_assets"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSettings {
    pub bundle_id: String,
    pub display_name: String,
    pub icon: String,
    pub icon_content: String,
}

impl PlatformSettings {
    /// Absolute icon path; `icon` is relative to the app's bundled assets.
    pub fn icon_path(&self, app_dir: &Path) -> PathBuf {
        ASSET_DIR
            .iter()
            .fold(app_dir.to_path_buf(), |path, segment| path.join(segment))
            .join(&self.icon)
    }

    pub fn apply(&self, settings: &mut Settings, app_dir: &Path) {
        settings.app_bundle = self.bundle_id.clone();
        settings.display_name = self.display_name.clone();
        settings.icon_path = self.icon_path(app_dir).to_string_lossy().into_owned();
        settings.icon_content = self.icon_content.clone();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Ws,
    Wss,
    Tcp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMode {
    pub host: String,
    pub port: u16,
    pub connection_type: ConnectionType,
    pub public_has_key: Option<String>,
    pub path: Option<String>,
}

impl ConnectionMode {
    pub fn apply(&self, settings: &mut Settings) {
        settings.host = self.host.clone();
        settings.port = self.port;
        settings.wss = self.connection_type == ConnectionType::Wss;
        settings.tcp = self.connection_type == ConnectionType::Tcp;
        settings.public_has_key = self
            .public_has_key
            .clone()
            .unwrap_or_else(|| NO_PUBLIC_KEY.to_string());
        settings.path = self.path.clone().unwrap_or_default();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub connector_id: String,
    pub connector_tag: String,
}

impl User {
    pub fn apply(&self, settings: &mut Settings) {
        settings.connector_id = self.connector_id.clone();
        settings.connector_tag = self.connector_tag.clone();
    }
}

/// Payload of the upward `OnMessage` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from_notification: bool,
    pub data: String,
}
