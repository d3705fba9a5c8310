//! Toast notifications shown when no foreground process takes a message.

use log::info;
use serde::Deserialize;

/// Desktop notification surface.
pub trait NotificationSink: Send + Sync {
    /// Register the app identity toasts are attributed to.
    fn register(&self, bundle_id: &str, display_name: &str, icon_path: &str) -> bool;

    /// Show a toast. `argument` comes back through activation unchanged.
    fn show(&self, title: &str, body: &str, argument: &str) -> bool;
}

/// Writes notifications to the log instead of the desktop.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn register(&self, bundle_id: &str, display_name: &str, _icon_path: &str) -> bool {
        info!("Notification identity: {display_name} ({bundle_id})");
        true
    }

    fn show(&self, title: &str, body: &str, _argument: &str) -> bool {
        info!("Notification: {title}: {body}");
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Notification {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "Subtitle", default)]
    pub subtitle: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Notification")]
    notification: Notification,
}

impl Notification {
    /// Extract the `Notification` object from an upstream message, if any.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str::<Envelope>(text)
            .ok()
            .map(|envelope| envelope.notification)
    }

    /// Body text with the subtitle, when present, on its own first line.
    pub fn display_body(&self) -> String {
        match self.subtitle.as_deref() {
            Some(subtitle) if !subtitle.is_empty() => format!("{subtitle}\n{}", self.body),
            _ => self.body.clone(),
        }
    }
}
