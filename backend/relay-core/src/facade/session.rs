//! State shared by every façade entry point.

use crate::facade::types::InboundMessage;
use crate::settings::Settings;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use tokio::sync::RwLock;

/// Receiver of the upward `OnMessage` event.
pub trait EventSink: Send + Sync {
    fn on_message(&self, message: InboundMessage);
}

pub struct Session {
    settings: RwLock<Settings>,
    events: Arc<dyn EventSink>,
    api_ready: AtomicBool,
    pending: Mutex<Option<InboundMessage>>,
}

impl Session {
    pub fn new(settings: Settings, events: Arc<dyn EventSink>) -> Self {
        Self {
            settings: RwLock::new(settings),
            events,
            api_ready: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Apply `change` under the write lock and return the result.
    pub async fn update<F>(&self, change: F) -> Settings
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.settings.write().await;
        change(&mut settings);
        settings.clone()
    }

    pub fn is_api_ready(&self) -> bool {
        self.api_ready.load(Ordering::Acquire)
    }

    /// Hand a message upward, or park it until the UI side is ready.
    ///
    /// Only the latest parked message is kept.
    pub fn deliver(&self, message: InboundMessage) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_api_ready() {
            drop(pending);
            self.events.on_message(message);
            return;
        }

        if pending.replace(message).is_some() {
            debug!("Replaced undelivered message");
        }
    }

    pub fn mark_api_ready(&self) {
        let parked = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            self.api_ready.store(true, Ordering::Release);
            pending.take()
        };

        if let Some(message) = parked {
            self.events.on_message(message);
        }
    }
}
