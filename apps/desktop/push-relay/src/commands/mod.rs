//! The three things the binary can be asked to do.

pub mod controller;
pub mod stop;
pub mod worker;

use crate::error::RelayError;

use relay_core::config::RelayConfig;
use relay_core::error::CoreError;
use relay_core::facade::{Collaborators, ControllerFacade, EventSink, FacadeConfig, InboundMessage};
use relay_core::lifecycle::ProcessLauncher;
use relay_core::notify::LogNotificationSink;
use relay_core::settings::identity::MachineIdentity;

use std::sync::Arc;

use log::info;

/// Stands in for the UI bridge when running headless.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn on_message(&self, message: InboundMessage) {
        info!(
            "OnMessage (from notification: {}): {}",
            message.from_notification, message.data
        );
    }
}

/// A façade that launches workers from this executable.
pub fn build_facade(config: &RelayConfig, retry: u32) -> Result<ControllerFacade, RelayError> {
    let launcher = ProcessLauncher::current_exe().map_err(CoreError::from)?;

    let mut facade_config =
        FacadeConfig::new(config.app.title.clone(), config.state_dir(), config.runtime_dir());
    facade_config.handshake = config.handshake_timing();
    if let Some(exe_dir) = launcher.program().parent() {
        facade_config.app_dir = exe_dir.to_path_buf();
    }

    let collaborators = Collaborators {
        launcher: Arc::new(launcher),
        identity: Arc::new(MachineIdentity),
        events: Arc::new(LogEventSink),
        notifier: Arc::new(LogNotificationSink),
    };

    Ok(ControllerFacade::new(facade_config, collaborators, retry))
}
