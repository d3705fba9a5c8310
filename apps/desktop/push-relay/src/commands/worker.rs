use crate::error::RelayError;

use relay_core::config::RelayConfig;
use relay_core::connection::WsUpstream;
use relay_core::notify::LogNotificationSink;
use relay_core::settings::Settings;
use relay_core::settings::identity::{DeviceIdentity, MachineIdentity};
use relay_core::worker::{Worker, WorkerOptions};

use std::sync::Arc;

use log::{info, warn};
use tokio::signal::ctrl_c;

/// Run as the background worker until its endpoint closes or Ctrl-C.
pub async fn run(config: &RelayConfig, settings: Settings) -> Result<(), RelayError> {
    let mut options = WorkerOptions::new(config.state_dir(), config.runtime_dir());
    options.timing = config.connection_timing();

    let device_id = MachineIdentity.machine_id().unwrap_or_else(|e| {
        warn!("Device id unavailable: {e}");
        String::new()
    });

    let mut worker = Worker::start(
        settings,
        options,
        WsUpstream,
        Arc::new(LogNotificationSink),
        device_id,
    )
    .await?;

    worker.announce_and_connect().await;

    tokio::select! {
        _ = worker.serve() => info!("Worker endpoint closed"),
        _ = ctrl_c() => info!("Worker shutdown requested"),
    }

    worker.shutdown().await;
    Ok(())
}
