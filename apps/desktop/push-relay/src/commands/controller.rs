use crate::commands::build_facade;
use crate::error::RelayError;

use common::ErrorLocation;

use relay_core::config::RelayConfig;

use std::panic::Location;

use log::{info, warn};
use tokio::signal::ctrl_c;

/// Run as the foreground app until Ctrl-C.
pub async fn run(config: &RelayConfig, retry: u32) -> Result<(), RelayError> {
    let facade = build_facade(config, retry)?;
    info!("Controller starting for {} (retry {retry})", config.app.title);

    let initialized = facade
        .initialize(
            config.app.system_type,
            Some(config.platform_settings()),
            config.connection_mode(),
        )
        .await?;
    if !initialized {
        warn!("Worker did not come up; continuing without one");
    }

    if let Some(user) = config.user() {
        if !facade.register_user(user).await {
            warn!("Failed to hand the user registration to the worker");
        }
    }

    facade.flutter_api_ready().await;
    info!("Device id: {}", facade.device_id().await);

    ctrl_c().await.map_err(|e| RelayError::Startup {
        message: format!("Failed to wait for Ctrl-C: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    info!("Controller shutting down");
    facade.shutdown().await;
    Ok(())
}
