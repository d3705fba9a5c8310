use crate::commands::build_facade;
use crate::error::RelayError;

use common::ErrorLocation;

use relay_core::config::RelayConfig;

use std::panic::Location;

use log::info;

/// `push-relay stop`: tell a running worker to drop its connection.
///
/// No worker at all counts as stopped.
pub async fn run(config: &RelayConfig) -> Result<(), RelayError> {
    let facade = build_facade(config, 0)?;

    if facade.stop().await {
        info!("Worker stopped");
        Ok(())
    } else {
        Err(RelayError::StopFailed {
            message: format!("Worker for {} is running but unreachable", config.app.title),
            location: ErrorLocation::from(Location::caller()),
        })
    }
}
