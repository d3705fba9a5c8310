// No console window for the background worker in release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use push_relay::commands;
use push_relay::error::RelayError;
use push_relay::logger::{LogRole, default_log_dir, initialize as LoggerInitialize};

use relay_core::CHILD_MARKER;
use relay_core::config::RelayConfig;
use relay_core::error::CoreError;
use relay_core::lifecycle::LaunchMode;

use common::ErrorLocation;

use std::env;
use std::fs::create_dir_all;
use std::panic::Location;
use std::path::Path;
use std::process::ExitCode;

use log::{error, info};

const STOP_COMMAND: &str = "stop";

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Vec<String>) -> Result<(), RelayError> {
    let role = match args.get(1).map(String::as_str) {
        Some(CHILD_MARKER) => LogRole::Worker,
        _ => LogRole::Controller,
    };

    // Log with default directories even when the config is unreadable
    let (config, load_error) = match load_config() {
        Ok(config) => (config, None),
        Err(e) => (RelayConfig::default(), Some(e)),
    };

    let log_dir = default_log_dir()?;
    let state_dir = config.state_dir();
    ensure_dir(&log_dir)?;
    ensure_dir(&state_dir)?;
    LoggerInitialize(role, &log_dir, &state_dir)?;

    if let Some(e) = load_error {
        return Err(e);
    }

    info!("push-relay {} starting as {role:?}", env!("CARGO_PKG_VERSION"));
    info!("Log directory: {}", log_dir.display());

    if args.get(1).map(String::as_str) == Some(STOP_COMMAND) {
        return commands::stop::run(&config).await;
    }

    match LaunchMode::parse(&args).map_err(CoreError::from)? {
        LaunchMode::Controller { retry } => commands::controller::run(&config, retry).await,
        LaunchMode::Worker { settings, .. } => commands::worker::run(&config, settings).await,
    }
}

fn load_config() -> Result<RelayConfig, RelayError> {
    let dir = RelayConfig::default_dir().map_err(CoreError::from)?;
    let config = RelayConfig::load(&dir).map_err(CoreError::from)?;
    config.validate().map_err(CoreError::from)?;
    Ok(config)
}

#[track_caller]
fn ensure_dir(dir: &Path) -> Result<(), RelayError> {
    create_dir_all(dir).map_err(|e| RelayError::Startup {
        message: format!("Failed to create {}: {e}", dir.display()),
        location: ErrorLocation::from(Location::caller()),
    })
}
