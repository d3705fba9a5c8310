use push_relay::commands::stop;

use relay_core::config::RelayConfig;
use relay_core::pipe::{Rendezvous, listen};
use relay_core::protocol::{Inbound, PipeCommand, decode};

use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn scratch_config(dir: &TempDir, title: &str) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.app.title = title.to_string();
    config.app.state_dir = Some(dir.path().to_path_buf());
    config.app.runtime_dir = Some(dir.path().to_path_buf());
    config
}

/// **VALUE**: `push-relay stop` with nothing running is a success.
///
/// **WHY THIS MATTERS**: Logout scripts call stop unconditionally; failing
/// when the worker already exited would break them.
#[tokio::test]
async fn given_no_worker_when_stop_runs_then_succeeds() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let config = scratch_config(&dir, "StopNobody");

    // WHEN
    let result = stop::run(&config).await;

    // THEN
    assert!(result.is_ok(), "Nothing to stop should succeed: {result:?}");
}

/// **VALUE**: The stop command reaches a listening worker as StopService.
///
/// **BUG THIS CATCHES**: Sending stop to the controller endpoint, or as a
/// protocol message the legacy worker build would not understand.
#[tokio::test]
async fn given_listening_worker_when_stop_runs_then_stop_service_delivered() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let config = scratch_config(&dir, "StopListening");
    let rendezvous = Rendezvous::new("StopListening", dir.path());
    let (sink, mut inbox) = mpsc::channel(4);
    let _server = listen(rendezvous.worker(), sink).await.unwrap();

    // WHEN
    let result = stop::run(&config).await;

    // THEN
    assert!(result.is_ok());
    let frame = timeout(Duration::from_secs(5), inbox.recv())
        .await
        .expect("worker should receive a frame")
        .unwrap();
    assert!(matches!(
        decode(&frame).unwrap(),
        Inbound::Legacy {
            command: PipeCommand::StopService,
            ..
        }
    ));
}
