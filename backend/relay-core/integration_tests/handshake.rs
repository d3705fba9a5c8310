use crate::helpers::{InProcessLauncher, RecordingSink, eventually, relay_settings, start_worker};

use relay_core::facade::{
    Collaborators, ConnectionMode, ConnectionType, ControllerFacade, FacadeConfig, PlatformSettings,
};
use relay_core::lifecycle::WorkerLauncher;
use relay_core::notify::LogNotificationSink;
use relay_core::settings::identity::StaticIdentity;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

const TITLE: &str = "Acme";

fn facade(dir: &Path, launcher: Arc<dyn WorkerLauncher>, sink: Arc<RecordingSink>) -> ControllerFacade {
    ControllerFacade::new(
        FacadeConfig::new(TITLE, dir, dir),
        Collaborators {
            launcher,
            identity: Arc::new(StaticIdentity("device-1".to_string())),
            events: sink,
            notifier: Arc::new(LogNotificationSink),
        },
        0,
    )
}

fn platform() -> Option<PlatformSettings> {
    Some(PlatformSettings {
        bundle_id: "com.acme.app".to_string(),
        display_name: "Acme".to_string(),
        icon: "icon.png".to_string(),
        icon_content: String::new(),
    })
}

fn mode(host: &str) -> ConnectionMode {
    ConnectionMode {
        host: host.to_string(),
        port: 4443,
        connection_type: ConnectionType::Wss,
        public_has_key: None,
        path: Some("/push".to_string()),
    }
}

/// **VALUE**: Cold start. With no worker running, Initialize spawns one,
/// completes the hello/hello_ack/set_url exchange and reports success.
///
/// **WHY THIS MATTERS**: This is the path every fresh login takes. If any
/// step is lost the app believes it is connected while nothing is.
///
/// **BUG THIS CATCHES**: Hello arriving before the controller listens,
/// set_url sent on the wrong endpoint, or the retry counter not reset after
/// a successful handshake.
#[tokio::test]
async fn given_no_worker_when_initialize_then_worker_spawned_configured_and_true() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(InProcessLauncher::new(dir.path().to_path_buf()));
    let facade = facade(dir.path(), launcher.clone(), Arc::new(RecordingSink::default()));

    // WHEN
    let ready = facade
        .initialize(2, platform(), mode("relay.example.com"))
        .await
        .expect("initialize should not hit the spawn limit");

    // THEN
    assert!(ready);
    assert_eq!(launcher.launches(), 1);
    assert_eq!(facade.lifecycle().attempts(), 0);
    assert!(facade.lifecycle().is_initialized());

    let configured = eventually(Duration::from_secs(5), async || {
        match launcher.connection() {
            Some(connection) => connection.settings().await.system_type == 2,
            None => false,
        }
    })
    .await;
    assert!(configured, "Worker should hold the controller's settings");

    facade.shutdown().await;
}

/// **VALUE**: Warm start. A running worker is reused and reconfigured.
///
/// **BUG THIS CATCHES**: Spawning a second worker when one already answers
/// the probe, which would leave two relay connections for one device.
#[tokio::test]
async fn given_running_worker_when_initialize_then_settings_pushed_without_spawn() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let worker = start_worker(
        relay_settings(TITLE),
        dir.path().to_path_buf(),
        Arc::new(LogNotificationSink),
    )
    .await;
    let launcher = Arc::new(InProcessLauncher::new(dir.path().to_path_buf()));
    let facade = facade(dir.path(), launcher.clone(), Arc::new(RecordingSink::default()));

    // WHEN
    let ready = facade
        .initialize(1, platform(), mode("new.example.com"))
        .await
        .unwrap();

    // THEN
    assert!(ready);
    assert_eq!(launcher.launches(), 0);
    let updated = eventually(Duration::from_secs(5), async || {
        worker.connection.settings().await.host == "new.example.com"
    })
    .await;
    assert!(updated);

    facade.shutdown().await;
}

#[tokio::test]
async fn given_running_worker_when_upstream_message_arrives_then_controller_event_sink_receives_it() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let worker = start_worker(
        relay_settings(TITLE),
        dir.path().to_path_buf(),
        Arc::new(LogNotificationSink),
    )
    .await;
    let sink = Arc::new(RecordingSink::default());
    let facade = facade(
        dir.path(),
        Arc::new(InProcessLauncher::new(dir.path().to_path_buf())),
        sink.clone(),
    );
    assert!(facade.initialize(1, platform(), mode("relay.example.com")).await.unwrap());
    facade.flutter_api_ready().await;
    assert!(eventually(Duration::from_secs(2), async || worker.upstream.opens() > 0).await);

    // WHEN
    worker.upstream.push_text(r#"{"Notification":{"Title":"t","Body":"b"}}"#);

    // THEN
    let received = eventually(Duration::from_secs(5), async || !sink.messages().is_empty()).await;
    assert!(received);
    let message = &sink.messages()[0];
    assert!(!message.from_notification);
    assert!(message.data.contains("Notification"));

    facade.shutdown().await;
}

#[tokio::test]
async fn given_running_worker_when_facade_stops_then_worker_connection_stopped() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let worker = start_worker(
        relay_settings(TITLE),
        dir.path().to_path_buf(),
        Arc::new(LogNotificationSink),
    )
    .await;
    let facade = facade(
        dir.path(),
        Arc::new(InProcessLauncher::new(dir.path().to_path_buf())),
        Arc::new(RecordingSink::default()),
    );
    assert!(eventually(Duration::from_secs(2), async || worker.upstream.opens() > 0).await);

    // WHEN
    let stopped = facade.stop().await;

    // THEN
    assert!(stopped);
    let halted = eventually(Duration::from_secs(5), async || worker.connection.is_stopped()).await;
    assert!(halted);
    assert!(facade.ping_worker().await, "The worker process stays up after stop");
}
