use crate::error::CoreError;
use crate::facade::{
    Collaborators, ConnectionMode, ConnectionType, ControllerFacade, FacadeConfig, PlatformSettings,
    User,
};
use crate::handshake::HandshakeTiming;
use crate::lifecycle::MAX_SPAWN_ATTEMPTS;
use crate::notify::LogNotificationSink;
use crate::settings::identity::StaticIdentity;
use crate::tests::facade::session::RecordingSink;
use crate::tests::support::CountingLauncher;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    facade: ControllerFacade,
    launcher: Arc<CountingLauncher>,
    sink: Arc<RecordingSink>,
}

fn harness(retry: u32) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = FacadeConfig::new("Acme", dir.path(), dir.path());
    config.handshake = HandshakeTiming {
        timeout: Duration::from_millis(300),
        poll: Duration::from_millis(50),
    };

    let launcher = Arc::new(CountingLauncher::default());
    let sink = Arc::new(RecordingSink::default());
    let facade = ControllerFacade::new(
        config,
        Collaborators {
            launcher: launcher.clone(),
            identity: Arc::new(StaticIdentity("{device-1}".to_string())),
            events: sink.clone(),
            notifier: Arc::new(LogNotificationSink),
        },
        retry,
    );

    Harness {
        _dir: dir,
        facade,
        launcher,
        sink,
    }
}

fn platform() -> PlatformSettings {
    PlatformSettings {
        bundle_id: "com.acme.app".to_string(),
        display_name: "Acme".to_string(),
        icon: "icon.png".to_string(),
        icon_content: String::new(),
    }
}

fn mode() -> ConnectionMode {
    ConnectionMode {
        host: "relay.example.com".to_string(),
        port: 4443,
        connection_type: ConnectionType::Wss,
        public_has_key: None,
        path: Some("/push".to_string()),
    }
}

#[tokio::test]
async fn given_no_platform_settings_when_initialize_then_false_without_spawn() {
    // GIVEN
    let h = harness(0);

    // WHEN
    let result = h.facade.initialize(1, None, mode()).await.unwrap();

    // THEN
    assert!(!result);
    assert_eq!(h.launcher.launches(), 0);
}

/// **VALUE**: A worker that never answers fails Initialize and releases the
/// spawn guard so a later call can try again.
///
/// **BUG THIS CATCHES**: Leaving `spawning` set after a timeout, which makes
/// every later Initialize report success without a worker.
#[tokio::test]
async fn given_worker_never_answers_when_initialize_then_false_after_timeout() {
    // GIVEN
    let h = harness(0);

    // WHEN
    let result = h.facade.initialize(1, Some(platform()), mode()).await.unwrap();

    // THEN
    assert!(!result);
    assert_eq!(h.launcher.launches(), 1);
    assert!(!h.facade.lifecycle().is_spawning());
    assert_eq!(h.facade.lifecycle().attempts(), 1);

    let settings = h.facade.session().settings().await;
    assert_eq!(settings.uri(), "wss://relay.example.com:4443/push");
    assert_eq!(settings.public_has_key, "-");
    assert!(settings.icon_path.ends_with("icon.png"));
    assert_eq!(settings.app_pid, std::process::id());
    h.facade.shutdown().await;
}

#[tokio::test]
async fn given_spawn_limit_reached_when_initialize_then_spawn_error() {
    // GIVEN
    let h = harness(MAX_SPAWN_ATTEMPTS);

    // WHEN
    let result = h.facade.initialize(1, Some(platform()), mode()).await;

    // THEN
    assert!(matches!(result, Err(CoreError::Spawn(_))));
    assert_eq!(h.launcher.launches(), 0);
    h.facade.shutdown().await;
}

#[tokio::test]
async fn given_uninitialized_facade_when_config_and_register_then_stored_and_true() {
    // GIVEN
    let h = harness(0);
    let mut changed = mode();
    changed.connection_type = ConnectionType::Tcp;
    changed.public_has_key = Some("key".to_string());

    // WHEN
    let configured = h.facade.config(changed, &["ssid".to_string()]).await;
    let registered = h
        .facade
        .register_user(User {
            connector_id: "user-1".to_string(),
            connector_tag: "tag-1".to_string(),
        })
        .await;

    // THEN
    assert!(configured && registered);
    let settings = h.facade.session().settings().await;
    assert!(settings.tcp && !settings.wss);
    assert_eq!(settings.public_has_key, "key");
    assert_eq!(settings.connector_id, "user-1");
    assert_eq!(h.launcher.launches(), 0, "Config alone never spawns");
}

#[tokio::test]
async fn given_no_worker_when_stop_then_nothing_to_stop_is_success() {
    // GIVEN
    let h = harness(0);

    // WHEN / THEN
    assert!(h.facade.stop().await);
}

#[tokio::test]
async fn given_trivial_entry_points_when_called_then_fixed_answers() {
    let h = harness(0);

    assert!(h.facade.request_permission().await);
    assert!(h.facade.start().await);
    assert_eq!(h.facade.device_id().await, "device-1");
    assert!(!h.facade.ping_worker().await);
}

#[tokio::test]
async fn given_notification_argument_when_activated_then_delivered_as_from_notification() {
    // GIVEN
    let h = harness(0);
    let raw = r#"{"Notification":{"Title":"t","Body":"b"}}"#;
    h.facade.flutter_api_ready().await;

    // WHEN
    let accepted = h.facade.on_notification_activated(&BASE64.encode(raw));
    let rejected = h.facade.on_notification_activated("***");

    // THEN
    assert!(accepted);
    assert!(!rejected);
    let messages = h.sink.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].from_notification);
    assert_eq!(messages[0].data, raw);
}

#[tokio::test]
async fn given_relayed_event_by_window_message_when_handled_then_reaches_event_sink() {
    use crate::pipe::PipeMessage;
    use crate::pipe::legacy::encode_window_message;
    use crate::protocol::ProtocolMessage;

    // GIVEN
    let h = harness(0);
    h.facade.flutter_api_ready().await;
    let frame = encode_window_message(&ProtocolMessage::socket_message("hi").encode().unwrap());

    // WHEN
    h.facade
        .handle_window_message(frame.command, frame.declared_len(), &frame.data)
        .await;
    h.facade
        .handle_window_message(777, 777, &PipeMessage::empty(0).payload)
        .await;

    // THEN
    let messages = h.sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data, "hi");
    assert!(!messages[0].from_notification);
}
