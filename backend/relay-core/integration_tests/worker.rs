use crate::helpers::{RecordingNotifier, eventually, relay_settings, start_worker};

use relay_core::handshake::ControllerHandshake;
use relay_core::notify::LogNotificationSink;
use relay_core::pipe::{ConnectPolicy, PipeMessage, PipeTransport, Rendezvous, Transport, listen};
use relay_core::protocol::{
    ACK_OK, ACK_REJECTED, Inbound, PipeCommand, ProtocolMessage, decode, legacy,
};
use relay_core::settings::Settings;
use relay_core::worker::{Worker, WorkerOptions};

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

const TITLE: &str = "Acme";

async fn next_protocol(inbox: &mut mpsc::Receiver<PipeMessage>) -> ProtocolMessage {
    loop {
        let frame = timeout(Duration::from_secs(5), inbox.recv())
            .await
            .expect("worker should answer")
            .expect("controller endpoint closed");
        if let Ok(Inbound::Protocol(message)) = decode(&frame) {
            return message;
        }
    }
}

/// **VALUE**: set_url reconfigures the worker and is acknowledged with the
/// same id.
///
/// **BUG THIS CATCHES**: Acks that do not echo the request id, which leaves
/// the controller unable to match replies to pushes.
#[tokio::test]
async fn given_running_worker_when_set_url_pushed_then_acked_and_applied() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let rendezvous = Rendezvous::new(TITLE, dir.path());
    let (sink, mut inbox) = mpsc::channel(16);
    let _controller = listen(rendezvous.controller(), sink).await.unwrap();
    let worker = start_worker(relay_settings(TITLE), dir.path().to_path_buf(), Arc::new(LogNotificationSink)).await;

    let hello = next_protocol(&mut inbox).await;
    assert!(matches!(hello, ProtocolMessage::Hello { .. }));

    let mut settings = relay_settings(TITLE);
    settings.port = 9443;
    let push = ProtocolMessage::set_url(&settings);
    let ProtocolMessage::SetUrl { id, .. } = &push else { unreachable!() };
    let id = id.clone();

    // WHEN
    PipeTransport::new(rendezvous.worker(), ConnectPolicy::HANDSHAKE)
        .send(&push.encode().unwrap())
        .await
        .unwrap();

    // THEN
    let ack = next_protocol(&mut inbox).await;
    assert_eq!(ack, ProtocolMessage::ack(id, ACK_OK));
    assert_eq!(worker.connection.settings().await.port, 9443);
}

/// **VALUE**: The notification title is always derived from the app title
/// carried in set_url.
///
/// **BUG THIS CATCHES**: A stale `title_notification` in the pushed options
/// being stored as-is, so toasts show a title that no longer matches the app.
#[tokio::test]
async fn given_drifted_notification_title_when_set_url_pushed_then_rederived_from_title() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let rendezvous = Rendezvous::new(TITLE, dir.path());
    let (sink, mut inbox) = mpsc::channel(16);
    let _controller = listen(rendezvous.controller(), sink).await.unwrap();
    let worker = start_worker(relay_settings(TITLE), dir.path().to_path_buf(), Arc::new(LogNotificationSink)).await;
    let _hello = next_protocol(&mut inbox).await;

    let mut settings = relay_settings(TITLE);
    settings.title_notification = "stale".to_string();
    let push = ProtocolMessage::set_url(&settings);
    let ProtocolMessage::SetUrl { id, .. } = &push else { unreachable!() };
    let id = id.clone();

    // WHEN
    PipeTransport::new(rendezvous.worker(), ConnectPolicy::HANDSHAKE)
        .send(&push.encode().unwrap())
        .await
        .unwrap();

    // THEN
    assert_eq!(next_protocol(&mut inbox).await, ProtocolMessage::ack(id, ACK_OK));
    let applied = worker.connection.settings().await;
    assert_eq!(applied.title, TITLE);
    assert_eq!(applied.title_notification, format!("{TITLE}_notification"));
}

#[tokio::test]
async fn given_settings_without_host_when_set_url_pushed_then_rejected_and_ignored() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let rendezvous = Rendezvous::new(TITLE, dir.path());
    let (sink, mut inbox) = mpsc::channel(16);
    let _controller = listen(rendezvous.controller(), sink).await.unwrap();
    let worker = start_worker(relay_settings(TITLE), dir.path().to_path_buf(), Arc::new(LogNotificationSink)).await;
    let _hello = next_protocol(&mut inbox).await;

    // WHEN
    let push = ProtocolMessage::set_url(&Settings::new(TITLE));
    PipeTransport::new(rendezvous.worker(), ConnectPolicy::HANDSHAKE)
        .send(&push.encode().unwrap())
        .await
        .unwrap();

    // THEN
    let ProtocolMessage::Ack { status, .. } = next_protocol(&mut inbox).await else {
        panic!("expected ack");
    };
    assert_eq!(status, ACK_REJECTED);
    assert_eq!(worker.connection.settings().await.host, "relay.example.com");
}

#[tokio::test]
async fn given_running_worker_when_pinged_then_pong_echoes_timestamp() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let rendezvous = Rendezvous::new(TITLE, dir.path());
    let (sink, mut inbox) = mpsc::channel(16);
    let _controller = listen(rendezvous.controller(), sink).await.unwrap();
    let _worker = start_worker(relay_settings(TITLE), dir.path().to_path_buf(), Arc::new(LogNotificationSink)).await;
    let _hello = next_protocol(&mut inbox).await;

    // WHEN
    PipeTransport::new(rendezvous.worker(), ConnectPolicy::HANDSHAKE)
        .send(&ProtocolMessage::Ping { t: 1234 }.encode().unwrap())
        .await
        .unwrap();

    // THEN
    assert_eq!(next_protocol(&mut inbox).await, ProtocolMessage::Pong { t: 1234 });
}

/// **VALUE**: Only one worker can own the rendezvous endpoint.
#[tokio::test]
async fn given_running_worker_when_second_worker_starts_then_it_fails() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let _first = start_worker(relay_settings(TITLE), dir.path().to_path_buf(), Arc::new(LogNotificationSink)).await;

    // WHEN
    let second = Worker::start(
        relay_settings(TITLE),
        WorkerOptions::new(dir.path(), dir.path()),
        crate::helpers::FakeUpstream::default(),
        Arc::new(LogNotificationSink),
        "device-2".to_string(),
    )
    .await;

    // THEN
    assert!(second.is_err());
}

/// **VALUE**: With no foreground process, a notification message becomes a
/// toast whose argument carries the raw message for later activation.
///
/// **BUG THIS CATCHES**: Dropping messages when the app is closed (the very
/// case the worker exists for), or toasting the internal reconnect signal.
#[tokio::test]
async fn given_no_controller_when_notification_arrives_then_toast_shown_with_raw_argument() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let worker = start_worker(relay_settings(TITLE), dir.path().to_path_buf(), notifier.clone()).await;
    assert!(eventually(Duration::from_secs(2), async || worker.upstream.opens() > 0).await);
    let raw = r#"{"Notification":{"Title":"Hi","Body":"There","Subtitle":"Sub"}}"#;

    // WHEN
    worker.upstream.push_text(r#"{"pong":"x"}"#);
    worker.upstream.push_text("not a notification");
    worker.upstream.push_text(raw);

    // THEN
    assert!(eventually(Duration::from_secs(5), async || !notifier.shown().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let shown = notifier.shown();
    assert_eq!(shown.len(), 1, "Only the notification is toasted");
    assert_eq!(shown[0].0, "Hi");
    assert_eq!(shown[0].1, "Sub\nThere");
    assert_eq!(BASE64.decode(&shown[0].2).unwrap(), raw.as_bytes());
}

#[tokio::test]
async fn given_legacy_settings_blob_when_received_then_worker_settings_replaced() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let rendezvous = Rendezvous::new(TITLE, dir.path());
    let worker = start_worker(relay_settings(TITLE), dir.path().to_path_buf(), Arc::new(LogNotificationSink)).await;
    let mut settings = relay_settings(TITLE);
    settings.display_name = "Renamed".to_string();

    // WHEN
    PipeTransport::new(rendezvous.worker(), ConnectPolicy::HANDSHAKE)
        .send(&legacy(PipeCommand::UpdateSettings, &settings.encode_launch_token().unwrap()))
        .await
        .unwrap();

    // THEN
    let applied = eventually(Duration::from_secs(5), async || {
        worker.connection.settings().await.display_name == "Renamed"
    })
    .await;
    assert!(applied);
}

/// **VALUE**: After a logout stop, the next login's settings bring the
/// connection back without restarting the worker.
#[tokio::test]
async fn given_stopped_worker_when_settings_pushed_then_connection_restarts() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let rendezvous = Rendezvous::new(TITLE, dir.path());
    let worker = start_worker(relay_settings(TITLE), dir.path().to_path_buf(), Arc::new(LogNotificationSink)).await;
    let controller = ControllerHandshake::new(&rendezvous, ConnectPolicy::HANDSHAKE);
    assert!(eventually(Duration::from_secs(2), async || worker.upstream.opens() == 1).await);

    controller.send_stop().await.unwrap();
    assert!(eventually(Duration::from_secs(5), async || worker.connection.is_stopped()).await);

    // WHEN
    controller.push_settings(&relay_settings(TITLE)).await.unwrap();

    // THEN
    let restarted = eventually(Duration::from_secs(5), async || {
        !worker.connection.is_stopped() && worker.upstream.opens() == 2
    })
    .await;
    assert!(restarted);
}
