use crate::connection::{ConnectionController, ConnectionTiming, PING_PAYLOAD};
use crate::protocol::RECONNECT_SIGNAL;
use crate::settings::Settings;
use crate::tests::support::{
    FakeUpstream, GatedUpstream, RecordingDelivery, registered_settings, relay_settings,
};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

const DEVICE_ID: &str = "device-1";

fn controller(settings: Settings) -> (ConnectionController, FakeUpstream, Arc<RecordingDelivery>) {
    let upstream = FakeUpstream::default();
    let delivery = Arc::new(RecordingDelivery::default());
    let controller = ConnectionController::new(
        settings,
        DEVICE_ID,
        upstream.clone(),
        delivery.clone(),
        ConnectionTiming::default(),
    );
    (controller, upstream, delivery)
}

fn gated_controller() -> (ConnectionController, GatedUpstream) {
    let upstream = GatedUpstream::default();
    let controller = ConnectionController::new(
        relay_settings(),
        DEVICE_ID,
        upstream.clone(),
        Arc::new(RecordingDelivery::default()),
        ConnectionTiming::default(),
    );
    (controller, upstream)
}

/// Let spawned tasks drain their queues without moving the clock far.
async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

/// **VALUE**: Reconnect requests collapse into a single scheduled connect.
///
/// **WHY THIS MATTERS**: A close event, a stale heartbeat and a settings
/// change can all ask for a reconnect within the same instant. Each extra
/// connect opens a second socket to the relay.
///
/// **BUG THIS CATCHES**: A missing or non-atomic `reconnecting` guard that
/// lets every caller spawn its own timer.
#[tokio::test(start_paused = true)]
async fn given_connected_controller_when_reconnect_called_five_times_then_connects_once_after_delay() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());
    controller.start().await;
    assert_eq!(upstream.opens(), 1);

    // WHEN
    for _ in 0..5 {
        controller.reconnect();
    }

    // THEN
    sleep(Duration::from_millis(2_900)).await;
    assert_eq!(upstream.opens(), 1, "Reconnect must wait for the debounce delay");

    sleep(Duration::from_millis(200)).await;
    assert_eq!(upstream.opens(), 2, "Exactly one reconnect should have run");

    sleep(Duration::from_secs(10)).await;
    assert_eq!(upstream.opens(), 2);
}

/// **VALUE**: An abnormal close is followed by exactly one connect, 3s later.
///
/// **BUG THIS CATCHES**: Reconnecting immediately (hammering the relay) or
/// not at all after a 1006 close.
#[tokio::test(start_paused = true)]
async fn given_connected_controller_when_upstream_closes_abnormally_then_reconnects_after_three_seconds() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());
    controller.start().await;

    // WHEN
    upstream.close_abnormally();
    settle().await;

    // THEN
    assert!(controller.is_reconnect_pending());
    assert!(!controller.is_heartbeat_running(), "Heartbeat must pause while reconnecting");

    sleep(Duration::from_millis(2_800)).await;
    assert_eq!(upstream.opens(), 1);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(upstream.opens(), 2);
    assert!(!controller.is_reconnect_pending());
    assert!(controller.is_heartbeat_running());
    assert!(controller.is_connected().await);
}

/// **VALUE**: Stop cancels a pending reconnect.
///
/// **WHY THIS MATTERS**: Logout stops the connection; a timer that fires
/// afterwards would silently log the user back in.
///
/// **BUG THIS CATCHES**: `stop()` that sets the flag but leaves the
/// reconnect task running, or a timer that ignores the flag.
#[tokio::test(start_paused = true)]
async fn given_pending_reconnect_when_stop_called_then_no_connect_happens() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());
    controller.start().await;
    upstream.close_abnormally();
    settle().await;
    assert!(controller.is_reconnect_pending());

    // WHEN
    controller.stop().await;

    // THEN
    sleep(Duration::from_secs(10)).await;
    assert_eq!(upstream.opens(), 1);
    assert!(controller.is_stopped());
    assert!(!controller.is_reconnect_pending());
    assert!(!controller.is_connected().await);

    controller.reconnect();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(upstream.opens(), 1, "Reconnect after stop must be a no-op");
}

/// **VALUE**: A relay that stops answering pings is abandoned after 45s.
///
/// **WHY THIS MATTERS**: Half-open TCP connections never produce a close
/// event. Pong tracking is the only way to notice them.
///
/// **BUG THIS CATCHES**: A heartbeat that pings but never checks staleness,
/// or one that compares against the wrong instant.
#[tokio::test(start_paused = true)]
async fn given_no_pongs_when_pong_timeout_elapses_then_connection_is_rebuilt() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());
    controller.start().await;

    // WHEN
    sleep(Duration::from_secs(49)).await;

    // THEN
    assert_eq!(upstream.opens(), 1, "45s is the limit, not the trigger");
    let pings = upstream.sent().iter().filter(|m| *m == PING_PAYLOAD).count();
    assert_eq!(pings, 9, "One ping every 5s");

    sleep(Duration::from_secs(5)).await;
    assert_eq!(upstream.opens(), 2, "Tick at 50s drops the link, reconnect fires at 53s");
}

#[tokio::test(start_paused = true)]
async fn given_regular_pongs_when_time_passes_then_connection_is_kept() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());
    controller.start().await;

    // WHEN
    for _ in 0..6 {
        sleep(Duration::from_secs(20)).await;
        upstream.push_text(r#"{"pong":"ok"}"#);
    }
    settle().await;

    // THEN
    assert_eq!(upstream.opens(), 1);
    assert!(controller.is_connected().await);
}

/// **VALUE**: The `reconnect` signal fires on the first pong of each
/// connection and never on later ones.
///
/// **WHY THIS MATTERS**: The app refreshes its state on that signal. Firing
/// on every pong means a refresh every heartbeat; never firing means
/// missed messages after a drop.
///
/// **BUG THIS CATCHES**: `first_pong_seen` not reset on connect, or pongs
/// leaking through to local delivery.
#[tokio::test(start_paused = true)]
async fn given_new_connection_when_pongs_arrive_then_reconnect_signal_delivered_once_per_connection() {
    // GIVEN
    let (controller, upstream, delivery) = controller(relay_settings());
    controller.start().await;

    // WHEN
    upstream.push_text(r#"{"pong":"1"}"#);
    upstream.push_text(r#"{"pong":"2"}"#);
    upstream.push_text("hello");
    settle().await;

    // THEN
    assert_eq!(delivery.delivered(), vec![RECONNECT_SIGNAL.to_string(), "hello".to_string()]);

    // WHEN: the link drops and comes back
    upstream.close_abnormally();
    sleep(Duration::from_millis(3_100)).await;
    upstream.push_text(r#"{"pong":"3"}"#);
    settle().await;

    // THEN
    assert_eq!(
        delivery.delivered(),
        vec![
            RECONNECT_SIGNAL.to_string(),
            "hello".to_string(),
            RECONNECT_SIGNAL.to_string()
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn given_non_string_pong_field_when_received_then_delivered_as_message() {
    // GIVEN
    let (controller, upstream, delivery) = controller(relay_settings());
    controller.start().await;

    // WHEN
    upstream.push_text(r#"{"pong":1}"#);
    settle().await;

    // THEN
    assert_eq!(delivery.delivered(), vec![r#"{"pong":1}"#.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn given_connector_identity_when_connected_then_register_payload_sent_first() {
    // GIVEN
    let (controller, upstream, _) = controller(registered_settings());

    // WHEN
    controller.start().await;
    settle().await;

    // THEN
    let sent = upstream.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains(r#""messageType":"register""#));
    assert!(sent[0].contains(DEVICE_ID));
}

#[tokio::test(start_paused = true)]
async fn given_no_connector_identity_when_connected_then_nothing_sent() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());

    // WHEN
    controller.start().await;
    settle().await;

    // THEN
    assert!(upstream.sent().is_empty());
}

/// **VALUE**: An unreachable relay is retried on the debounce schedule.
///
/// **BUG THIS CATCHES**: A failed open that neither errors out to the caller
/// nor schedules a retry, leaving the worker silently offline.
#[tokio::test(start_paused = true)]
async fn given_unreachable_upstream_when_started_then_retries_every_reconnect_delay() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());
    upstream.refuse_connections(true);

    // WHEN
    controller.start().await;

    // THEN
    assert_eq!(upstream.opens(), 1);
    assert!(controller.is_reconnect_pending());

    sleep(Duration::from_millis(3_100)).await;
    assert_eq!(upstream.opens(), 2);

    upstream.refuse_connections(false);
    sleep(Duration::from_secs(3)).await;
    assert_eq!(upstream.opens(), 3);
    assert!(controller.is_connected().await);
    assert!(!controller.is_reconnect_pending());
}

#[tokio::test(start_paused = true)]
async fn given_never_connected_controller_when_stopped_then_state_is_clean() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());

    // WHEN
    controller.stop().await;

    // THEN
    assert!(controller.is_stopped());
    assert!(!controller.is_heartbeat_running());
    assert_eq!(upstream.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn given_stopped_controller_when_started_again_then_connects() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());
    controller.start().await;
    controller.stop().await;

    // WHEN
    controller.start().await;

    // THEN
    assert_eq!(upstream.opens(), 2);
    assert!(!controller.is_stopped());
    assert!(controller.is_connected().await);
}

/// **VALUE**: Changing both the address and the identity rebuilds the link.
#[tokio::test(start_paused = true)]
async fn given_new_uri_and_identity_when_settings_updated_then_reconnects_to_new_uri() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());
    controller.start().await;

    let mut updated = registered_settings();
    updated.host = "other.example.com".to_string();

    // WHEN
    controller.update_settings(updated.clone()).await;

    // THEN
    assert!(!controller.is_connected().await);
    sleep(Duration::from_millis(3_100)).await;
    assert_eq!(upstream.opens(), 2);
    assert_eq!(controller.uri().await, updated.uri());
}

/// **VALUE**: A change to only one of address or identity is stored but
/// does not drop the live connection.
///
/// **BUG THIS CATCHES**: Loosening the rebuild rule to "either changed",
/// which reconnects on every login.
#[tokio::test(start_paused = true)]
async fn given_only_identity_changed_when_settings_updated_then_connection_is_kept() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());
    controller.start().await;
    let original_uri = controller.uri().await;

    // WHEN
    controller.update_settings(registered_settings()).await;

    // THEN
    sleep(Duration::from_secs(4)).await;
    assert_eq!(upstream.opens(), 1);
    assert!(controller.is_connected().await);
    assert_eq!(controller.uri().await, original_uri);
    assert_eq!(controller.settings().await.connector_id, "user-1");
}

/// **VALUE**: A new address with an unchanged register payload is stored
/// but keeps the live connection.
///
/// **WHY THIS MATTERS**: The rebuild rule needs both values to change. This
/// is the half of that rule most likely to be "fixed" by accident.
///
/// **BUG THIS CATCHES**: Rebuilding on a URI change alone, or updating the
/// stored URI without a rebuild.
#[tokio::test(start_paused = true)]
async fn given_only_uri_changed_when_settings_updated_then_connection_is_kept() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());
    controller.start().await;
    let original_uri = controller.uri().await;

    let mut moved = relay_settings();
    moved.host = "other.example.com".to_string();
    assert_ne!(moved.uri(), original_uri);

    // WHEN
    controller.update_settings(moved).await;

    // THEN
    sleep(Duration::from_secs(4)).await;
    assert_eq!(upstream.opens(), 1);
    assert_eq!(controller.open_count(), 1);
    assert!(controller.is_connected().await);
    assert_eq!(controller.uri().await, original_uri);
    assert_eq!(controller.settings().await.host, "other.example.com");
}

/// **VALUE**: Heartbeat ticks with no live link neither ping nor reconnect,
/// and the heartbeat keeps running.
///
/// **BUG THIS CATCHES**: Applying the pong timeout to a link that is already
/// gone, which schedules reconnects the close path never asked for.
#[tokio::test(start_paused = true)]
async fn given_link_lost_without_close_when_heartbeat_ticks_then_nothing_happens() {
    // GIVEN
    let (controller, upstream, _) = controller(relay_settings());
    controller.start().await;

    // WHEN
    upstream.sever();
    sleep(Duration::from_secs(60)).await;

    // THEN
    assert!(!controller.is_reconnect_pending());
    assert!(controller.is_heartbeat_running());
    assert_eq!(upstream.opens(), 1);
    assert!(
        !upstream.sent().iter().any(|text| text == PING_PAYLOAD),
        "No ping should go out on a dead link"
    );
}

/// **VALUE**: Stop and settings updates return promptly while an upstream
/// open hangs, and the abandoned open is never retried.
///
/// **WHY THIS MATTERS**: The worker handles controller commands one at a
/// time. A stop that waits on a relay which never answers the upgrade
/// leaves the worker unable to log out.
///
/// **BUG THIS CATCHES**: Holding the state lock across the open.
#[tokio::test(start_paused = true)]
async fn given_open_hanging_when_stopped_then_stop_and_update_return_promptly() {
    // GIVEN
    let (controller, upstream) = gated_controller();
    let connecting = controller.start_detached();
    settle().await;
    assert_eq!(upstream.opens(), 1);

    // WHEN
    let stopped = timeout(Duration::from_secs(1), controller.stop()).await;
    let updated = timeout(
        Duration::from_secs(1),
        controller.update_settings(registered_settings()),
    )
    .await;

    // THEN
    assert!(stopped.is_ok(), "stop must not wait for the open");
    assert!(updated.is_ok(), "update_settings must not wait for the open");
    assert!(timeout(Duration::from_secs(1), connecting).await.is_ok());

    sleep(Duration::from_secs(60)).await;
    assert_eq!(upstream.opens(), 1);
    assert!(!controller.is_reconnect_pending());
}

/// **VALUE**: An open that never completes counts as a failed connect once
/// the connect timeout passes.
#[tokio::test(start_paused = true)]
async fn given_open_hanging_when_connect_timeout_passes_then_reconnect_is_scheduled() {
    // GIVEN
    let (controller, upstream) = gated_controller();

    // WHEN
    controller.start_detached();

    // THEN
    sleep(Duration::from_millis(9_900)).await;
    assert!(!controller.is_reconnect_pending());

    sleep(Duration::from_millis(200)).await;
    assert!(controller.is_reconnect_pending());

    sleep(Duration::from_secs(3)).await;
    assert_eq!(upstream.opens(), 2);
}

/// **VALUE**: A link that finishes opening after the address changed is
/// thrown away instead of being installed.
///
/// **BUG THIS CATCHES**: Installing a link to the old relay over the top of
/// a disconnect that happened while it was opening.
#[tokio::test(start_paused = true)]
async fn given_open_in_flight_when_address_changes_then_late_link_is_discarded() {
    // GIVEN
    let (controller, upstream) = gated_controller();
    controller.start_detached();
    settle().await;

    let mut updated = registered_settings();
    updated.host = "other.example.com".to_string();
    controller.update_settings(updated).await;

    // WHEN
    upstream.release();
    settle().await;

    // THEN
    assert!(!controller.is_connected().await);
    assert!(!controller.is_heartbeat_running());
    assert!(controller.is_reconnect_pending());

    sleep(Duration::from_millis(3_100)).await;
    assert_eq!(upstream.opens(), 2);
}
