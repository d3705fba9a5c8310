use crate::pipe::{ConnectPolicy, Rendezvous, connect_client, probe_liveness};

use tempfile::TempDir;

#[test]
fn given_title_when_rendezvous_built_then_names_derive_from_notification_title() {
    // GIVEN
    let rendezvous = Rendezvous::new("Acme", "/run/user/1000/push-relay");

    // THEN
    assert_eq!(rendezvous.base_name(), "Acme_notification_pipe");
    assert_eq!(rendezvous.window_class(), "Acme_notification");
    assert!(rendezvous.worker().address().ends_with("Acme_notification_pipe.sock") || cfg!(windows));
    assert!(
        rendezvous
            .controller()
            .address()
            .contains("Acme_notification_pipe_host")
    );
    assert_ne!(rendezvous.worker(), rendezvous.controller());
}

#[cfg(windows)]
#[test]
fn given_windows_host_when_rendezvous_built_then_named_pipe_namespace() {
    let rendezvous = Rendezvous::new("Acme", "ignored");
    assert_eq!(rendezvous.worker().address(), r"\\.\pipe\Acme_notification_pipe");
}

/// **VALUE**: Connecting to an endpoint nobody owns fails fast, even with
/// the patient handshake policy.
///
/// **BUG THIS CATCHES**: Retrying on "not found" as if it were "busy", which
/// turns every probe of a dead worker into a 5s stall.
#[tokio::test]
async fn given_no_listener_when_connecting_then_fails_without_retrying() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let rendezvous = Rendezvous::new("Acme", dir.path());
    let started = std::time::Instant::now();

    // WHEN
    let result = connect_client(&rendezvous.worker(), ConnectPolicy::HANDSHAKE).await;

    // THEN
    let error = result.err().expect("nobody is listening");
    assert!(error.is_connect());
    assert!(started.elapsed() < std::time::Duration::from_secs(1));
    assert!(!probe_liveness(&rendezvous.worker()).await);
}
