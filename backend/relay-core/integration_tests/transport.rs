use crate::helpers::eventually;

use relay_core::error::transport::TransportError;
use relay_core::pipe::{
    ConnectPolicy, FallbackTransport, PipeMessage, PipeTransport, Rendezvous, Transport, listen,
};

use common::ErrorLocation;

use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Clone, Default)]
struct CountingTransport {
    sends: Arc<AtomicU32>,
}

impl Transport for CountingTransport {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn send<'a>(&'a self, _message: &'a PipeMessage) -> BoxFuture<'a, Result<(), TransportError>> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }.boxed()
    }
}

/// Fails after "connecting", like a peer that hangs up mid-write.
struct BrokenAfterConnect;

impl Transport for BrokenAfterConnect {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn send<'a>(&'a self, _message: &'a PipeMessage) -> BoxFuture<'a, Result<(), TransportError>> {
        async {
            Err(TransportError::Frame {
                message: "peer hung up".to_string(),
                location: ErrorLocation::from(Location::caller()),
            })
        }
        .boxed()
    }
}

#[tokio::test]
async fn given_listening_server_when_client_sends_batch_then_frames_arrive_in_order() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let endpoint = Rendezvous::new("Acme", dir.path()).worker();
    let (sink, mut inbox) = mpsc::channel(8);
    let _server = listen(endpoint.clone(), sink).await.unwrap();
    let transport = PipeTransport::new(endpoint, ConnectPolicy::SHORT);

    // WHEN
    transport
        .send_all(&[PipeMessage::new(500, b"one".to_vec()), PipeMessage::new(500, b"two".to_vec())])
        .await
        .unwrap();

    // THEN
    let first = timeout(Duration::from_secs(2), inbox.recv()).await.unwrap().unwrap();
    let second = timeout(Duration::from_secs(2), inbox.recv()).await.unwrap().unwrap();
    assert_eq!(first.payload, b"one");
    assert_eq!(second.payload, b"two");
}

/// **VALUE**: The server keeps accepting after each peer disconnects.
///
/// **BUG THIS CATCHES**: An accept loop that serves one peer and exits,
/// which makes the worker deaf after the first controller message.
#[tokio::test]
async fn given_served_peer_when_it_disconnects_then_next_peer_is_served() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let endpoint = Rendezvous::new("Acme", dir.path()).controller();
    let (sink, mut inbox) = mpsc::channel(8);
    let server = listen(endpoint.clone(), sink).await.unwrap();
    let transport = PipeTransport::new(endpoint, ConnectPolicy::SHORT);

    // WHEN
    for n in 0..3u32 {
        transport.send(&PipeMessage::empty(n)).await.unwrap();
    }

    // THEN
    for n in 0..3u32 {
        let message = timeout(Duration::from_secs(2), inbox.recv()).await.unwrap().unwrap();
        assert_eq!(message.command, n);
    }
    assert!(server.is_running());
}

/// **VALUE**: Back-to-back senders always find the endpoint, even while the
/// previous peer is still being drained.
///
/// **BUG THIS CATCHES**: A gap between peers where the endpoint does not
/// exist. Clients treat "not found" as final, so a push landing in that gap
/// falls back to the window message although the worker is alive.
#[tokio::test]
async fn given_rapid_consecutive_senders_when_sending_then_none_finds_endpoint_missing() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let endpoint = Rendezvous::new("Acme", dir.path()).worker();
    let (sink, mut inbox) = mpsc::channel(32);
    let _server = listen(endpoint.clone(), sink).await.unwrap();
    let transport = PipeTransport::new(endpoint, ConnectPolicy::SHORT);

    // WHEN
    for n in 0..20u32 {
        transport
            .send(&PipeMessage::empty(n))
            .await
            .unwrap_or_else(|e| panic!("send {n} failed: {e}"));
    }

    // THEN
    for n in 0..20u32 {
        let message = timeout(Duration::from_secs(2), inbox.recv()).await.unwrap().unwrap();
        assert_eq!(message.command, n);
    }
}

#[tokio::test]
async fn given_live_server_when_second_listen_on_same_endpoint_then_fails() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let endpoint = Rendezvous::new("Acme", dir.path()).worker();
    let (sink, _inbox) = mpsc::channel(8);
    let _server = listen(endpoint.clone(), sink.clone()).await.unwrap();

    // WHEN
    let second = listen(endpoint, sink).await;

    // THEN
    assert!(second.is_err());
}

#[tokio::test]
async fn given_stopped_server_when_stopped_then_endpoint_can_be_reclaimed() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let endpoint = Rendezvous::new("Acme", dir.path()).worker();
    let (sink, _inbox) = mpsc::channel(8);
    let server = listen(endpoint.clone(), sink.clone()).await.unwrap();

    // WHEN
    server.stop();
    assert!(eventually(Duration::from_secs(1), async || !server.is_running()).await);

    // THEN
    assert!(listen(endpoint, sink).await.is_ok());
}

/// **VALUE**: The fallback path is taken only when the pipe cannot be
/// reached at all.
///
/// **WHY THIS MATTERS**: A frame that was partly written over the pipe and
/// then replayed over the window channel would be applied twice.
///
/// **BUG THIS CATCHES**: Falling back on every error instead of only on
/// connect failures.
#[tokio::test]
async fn given_unreachable_pipe_when_sending_through_fallback_then_fallback_used() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let endpoint = Rendezvous::new("Acme", dir.path()).worker();
    let fallback = CountingTransport::default();
    let transport = FallbackTransport::new(
        PipeTransport::new(endpoint, ConnectPolicy::PROBE),
        fallback.clone(),
    );

    // WHEN
    let result = transport.send(&PipeMessage::empty(300)).await;

    // THEN
    assert!(result.is_ok());
    assert_eq!(fallback.sends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn given_failure_after_connect_when_sending_through_fallback_then_error_returned() {
    // GIVEN
    let fallback = CountingTransport::default();
    let transport = FallbackTransport::new(BrokenAfterConnect, fallback.clone());

    // WHEN
    let result = transport.send(&PipeMessage::empty(300)).await;

    // THEN
    assert!(matches!(result, Err(TransportError::Frame { .. })));
    assert_eq!(fallback.sends.load(Ordering::SeqCst), 0);
}
