//! The upstream link as seen by the connection controller.
//!
//! An [`Upstream`] opens a link and reports inbound traffic and closure on
//! an event channel. Dropping the [`UpstreamLink`] closes the connection.

use crate::error::connection::ConnectionError;

use common::ErrorLocation;

use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

const ABNORMAL_CLOSURE: u16 = 1006;
const NORMAL_CLOSURE: u16 = 1000;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Message(String),
    Closed { code: u16, reason: String },
}

/// Handle to one open upstream connection.
#[derive(Debug)]
pub struct UpstreamLink {
    outbound: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
}

impl UpstreamLink {
    pub fn new(outbound: mpsc::UnboundedSender<String>, connected: Arc<AtomicBool>) -> Self {
        Self {
            outbound,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    #[track_caller]
    pub fn send(&self, text: &str) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected {
                message: "Upstream link is closed".to_string(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        self.outbound
            .send(text.to_string())
            .map_err(|e| ConnectionError::Send {
                message: format!("Upstream writer is gone: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })
    }

    pub fn close(self) {
        self.connected.store(false, Ordering::Release);
        trace!("Upstream link released");
    }
}

pub trait Upstream: Send + Sync + 'static {
    fn open<'a>(
        &'a self,
        uri: &'a str,
        events: mpsc::UnboundedSender<UpstreamEvent>,
    ) -> BoxFuture<'a, Result<UpstreamLink, ConnectionError>>;
}

/// WebSocket upstream over `ws://` or `wss://`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsUpstream;

impl Upstream for WsUpstream {
    fn open<'a>(
        &'a self,
        uri: &'a str,
        events: mpsc::UnboundedSender<UpstreamEvent>,
    ) -> BoxFuture<'a, Result<UpstreamLink, ConnectionError>> {
        async move {
            let url = Url::parse(uri).map_err(|e| ConnectionError::InvalidUri {
                message: format!("{uri}: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;

            let (socket, _) = connect_async(url.as_str()).await?;
            info!("WebSocket connected to {url}");

            let (mut sink, mut stream) = socket.split();
            let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
            let connected = Arc::new(AtomicBool::new(true));
            let flag = Arc::clone(&connected);

            TokioSpawn(async move {
                let (code, reason) = loop {
                    tokio::select! {
                        next = outbound_rx.recv() => match next {
                            Some(text) => {
                                if let Err(e) = sink.send(Message::text(text)).await {
                                    break (ABNORMAL_CLOSURE, format!("send failed: {e}"));
                                }
                            }
                            None => {
                                if timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
                                    debug!("WebSocket close handshake timed out");
                                }
                                break (NORMAL_CLOSURE, "closed locally".to_string());
                            }
                        },
                        inbound = stream.next() => match inbound {
                            Some(Ok(Message::Text(text))) => {
                                let _ = events.send(UpstreamEvent::Message(text.as_str().to_string()));
                            }
                            Some(Ok(Message::Binary(bytes))) => {
                                let text = String::from_utf8_lossy(&bytes).into_owned();
                                let _ = events.send(UpstreamEvent::Message(text));
                            }
                            Some(Ok(Message::Close(frame))) => {
                                break match frame {
                                    Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_string()),
                                    None => (NORMAL_CLOSURE, String::new()),
                                };
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break (ABNORMAL_CLOSURE, e.to_string()),
                            None => break (ABNORMAL_CLOSURE, "stream ended".to_string()),
                        },
                    }
                };

                flag.store(false, Ordering::Release);
                if code != NORMAL_CLOSURE {
                    warn!("WebSocket closed with code {code}: {reason}");
                }
                let _ = events.send(UpstreamEvent::Closed { code, reason });
            });

            Ok(UpstreamLink::new(outbound, connected))
        }
        .boxed()
    }
}
