//! Readiness handshake between a freshly started worker and the controller.
//!
//! 1. Worker → controller: `hello`, or the legacy PONG sentinel when the
//!    controller pipe cannot be reached.
//! 2. Controller → worker: `hello_ack` then `set_url`, on one connection.
//! 3. Worker → controller, ongoing: `socket_event` and `pong`.
//!
//! The controller's pending Initialize is released by whichever of hello,
//! sentinel or a successful probe arrives first, exactly once.

use crate::error::transport::TransportError;
use crate::lifecycle::WorkerLifecycle;
use crate::pipe::legacy::{LegacyBroadcastTransport, LegacyTarget};
use crate::pipe::{ConnectPolicy, FallbackTransport, PipeMessage, PipeTransport, Rendezvous, Transport};
use crate::protocol::{LOGOUT_PAYLOAD, PipeCommand, ProtocolMessage, legacy};
use crate::settings::Settings;

use common::ErrorLocation;

use std::panic::Location;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::time::{Instant, interval, sleep_until};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTiming {
    pub timeout: Duration,
    pub poll: Duration,
}

impl Default for HandshakeTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll: Duration::from_millis(100),
        }
    }
}

/// What released a pending handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadySource {
    Hello { pid: u32, version: String },
    Sentinel,
    Probe,
}

/// Single-shot readiness notification shared by the dispatcher and the
/// waiting Initialize call.
#[derive(Clone, Default)]
pub struct HandshakeSignal {
    pending: Arc<Mutex<Option<oneshot::Sender<ReadySource>>>>,
}

impl HandshakeSignal {
    /// Start waiting. A previous unresolved waiter is abandoned.
    pub fn arm(&self) -> oneshot::Receiver<ReadySource> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(tx);
        }
        rx
    }

    /// Resolve the current waiter, if any. Returns whether one was waiting.
    pub fn resolve(&self, source: ReadySource) -> bool {
        let sender = self.pending.lock().ok().and_then(|mut p| p.take());
        match sender {
            Some(tx) => tx.send(source).is_ok(),
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending
            .lock()
            .map(|p| p.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}

/// Wait for a spawned worker to become reachable.
///
/// Polls the worker endpoint every `timing.poll` while also listening for
/// the handshake signal; gives up after `timing.timeout`.
pub async fn await_worker(
    lifecycle: &WorkerLifecycle,
    mut ready: oneshot::Receiver<ReadySource>,
    timing: HandshakeTiming,
) -> Option<ReadySource> {
    let deadline = Instant::now() + timing.timeout;
    let mut ticker = interval(timing.poll);
    let mut signal_open = true;

    loop {
        tokio::select! {
            result = &mut ready, if signal_open => match result {
                Ok(source) => return Some(source),
                Err(_) => {
                    debug!("Handshake signal re-armed elsewhere, probing only");
                    signal_open = false;
                }
            },
            _ = ticker.tick() => {
                if lifecycle.probe_liveness().await {
                    return Some(ReadySource::Probe);
                }
            }
            _ = sleep_until(deadline) => {
                warn!("Worker did not become ready within {:?}", timing.timeout);
                return None;
            }
        }
    }
}

/// Controller side: answers hellos and pushes configuration.
pub struct ControllerHandshake {
    to_worker: PipeTransport,
    to_window: LegacyBroadcastTransport,
    fallback: FallbackTransport,
    signal: HandshakeSignal,
}

impl ControllerHandshake {
    pub fn new(rendezvous: &Rendezvous, policy: ConnectPolicy) -> Self {
        let to_worker = PipeTransport::new(rendezvous.worker(), policy);
        let to_window =
            LegacyBroadcastTransport::new(LegacyTarget::WindowClass(rendezvous.window_class()));
        let fallback = FallbackTransport::new(to_worker.clone(), to_window.clone());

        Self {
            to_worker,
            to_window,
            fallback,
            signal: HandshakeSignal::default(),
        }
    }

    pub fn signal(&self) -> &HandshakeSignal {
        &self.signal
    }

    /// Acknowledge a worker's hello and configure it, then release the
    /// pending Initialize.
    pub async fn on_hello(&self, pid: u32, version: String, settings: &Settings) {
        info!("Worker PID {pid} said hello (protocol {version})");

        let frames = encode_all(&[ProtocolMessage::hello_ack(), ProtocolMessage::set_url(settings)]);
        match frames {
            Ok(frames) => match self.to_worker.send_all(&frames).await {
                Ok(()) => debug!("Sent hello_ack and set_url to worker PID {pid}"),
                Err(e) => {
                    warn!("Failed to answer hello from PID {pid}: {e}");
                    if let Err(e) = self.push_settings(settings).await {
                        warn!("Settings push after failed hello reply also failed: {e}");
                    }
                }
            },
            Err(e) => warn!("{e}"),
        }

        self.signal.resolve(ReadySource::Hello { pid, version });
    }

    pub fn on_sentinel(&self) {
        info!("Worker signalled readiness through the legacy sentinel");
        self.signal.resolve(ReadySource::Sentinel);
    }

    /// Send the current settings as `set_url`, falling back to a window
    /// message when the worker pipe cannot be reached.
    pub async fn push_settings(&self, settings: &Settings) -> Result<(), TransportError> {
        let frame = encode_one(&ProtocolMessage::set_url(settings))?;
        self.fallback.send(&frame).await
    }

    /// StopService over the pipe; a worker only reachable by window
    /// message gets the legacy Logout instead.
    pub async fn send_stop(&self) -> Result<(), TransportError> {
        match self.to_worker.send(&legacy(PipeCommand::StopService, "")).await {
            Err(e) if e.is_connect() => {
                debug!("Worker pipe unreachable for stop: {e}");
                self.to_window
                    .send(&legacy(PipeCommand::Logout, LOGOUT_PAYLOAD))
                    .await
            }
            other => other,
        }
    }

    pub async fn send_ping(&self) -> Result<(), TransportError> {
        let frame = encode_one(&ProtocolMessage::ping())?;
        self.to_worker.send(&frame).await
    }
}

/// Worker side: announces readiness and relays events to the controller.
pub struct WorkerHandshake {
    to_controller: PipeTransport,
    to_app_window: LegacyBroadcastTransport,
}

impl WorkerHandshake {
    pub fn new(rendezvous: &Rendezvous, policy: ConnectPolicy) -> Self {
        Self {
            to_controller: PipeTransport::new(rendezvous.controller(), policy),
            to_app_window: LegacyBroadcastTransport::new(LegacyTarget::WindowTitle(
                rendezvous.title().to_string(),
            )),
        }
    }

    /// Say hello, or raise the legacy sentinel if the controller pipe is
    /// unreachable. Returns whether either got through.
    pub async fn announce(&self) -> bool {
        let hello = match encode_one(&ProtocolMessage::hello()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{e}");
                return false;
            }
        };

        match self.to_controller.send(&hello).await {
            Ok(()) => {
                info!("Hello sent to controller");
                true
            }
            Err(e) => {
                debug!("Controller pipe unreachable for hello: {e}");
                match self.to_app_window.send(&PipeMessage::empty(PipeCommand::Pong.code())).await {
                    Ok(()) => {
                        info!("Readiness sentinel sent to app window");
                        true
                    }
                    Err(e) => {
                        debug!("No controller to announce to: {e}");
                        false
                    }
                }
            }
        }
    }

    /// Deliver a protocol message upward through the pipe, else the window.
    pub async fn send(&self, message: &ProtocolMessage) -> Result<(), TransportError> {
        let frame = encode_one(message)?;
        match self.to_controller.send(&frame).await {
            Err(e) if e.is_connect() => self.to_app_window.send(&frame).await,
            other => other,
        }
    }
}

#[track_caller]
fn encode_one(message: &ProtocolMessage) -> Result<PipeMessage, TransportError> {
    message.encode().map_err(|e| TransportError::Frame {
        message: format!("Failed to encode {}: {e}", message.kind()),
        location: ErrorLocation::from(Location::caller()),
    })
}

fn encode_all(messages: &[ProtocolMessage]) -> Result<Vec<PipeMessage>, TransportError> {
    messages.iter().map(encode_one).collect()
}
