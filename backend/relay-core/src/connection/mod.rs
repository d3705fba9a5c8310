//! Persistent upstream connection owned by the worker.
//!
//! The controller keeps one link open to the relay, pings it on a fixed
//! interval and tears it down when pongs stop arriving. Every drop goes
//! through [`ConnectionController::reconnect`], which debounces: at most one
//! reconnect timer exists at a time, and scheduling it stops the heartbeat
//! until the next successful connect starts a fresh one.
//!
//! # Locks
//!
//! - `state` (async) guards settings, URI and the live link. It is never
//!   held across the upstream open. Each connect takes a generation number
//!   and a link is only installed if no disconnect or newer connect bumped
//!   the generation while it was opening.
//! - `timers` (sync) guards the heartbeat, reconnect and in-flight open task
//!   handles. It is never held across an await;
//!   [`ConnectionController::stop`] aborts all three under it before
//!   returning.

pub mod upstream;

pub use upstream::{Upstream, UpstreamEvent, UpstreamLink, WsUpstream};

use crate::protocol::RECONNECT_SIGNAL;
use crate::settings::Settings;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, trace, warn};
use serde_json::Value;
use tokio::spawn as TokioSpawn;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, interval_at, sleep, timeout};

pub const PING_PAYLOAD: &str = r#"{"messageType":"ping"}"#;

/// Receives upstream traffic that is not part of connection upkeep.
pub trait LocalDelivery: Send + Sync + 'static {
    fn deliver(&self, message: String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTiming {
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Upper bound on one upstream open, TCP connect through upgrade.
    pub connect_timeout: Duration,
}

impl Default for ConnectionTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(45),
            reconnect_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

struct LinkState {
    settings: Settings,
    uri: String,
    link: Option<UpstreamLink>,
    dispatcher: Option<JoinHandle<()>>,
}

impl LinkState {
    fn release(&mut self) -> bool {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        match self.link.take() {
            Some(link) => {
                link.close();
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct Timers {
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    opening: Option<AbortHandle>,
}

struct Inner {
    upstream: Box<dyn Upstream>,
    delivery: Arc<dyn LocalDelivery>,
    timing: ConnectionTiming,
    device_id: String,
    state: AsyncMutex<LinkState>,
    timers: Mutex<Timers>,
    last_pong: Mutex<Instant>,
    stop_requested: AtomicBool,
    reconnecting: AtomicBool,
    first_pong_seen: AtomicBool,
    generation: AtomicU64,
    opens: AtomicU32,
}

#[derive(Clone)]
pub struct ConnectionController {
    inner: Arc<Inner>,
}

impl ConnectionController {
    /// Build an idle controller. Nothing connects until [`Self::start`].
    pub fn new(
        settings: Settings,
        device_id: impl Into<String>,
        upstream: impl Upstream,
        delivery: Arc<dyn LocalDelivery>,
        timing: ConnectionTiming,
    ) -> Self {
        let uri = settings.uri();
        Self {
            inner: Arc::new(Inner {
                upstream: Box::new(upstream),
                delivery,
                timing,
                device_id: device_id.into(),
                state: AsyncMutex::new(LinkState {
                    settings,
                    uri,
                    link: None,
                    dispatcher: None,
                }),
                timers: Mutex::new(Timers::default()),
                last_pong: Mutex::new(Instant::now()),
                stop_requested: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                first_pong_seen: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                opens: AtomicU32::new(0),
            }),
        }
    }

    // ============================================
    // Lifecycle
    // ============================================

    pub async fn start(&self) {
        self.inner.stop_requested.store(false, Ordering::Release);
        self.connect().await;
    }

    /// Open the upstream to the current URI and start the heartbeat.
    ///
    /// A failed or timed-out open schedules a reconnect rather than
    /// returning an error; the caller never has to retry. An open aborted by
    /// [`Self::stop`] just ends.
    pub async fn connect(&self) {
        let (uri, generation) = {
            let mut state = self.inner.state.lock().await;
            if self.is_stopped() {
                debug!("Connect skipped: stop requested");
                return;
            }

            self.inner.first_pong_seen.store(false, Ordering::Release);
            state.release();
            let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
            (state.uri.clone(), generation)
        };

        let (events, events_rx) = mpsc::unbounded_channel();
        self.inner.opens.fetch_add(1, Ordering::AcqRel);

        let limit = self.inner.timing.connect_timeout;
        let opening = {
            let this = self.clone();
            let uri = uri.clone();
            TokioSpawn(async move { timeout(limit, this.inner.upstream.open(&uri, events)).await })
        };
        {
            let mut timers = self.timers();
            if let Some(previous) = timers.opening.replace(opening.abort_handle()) {
                previous.abort();
            }
            if self.is_stopped() {
                opening.abort();
            }
        }

        let outcome = match opening.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => {
                debug!("Upstream connect to {uri} canceled");
                return;
            }
            Err(e) => {
                warn!("Upstream connect to {uri} failed: {e}");
                self.reconnect();
                return;
            }
        };

        match outcome {
            Ok(Ok(link)) => self.install(generation, link, events_rx).await,
            Ok(Err(e)) => {
                warn!("Upstream connect to {uri} failed: {e}");
                self.reconnect();
            }
            Err(_) => {
                warn!("Upstream connect to {uri} timed out after {limit:?}");
                self.reconnect();
            }
        }
    }

    /// Clear the stop flag now and connect on a separate task.
    ///
    /// For callers that must keep handling commands (a later stop included)
    /// while the open is in flight.
    pub fn start_detached(&self) -> JoinHandle<()> {
        self.inner.stop_requested.store(false, Ordering::Release);
        let this = self.clone();
        TokioSpawn(async move { this.connect().await })
    }

    async fn install(
        &self,
        generation: u64,
        link: UpstreamLink,
        events: mpsc::UnboundedReceiver<UpstreamEvent>,
    ) {
        let mut state = self.inner.state.lock().await;
        if self.is_stopped() || self.inner.generation.load(Ordering::Acquire) != generation {
            debug!("Discarding superseded upstream link");
            link.close();
            return;
        }

        info!("Upstream connected: {}", state.uri);

        let register = state.settings.register_payload(&self.inner.device_id);
        if !register.is_empty() {
            match link.send(&register) {
                Ok(()) => debug!("Register payload sent"),
                Err(e) => warn!("Failed to send register payload: {e}"),
            }
        }

        state.link = Some(link);
        state.dispatcher = Some(TokioSpawn(self.clone().dispatch(events)));
        drop(state);

        self.start_heartbeat();
    }

    /// Stop for good: cancel both timers and any open in flight, then drop
    /// the link.
    ///
    /// Safe to call when never connected.
    pub async fn stop(&self) {
        {
            let mut timers = self.timers();
            self.inner.stop_requested.store(true, Ordering::Release);
            if let Some(heartbeat) = timers.heartbeat.take() {
                heartbeat.abort();
            }
            if let Some(reconnect) = timers.reconnect.take() {
                reconnect.abort();
            }
            if let Some(opening) = timers.opening.take() {
                opening.abort();
            }
            self.inner.reconnecting.store(false, Ordering::Release);
        }

        self.disconnect().await;
        info!("Connection stopped");
    }

    /// Drop the live link. An open still in flight is discarded when it
    /// completes.
    pub async fn disconnect(&self) {
        let mut state = self.inner.state.lock().await;
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        if state.release() {
            debug!("Upstream link closed");
        }
    }

    /// Schedule a connect after the reconnect delay.
    ///
    /// Idempotent while a reconnect is pending. Does nothing after stop.
    pub fn reconnect(&self) {
        if self.is_stopped() {
            debug!("Reconnect ignored: stop requested");
            return;
        }

        let mut timers = self.timers();
        if self.is_stopped() {
            return;
        }

        if self
            .inner
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("Reconnect already scheduled");
            return;
        }

        if let Some(heartbeat) = timers.heartbeat.take() {
            heartbeat.abort();
        }

        let delay = self.inner.timing.reconnect_delay;
        let this = self.clone();
        timers.reconnect = Some(TokioSpawn(async move {
            sleep(delay).await;
            this.fire_reconnect().await;
        }));
        info!("Reconnect scheduled in {delay:?}");
    }

    /// Replace the settings record.
    ///
    /// The link is only rebuilt when both the URI and the register payload
    /// differ from the current ones; any other change takes effect on the
    /// next connect.
    pub async fn update_settings(&self, settings: Settings) {
        let rebuild = {
            let mut state = self.inner.state.lock().await;
            let uri = settings.uri();
            let register = settings.register_payload(&self.inner.device_id);
            let old_register = state.settings.register_payload(&self.inner.device_id);

            let rebuild = uri != state.uri && register != old_register;
            state.settings = settings;
            if rebuild {
                state.uri = uri;
            }
            rebuild
        };

        if rebuild {
            self.update_uri().await;
        } else {
            debug!("Settings stored without reconnect");
        }
    }

    async fn update_uri(&self) {
        info!("Upstream address changed, reconnecting");
        self.disconnect().await;
        self.reconnect();
    }

    async fn fire_reconnect(&self) {
        {
            let mut timers = self.timers();
            timers.reconnect = None;
            self.inner.reconnecting.store(false, Ordering::Release);

            if self.is_stopped() {
                info!("Reconnect canceled: stop requested");
                return;
            }

            if let Some(heartbeat) = timers.heartbeat.take() {
                heartbeat.abort();
            }
        }

        self.connect().await;
    }

    // ============================================
    // Heartbeat
    // ============================================

    fn start_heartbeat(&self) {
        let mut timers = self.timers();
        if self.is_stopped() {
            return;
        }

        if let Some(previous) = timers.heartbeat.take() {
            previous.abort();
        }
        *self.last_pong() = Instant::now();

        let period = self.inner.timing.heartbeat_interval;
        let this = self.clone();
        timers.heartbeat = Some(TokioSpawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if !this.heartbeat_tick().await {
                    break;
                }
            }
        }));
    }

    /// One heartbeat. Returns whether the heartbeat should keep running.
    async fn heartbeat_tick(&self) -> bool {
        if self.is_stopped() {
            return false;
        }

        let connected = {
            let state = self.inner.state.lock().await;
            match state.link.as_ref() {
                Some(link) if link.is_connected() => {
                    if let Err(e) = link.send(PING_PAYLOAD) {
                        warn!("Heartbeat ping failed: {e}");
                    }
                    true
                }
                _ => false,
            }
        };

        if !connected {
            debug!("Heartbeat: no connection");
            return true;
        }

        let silent_for = self.last_pong().elapsed();
        if silent_for > self.inner.timing.pong_timeout {
            warn!("No pong for {silent_for:?}, dropping connection");
            self.disconnect().await;
            self.reconnect();
            return false;
        }

        true
    }

    // ============================================
    // Inbound
    // ============================================

    async fn dispatch(self, mut events: mpsc::UnboundedReceiver<UpstreamEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                UpstreamEvent::Message(text) => self.on_message(text),
                UpstreamEvent::Closed { code, reason } => {
                    info!("Upstream closed ({code}): {reason}");
                    if !self.is_stopped() {
                        self.reconnect();
                    }
                    break;
                }
            }
        }
    }

    fn on_message(&self, text: String) {
        if is_pong(&text) {
            *self.last_pong() = Instant::now();
            if !self.inner.first_pong_seen.swap(true, Ordering::AcqRel) {
                debug!("First pong on this connection");
                self.inner.delivery.deliver(RECONNECT_SIGNAL.to_string());
            }
            return;
        }

        self.inner.delivery.deliver(text);
    }

    // ============================================
    // Inspection
    // ============================================

    pub fn is_stopped(&self) -> bool {
        self.inner.stop_requested.load(Ordering::Acquire)
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.inner.reconnecting.load(Ordering::Acquire)
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.timers()
            .heartbeat
            .as_ref()
            .is_some_and(|heartbeat| !heartbeat.is_finished())
    }

    /// Number of upstream opens attempted so far.
    pub fn open_count(&self) -> u32 {
        self.inner.opens.load(Ordering::Acquire)
    }

    pub async fn is_connected(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.link.as_ref().is_some_and(UpstreamLink::is_connected)
    }

    pub async fn uri(&self) -> String {
        self.inner.state.lock().await.uri.clone()
    }

    pub async fn settings(&self) -> Settings {
        self.inner.state.lock().await.settings.clone()
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.inner.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_pong(&self) -> MutexGuard<'_, Instant> {
        self.inner.last_pong.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_pong(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .is_some_and(|value| value.get("pong").is_some_and(Value::is_string))
}
