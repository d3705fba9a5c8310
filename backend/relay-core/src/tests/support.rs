// Test doubles for the connection controller and lifecycle collaborators.

use crate::connection::{LocalDelivery, Upstream, UpstreamEvent, UpstreamLink};
use crate::error::connection::ConnectionError;
use crate::error::spawn::SpawnError;
use crate::lifecycle::WorkerLauncher;
use crate::settings::Settings;

use common::ErrorLocation;

use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{Notify, mpsc};

#[derive(Default)]
struct UpstreamState {
    opens: AtomicU32,
    refuse: AtomicBool,
    sent: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::UnboundedSender<UpstreamEvent>>>,
    link_up: Mutex<Option<Arc<AtomicBool>>>,
}

/// In-memory upstream. Clones share state, so a test keeps one handle while
/// the controller owns another.
#[derive(Clone, Default)]
pub struct FakeUpstream {
    state: Arc<UpstreamState>,
}

impl FakeUpstream {
    pub fn opens(&self) -> u32 {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.sent.lock().unwrap().clone()
    }

    /// Inject an event on the most recently opened link.
    pub fn push(&self, event: UpstreamEvent) {
        let events = self.state.events.lock().unwrap();
        events
            .as_ref()
            .expect("no link has been opened")
            .send(event)
            .expect("controller stopped listening");
    }

    pub fn push_text(&self, text: &str) {
        self.push(UpstreamEvent::Message(text.to_string()));
    }

    /// Lose the most recent link silently, with no close event.
    pub fn sever(&self) {
        if let Some(link_up) = self.state.link_up.lock().unwrap().as_ref() {
            link_up.store(false, Ordering::SeqCst);
        }
    }

    pub fn close_abnormally(&self) {
        self.push(UpstreamEvent::Closed {
            code: 1006,
            reason: "abnormal".to_string(),
        });
    }
}

impl Upstream for FakeUpstream {
    fn open<'a>(
        &'a self,
        uri: &'a str,
        events: mpsc::UnboundedSender<UpstreamEvent>,
    ) -> BoxFuture<'a, Result<UpstreamLink, ConnectionError>> {
        async move {
            self.state.opens.fetch_add(1, Ordering::SeqCst);

            if self.state.refuse.load(Ordering::SeqCst) {
                return Err(ConnectionError::Connect {
                    message: format!("refused: {uri}"),
                    location: ErrorLocation::from(Location::caller()),
                });
            }

            *self.state.events.lock().unwrap() = Some(events);

            let (outbound, mut written) = mpsc::unbounded_channel::<String>();
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                while let Some(text) = written.recv().await {
                    state.sent.lock().unwrap().push(text);
                }
            });

            let link_up = Arc::new(AtomicBool::new(true));
            *self.state.link_up.lock().unwrap() = Some(Arc::clone(&link_up));
            Ok(UpstreamLink::new(outbound, link_up))
        }
        .boxed()
    }
}

/// Upstream whose opens hang until [`GatedUpstream::release`], like a relay
/// that accepts TCP and never finishes the upgrade.
#[derive(Clone, Default)]
pub struct GatedUpstream {
    opens: Arc<AtomicU32>,
    gate: Arc<Notify>,
}

impl GatedUpstream {
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Let one pending (or the next) open complete.
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

impl Upstream for GatedUpstream {
    fn open<'a>(
        &'a self,
        _uri: &'a str,
        _events: mpsc::UnboundedSender<UpstreamEvent>,
    ) -> BoxFuture<'a, Result<UpstreamLink, ConnectionError>> {
        async move {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;

            let (outbound, mut written) = mpsc::unbounded_channel::<String>();
            tokio::spawn(async move { while written.recv().await.is_some() {} });
            Ok(UpstreamLink::new(outbound, Arc::new(AtomicBool::new(true))))
        }
        .boxed()
    }
}

/// Records everything the controller delivers locally.
#[derive(Default)]
pub struct RecordingDelivery {
    delivered: Mutex<Vec<String>>,
}

impl RecordingDelivery {
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

impl LocalDelivery for RecordingDelivery {
    fn deliver(&self, message: String) {
        self.delivered.lock().unwrap().push(message);
    }
}

/// Launcher that never starts a process.
#[derive(Default)]
pub struct CountingLauncher {
    launches: AtomicU32,
    args: Mutex<Vec<Vec<String>>>,
}

impl CountingLauncher {
    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn last_args(&self) -> Option<Vec<String>> {
        self.args.lock().unwrap().last().cloned()
    }
}

impl WorkerLauncher for CountingLauncher {
    fn launch(&self, args: &[String]) -> Result<u32, SpawnError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.args.lock().unwrap().push(args.to_vec());
        Ok(u32::MAX - 1)
    }
}

pub fn relay_settings() -> Settings {
    let mut settings = Settings::new("Acme");
    settings.host = "relay.example.com".to_string();
    settings.port = 4443;
    settings.wss = true;
    settings.path = "/push".to_string();
    settings
}

pub fn registered_settings() -> Settings {
    let mut settings = relay_settings();
    settings.connector_id = "user-1".to_string();
    settings.connector_tag = "tag-1".to_string();
    settings.system_type = 3;
    settings
}
