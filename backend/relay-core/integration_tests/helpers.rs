// Shared doubles for the public-API tests.

use relay_core::connection::{Upstream, UpstreamEvent, UpstreamLink};
use relay_core::error::connection::ConnectionError;
use relay_core::error::spawn::SpawnError;
use relay_core::facade::{EventSink, InboundMessage};
use relay_core::lifecycle::{LaunchMode, WorkerLauncher};
use relay_core::notify::{LogNotificationSink, NotificationSink};
use relay_core::settings::Settings;
use relay_core::worker::{Worker, WorkerOptions};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};

#[derive(Clone, Default)]
pub struct FakeUpstream {
    opens: Arc<AtomicU32>,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<UpstreamEvent>>>>,
}

impl FakeUpstream {
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn push_text(&self, text: &str) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(UpstreamEvent::Message(text.to_string()));
        }
    }
}

impl Upstream for FakeUpstream {
    fn open<'a>(
        &'a self,
        _uri: &'a str,
        events: mpsc::UnboundedSender<UpstreamEvent>,
    ) -> BoxFuture<'a, Result<UpstreamLink, ConnectionError>> {
        async move {
            self.opens.fetch_add(1, Ordering::SeqCst);
            *self.events.lock().unwrap() = Some(events);

            let (outbound, mut written) = mpsc::unbounded_channel::<String>();
            tokio::spawn(async move { while written.recv().await.is_some() {} });
            Ok(UpstreamLink::new(outbound, Arc::new(AtomicBool::new(true))))
        }
        .boxed()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<InboundMessage>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<InboundMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn on_message(&self, message: InboundMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(String, String, String)>>,
}

impl RecordingNotifier {
    pub fn shown(&self) -> Vec<(String, String, String)> {
        self.shown.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn register(&self, _bundle_id: &str, _display_name: &str, _icon_path: &str) -> bool {
        true
    }

    fn show(&self, title: &str, body: &str, argument: &str) -> bool {
        self.shown
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string(), argument.to_string()));
        true
    }
}

/// Running in-process worker plus handles to observe it.
pub struct RunningWorker {
    pub upstream: FakeUpstream,
    pub connection: relay_core::connection::ConnectionController,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for RunningWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn start_worker(
    settings: Settings,
    dir: PathBuf,
    notifier: Arc<dyn NotificationSink>,
) -> RunningWorker {
    let upstream = FakeUpstream::default();
    let mut worker = Worker::start(
        settings,
        WorkerOptions::new(dir.clone(), dir),
        upstream.clone(),
        notifier,
        "device-1".to_string(),
    )
    .await
    .expect("worker endpoint should be free");

    let connection = worker.connection().clone();
    let task = tokio::spawn(async move {
        worker.announce_and_connect().await;
        worker.serve().await;
    });

    RunningWorker {
        upstream,
        connection,
        task,
    }
}

/// Starts the worker inside this process instead of a child process.
pub struct InProcessLauncher {
    dir: PathBuf,
    launches: AtomicU32,
    worker: Arc<Mutex<Option<RunningWorker>>>,
}

impl InProcessLauncher {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            launches: AtomicU32::new(0),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn connection(&self) -> Option<relay_core::connection::ConnectionController> {
        self.worker.lock().unwrap().as_ref().map(|w| w.connection.clone())
    }
}

impl WorkerLauncher for InProcessLauncher {
    fn launch(&self, args: &[String]) -> Result<u32, SpawnError> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        let argv = std::iter::once("push-relay".to_string()).chain(args.iter().cloned());
        let LaunchMode::Worker { settings, .. } = LaunchMode::parse(argv).expect("worker args") else {
            panic!("launcher produced controller arguments");
        };

        let dir = self.dir.clone();
        let slot = Arc::clone(&self.worker);
        tokio::spawn(async move {
            let running = start_worker(settings, dir, Arc::new(LogNotificationSink)).await;
            *slot.lock().unwrap() = Some(running);
        });

        Ok(std::process::id())
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, mut check: F) -> bool
where
    F: AsyncFnMut() -> bool,
{
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    check().await
}

pub fn relay_settings(title: &str) -> Settings {
    let mut settings = Settings::new(title);
    settings.host = "relay.example.com".to_string();
    settings.port = 4443;
    settings
}
