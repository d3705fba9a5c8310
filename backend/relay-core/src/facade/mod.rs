//! Controller façade: the entry points the UI bridge calls.
//!
//! Each entry point is a single-shot `async fn`. The façade owns the
//! [`Session`], keeps the controller pipe server alive for worker hellos and
//! relayed events, and drives the [`WorkerLifecycle`] on Initialize.

pub mod session;
pub mod types;

pub use session::{EventSink, Session};
pub use types::{ConnectionMode, ConnectionType, InboundMessage, PlatformSettings, User};

use crate::error::CoreError;
use crate::handshake::{ControllerHandshake, HandshakeTiming, ReadySource, await_worker};
use crate::lifecycle::process::is_alive;
use crate::lifecycle::{LivenessRecord, WorkerLauncher, WorkerLifecycle, WorkerStatus};
use crate::notify::NotificationSink;
use crate::pipe::legacy::decode_window_message;
use crate::pipe::{ConnectPolicy, PipeMessage, PipeServerHandle, Rendezvous, listen};
use crate::protocol::{self, ACK_REJECTED, EVENT_MESSAGE, Inbound, PipeCommand, ProtocolMessage, now_millis};
use crate::settings::Settings;
use crate::settings::identity::DeviceIdentity;

use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::spawn as TokioSpawn;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;

const INBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct FacadeConfig {
    pub title: String,
    pub state_dir: PathBuf,
    pub runtime_dir: PathBuf,
    /// Directory the app's bundled assets are resolved against.
    pub app_dir: PathBuf,
    pub handshake: HandshakeTiming,
    pub policy: ConnectPolicy,
}

impl FacadeConfig {
    pub fn new(
        title: impl Into<String>,
        state_dir: impl Into<PathBuf>,
        runtime_dir: impl Into<PathBuf>,
    ) -> Self {
        let state_dir = state_dir.into();
        Self {
            title: title.into(),
            app_dir: state_dir.clone(),
            state_dir,
            runtime_dir: runtime_dir.into(),
            handshake: HandshakeTiming::default(),
            policy: ConnectPolicy::HANDSHAKE,
        }
    }
}

/// External collaborators of the façade.
#[derive(Clone)]
pub struct Collaborators {
    pub launcher: Arc<dyn WorkerLauncher>,
    pub identity: Arc<dyn DeviceIdentity>,
    pub events: Arc<dyn EventSink>,
    pub notifier: Arc<dyn NotificationSink>,
}

struct Listener {
    server: PipeServerHandle,
    dispatcher: JoinHandle<()>,
}

struct Shared {
    config: FacadeConfig,
    session: Session,
    lifecycle: WorkerLifecycle,
    handshake: ControllerHandshake,
    identity: Arc<dyn DeviceIdentity>,
    notifier: Arc<dyn NotificationSink>,
    listener: AsyncMutex<Option<Listener>>,
    rendezvous: Rendezvous,
}

#[derive(Clone)]
pub struct ControllerFacade {
    shared: Arc<Shared>,
}

impl ControllerFacade {
    /// `retry` is the spawn counter inherited from our own launch arguments.
    pub fn new(config: FacadeConfig, collaborators: Collaborators, retry: u32) -> Self {
        let rendezvous = Rendezvous::new(config.title.clone(), config.runtime_dir.clone());
        let lifecycle = WorkerLifecycle::new(
            &rendezvous,
            LivenessRecord::in_dir(&config.state_dir),
            collaborators.launcher,
            retry,
        );
        let handshake = ControllerHandshake::new(&rendezvous, config.policy);
        let session = Session::new(Settings::new(config.title.clone()), collaborators.events);

        Self {
            shared: Arc::new(Shared {
                config,
                session,
                lifecycle,
                handshake,
                identity: collaborators.identity,
                notifier: collaborators.notifier,
                listener: AsyncMutex::new(None),
                rendezvous,
            }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.shared.session
    }

    pub fn lifecycle(&self) -> &WorkerLifecycle {
        &self.shared.lifecycle
    }

    pub fn rendezvous(&self) -> &Rendezvous {
        &self.shared.rendezvous
    }

    // ============================================
    // Entry points
    // ============================================

    /// Configure the session and make sure a worker is running with it.
    ///
    /// # Errors
    ///
    /// * [`CoreError::Spawn`] - The worker spawn limit has been reached
    pub async fn initialize(
        &self,
        system_type: i64,
        platform: Option<PlatformSettings>,
        mode: ConnectionMode,
    ) -> Result<bool, CoreError> {
        let Some(platform) = platform else {
            warn!("Initialize called without platform settings");
            return Ok(false);
        };

        let app_dir = self.shared.config.app_dir.clone();
        let settings = self
            .shared
            .session
            .update(|settings| {
                settings.app_pid = std::process::id();
                settings.system_type = system_type;
                platform.apply(settings, &app_dir);
                mode.apply(settings);
            })
            .await;

        if !self
            .shared
            .notifier
            .register(&platform.bundle_id, &platform.display_name, &settings.icon_path)
        {
            warn!("Notification identity registration failed");
        }

        if let Err(e) = self.ensure_listening().await {
            error!("Controller endpoint unavailable: {e}");
        }

        let lifecycle = &self.shared.lifecycle;
        match lifecycle.ensure_worker(&settings).await {
            Ok(WorkerStatus::Running) => {
                self.push_settings(&settings).await;
                Ok(true)
            }
            Ok(WorkerStatus::InProgress) => Ok(true),
            Ok(WorkerStatus::Spawned(pid)) => {
                let ready = self.shared.handshake.signal().arm();
                match await_worker(lifecycle, ready, self.shared.config.handshake).await {
                    Some(source) => {
                        info!("Worker PID {pid} ready ({source:?})");
                        lifecycle.mark_ready();
                        if !matches!(source, ReadySource::Hello { .. }) {
                            let settings = self.shared.session.settings().await;
                            self.push_settings(&settings).await;
                        }
                        Ok(true)
                    }
                    None => {
                        lifecycle.mark_failed();
                        Ok(false)
                    }
                }
            }
            Err(e) if e.is_limit() => Err(e.into()),
            Err(e) => {
                error!("Failed to start worker: {e}");
                Ok(false)
            }
        }
    }

    /// Update the connection target. `ssids` has no meaning on desktop.
    pub async fn config(&self, mode: ConnectionMode, ssids: &[String]) -> bool {
        if !ssids.is_empty() {
            debug!("Ignoring {} SSID filters", ssids.len());
        }

        let settings = self.shared.session.update(|settings| mode.apply(settings)).await;
        self.push_if_initialized(&settings).await
    }

    pub async fn register_user(&self, user: User) -> bool {
        let settings = self.shared.session.update(|settings| user.apply(settings)).await;
        self.push_if_initialized(&settings).await
    }

    pub async fn request_permission(&self) -> bool {
        true
    }

    pub async fn start(&self) -> bool {
        true
    }

    /// Ask the worker to drop its connection.
    ///
    /// Nothing to stop counts as success.
    pub async fn stop(&self) -> bool {
        match self.shared.handshake.send_stop().await {
            Ok(()) => {
                info!("Stop sent to worker");
                true
            }
            Err(e) => {
                if self.worker_recorded_alive().await {
                    error!("Worker is alive but unreachable for stop: {e}");
                    false
                } else {
                    debug!("No worker to stop: {e}");
                    true
                }
            }
        }
    }

    /// Round-trip check; the worker's pong arrives on the controller pipe.
    pub async fn ping_worker(&self) -> bool {
        match self.shared.handshake.send_ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Worker ping failed: {e}");
                false
            }
        }
    }

    pub async fn device_id(&self) -> String {
        self.shared.identity.machine_id().unwrap_or_else(|e| {
            warn!("Device id unavailable: {e}");
            String::new()
        })
    }

    pub async fn flutter_api_ready(&self) {
        info!("UI bridge ready");
        self.shared.session.mark_api_ready();
    }

    /// A toast was clicked; its argument is the base64 of the original message.
    pub fn on_notification_activated(&self, argument: &str) -> bool {
        let decoded = BASE64
            .decode(argument.trim())
            .map_err(|e| e.to_string())
            .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()));

        match decoded {
            Ok(data) => {
                self.shared.session.deliver(InboundMessage {
                    from_notification: true,
                    data,
                });
                true
            }
            Err(e) => {
                warn!("Ignoring notification activation: {e}");
                false
            }
        }
    }

    /// Entry for a host that owns the app window's message loop.
    pub async fn handle_window_message(&self, command: usize, declared_len: u32, data: &[u8]) {
        let message = decode_window_message(command, declared_len, data);
        self.shared.on_frame(message).await;
    }

    pub async fn shutdown(&self) {
        if let Some(listener) = self.shared.listener.lock().await.take() {
            listener.server.stop();
            listener.dispatcher.abort();
        }
    }

    // ============================================
    // Internals
    // ============================================

    async fn ensure_listening(&self) -> Result<(), CoreError> {
        let mut listener = self.shared.listener.lock().await;
        if listener.as_ref().is_some_and(|l| l.server.is_running()) {
            return Ok(());
        }

        let (sink, mut inbox) = mpsc::channel(INBOX_CAPACITY);
        let server = listen(self.shared.rendezvous.controller(), sink).await?;

        let shared = Arc::clone(&self.shared);
        let dispatcher = TokioSpawn(async move {
            while let Some(message) = inbox.recv().await {
                shared.on_frame(message).await;
            }
        });

        *listener = Some(Listener { server, dispatcher });
        Ok(())
    }

    async fn push_settings(&self, settings: &Settings) -> bool {
        match self.shared.handshake.push_settings(settings).await {
            Ok(()) => {
                debug!("Settings pushed to worker");
                true
            }
            Err(e) => {
                warn!("Failed to push settings to worker: {e}");
                false
            }
        }
    }

    async fn push_if_initialized(&self, settings: &Settings) -> bool {
        if !self.shared.lifecycle.is_initialized() {
            debug!("Settings stored, worker not initialized yet");
            return true;
        }
        self.push_settings(settings).await
    }

    async fn worker_recorded_alive(&self) -> bool {
        let Some(pid) = self.shared.lifecycle.record().read() else {
            return false;
        };
        tokio::task::spawn_blocking(move || is_alive(pid))
            .await
            .unwrap_or(false)
    }
}

impl Shared {
    async fn on_frame(&self, message: PipeMessage) {
        match protocol::decode(&message) {
            Ok(Inbound::Protocol(message)) => self.on_protocol(message).await,
            Ok(Inbound::Legacy {
                command: PipeCommand::Pong,
                ..
            }) => self.handshake.on_sentinel(),
            Ok(Inbound::Legacy { command, .. }) => debug!("Ignoring legacy {command:?} from worker"),
            Err(e) => warn!("Dropping worker frame: {e}"),
        }
    }

    async fn on_protocol(&self, message: ProtocolMessage) {
        match message {
            ProtocolMessage::Hello { pid, version } => {
                let settings = self.session.settings().await;
                self.handshake.on_hello(pid, version, &settings).await;
            }
            ProtocolMessage::SocketEvent { event, payload, .. } if event == EVENT_MESSAGE => {
                let data = match payload {
                    Some(Value::String(text)) => text,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                self.session.deliver(InboundMessage {
                    from_notification: false,
                    data,
                });
            }
            ProtocolMessage::Ack { id, status } => {
                if status == ACK_REJECTED {
                    warn!("Worker rejected settings {id}");
                } else {
                    debug!("Worker acknowledged {id}: {status}");
                }
            }
            ProtocolMessage::Pong { t } => {
                debug!("Worker pong after {}ms", now_millis().saturating_sub(t));
            }
            other => debug!("Ignoring {} from worker", other.kind()),
        }
    }
}
