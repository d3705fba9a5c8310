//! Worker process runtime.
//!
//! The worker owns the upstream connection. It listens on its own pipe for
//! controller commands, announces itself once, and relays upstream traffic
//! back through [`WorkerDelivery`].

pub mod delivery;

pub use delivery::WorkerDelivery;

use crate::connection::{ConnectionController, ConnectionTiming, Upstream};
use crate::error::CoreError;
use crate::handshake::WorkerHandshake;
use crate::lifecycle::LivenessRecord;
use crate::notify::NotificationSink;
use crate::pipe::{ConnectPolicy, PipeMessage, PipeServerHandle, Rendezvous, listen};
use crate::protocol::{self, ACK_OK, ACK_REJECTED, Inbound, PipeCommand, ProtocolMessage};
use crate::settings::Settings;

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const INBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub state_dir: PathBuf,
    pub runtime_dir: PathBuf,
    pub timing: ConnectionTiming,
    pub policy: ConnectPolicy,
}

impl WorkerOptions {
    pub fn new(state_dir: impl Into<PathBuf>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            runtime_dir: runtime_dir.into(),
            timing: ConnectionTiming::default(),
            policy: ConnectPolicy::SHORT,
        }
    }
}

pub struct Worker {
    connection: ConnectionController,
    handshake: Arc<WorkerHandshake>,
    record: LivenessRecord,
    inbox: mpsc::Receiver<PipeMessage>,
    server: PipeServerHandle,
    router: JoinHandle<()>,
}

impl Worker {
    /// Claim the worker endpoint and build the connection, without
    /// connecting yet.
    ///
    /// # Errors
    ///
    /// * [`CoreError::Transport`] - The worker endpoint is owned by a live process
    pub async fn start(
        settings: Settings,
        options: WorkerOptions,
        upstream: impl Upstream,
        notifier: Arc<dyn NotificationSink>,
        device_id: String,
    ) -> Result<Self, CoreError> {
        let rendezvous = Rendezvous::new(settings.title.clone(), options.runtime_dir.clone());
        let (sink, inbox) = mpsc::channel(INBOX_CAPACITY);

        let server = listen(rendezvous.worker(), sink.clone()).await?;

        let record = LivenessRecord::in_dir(&options.state_dir);
        if let Err(e) = record.write(std::process::id()) {
            error!("Failed to write liveness record: {e}");
        }

        #[cfg(windows)]
        spawn_message_window(rendezvous.window_class(), sink);
        #[cfg(not(windows))]
        drop(sink);

        let handshake = Arc::new(WorkerHandshake::new(&rendezvous, options.policy));
        let (delivery, router) = WorkerDelivery::spawn(Arc::clone(&handshake), notifier);
        let connection = ConnectionController::new(
            settings,
            device_id,
            upstream,
            Arc::new(delivery),
            options.timing,
        );

        info!("Worker PID {} serving {}", std::process::id(), server.endpoint());

        Ok(Self {
            connection,
            handshake,
            record,
            inbox,
            server,
            router,
        })
    }

    pub fn connection(&self) -> &ConnectionController {
        &self.connection
    }

    /// Announce to the controller, then start bringing the connection up.
    ///
    /// Returns without waiting for the upstream so [`Self::serve`] can take
    /// a stop or new settings while the open is still in flight.
    pub async fn announce_and_connect(&self) {
        if !self.handshake.announce().await {
            warn!("No controller reachable, running unattended");
        }
        self.connection.start_detached();
    }

    /// Handle controller commands until the endpoint goes away.
    pub async fn serve(&mut self) {
        while let Some(message) = self.inbox.recv().await {
            self.handle(message).await;
        }
        warn!("Worker inbox closed");
    }

    pub async fn shutdown(self) {
        self.connection.stop().await;
        self.server.stop();
        self.router.abort();
        self.record.clear();
        info!("Worker shut down");
    }

    pub(crate) async fn handle(&self, message: PipeMessage) {
        match protocol::decode(&message) {
            Ok(Inbound::Protocol(message)) => self.on_protocol(message).await,
            Ok(Inbound::Legacy { command, payload }) => self.on_legacy(command, payload).await,
            Err(e) => warn!("Dropping controller frame: {e}"),
        }
    }

    async fn on_protocol(&self, message: ProtocolMessage) {
        match message {
            ProtocolMessage::HelloAck { ok, server_time } => {
                info!("Controller acknowledged hello (ok: {ok}, server time: {server_time})");
            }
            ProtocolMessage::SetUrl { id, url, mut opts } => {
                if opts.host.is_empty() {
                    warn!("Rejecting set_url {id}: no host in settings");
                    self.reply(ProtocolMessage::ack(id, ACK_REJECTED)).await;
                    return;
                }

                debug!("set_url {id}: {url}");
                let title = std::mem::take(&mut opts.title);
                opts.set_title(title);
                self.connection.update_settings(opts).await;
                if self.connection.is_stopped() {
                    info!("Restarting stopped connection for new settings");
                    self.connection.start_detached();
                }
                self.reply(ProtocolMessage::ack(id, ACK_OK)).await;
            }
            ProtocolMessage::Ping { t } => self.reply(ProtocolMessage::Pong { t }).await,
            other => debug!("Ignoring {} from controller", other.kind()),
        }
    }

    async fn on_legacy(&self, command: PipeCommand, payload: String) {
        match command {
            PipeCommand::UpdateSettings | PipeCommand::UpdateRegister => {
                match Settings::decode_launch_token(&payload) {
                    Ok(settings) => self.connection.update_settings(settings).await,
                    Err(e) => warn!("Ignoring settings blob for {command:?}: {e}"),
                }
            }
            PipeCommand::StopService | PipeCommand::Logout => {
                info!("Stop requested by controller ({command:?})");
                self.connection.stop().await;
            }
            PipeCommand::Reconnect => self.connection.reconnect(),
            PipeCommand::Ping | PipeCommand::Pong | PipeCommand::Protocol => {
                debug!("Ignoring legacy {command:?}");
            }
        }
    }

    async fn reply(&self, message: ProtocolMessage) {
        let kind = message.kind();
        if let Err(e) = self.handshake.send(&message).await {
            warn!("Failed to send {kind} to controller: {e}");
        }
    }
}

#[cfg(windows)]
fn spawn_message_window(class_name: String, sink: mpsc::Sender<PipeMessage>) {
    let spawned = std::thread::Builder::new()
        .name("relay-message-window".to_string())
        .spawn(move || {
            if let Err(e) = crate::pipe::win32::run_message_window(&class_name, sink) {
                error!("Message window {class_name} stopped: {e}");
            }
        });

    if let Err(e) = spawned {
        error!("Failed to start message window thread: {e}");
    }
}
