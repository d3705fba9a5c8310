//! Pipe accept loop.
//!
//! One peer is served at a time. Frames read from a peer are forwarded to
//! the owner's channel in arrival order; when the peer goes away the
//! endpoint is recreated (or re-accepted) and the loop waits again. The
//! loop only ends when the handle is stopped or the owner drops its
//! receiver.

use crate::error::transport::TransportError;
use crate::pipe::endpoint::{PipeConnection, PipeEndpoint};
use crate::pipe::frame::PipeMessage;

use common::ErrorLocation;

use std::panic::Location;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[cfg(unix)]
use crate::pipe::endpoint::probe_liveness;
#[cfg(unix)]
use tokio::net::UnixListener;
#[cfg(windows)]
use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
#[cfg(windows)]
use tokio::time::sleep as TokioSleep;

const RECREATE_DELAY: Duration = Duration::from_secs(1);
#[cfg(windows)]
const PIPE_BUFFER_SIZE: u32 = 4096;
#[cfg(windows)]
const MAX_INSTANCES: usize = 2;

/// Running accept loop. Dropping the handle stops it.
pub struct PipeServerHandle {
    endpoint: PipeEndpoint,
    task: JoinHandle<()>,
}

impl PipeServerHandle {
    pub fn endpoint(&self) -> &PipeEndpoint {
        &self.endpoint
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        if !self.task.is_finished() {
            info!("Stopping pipe server on {}", self.endpoint);
        }
        self.task.abort();

        #[cfg(unix)]
        if let Err(e) = std::fs::remove_file(self.endpoint.path())
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove socket {}: {e}", self.endpoint);
        }
    }
}

impl Drop for PipeServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start serving `endpoint`, forwarding every received frame into `sink`.
///
/// The endpoint is created before this returns, so a name already owned by
/// a live process is reported here rather than inside the loop.
pub async fn listen(
    endpoint: PipeEndpoint,
    sink: mpsc::Sender<PipeMessage>,
) -> Result<PipeServerHandle, TransportError> {
    #[cfg(unix)]
    let task = {
        let listener = bind_unix(&endpoint).await?;
        TokioSpawn(serve_unix(listener, endpoint.clone(), sink))
    };

    #[cfg(windows)]
    let task = {
        let server = create_instance(&endpoint, true)?;
        TokioSpawn(serve_windows(server, endpoint.clone(), sink))
    };

    info!("Pipe server listening on {endpoint}");

    Ok(PipeServerHandle { endpoint, task })
}

/// Forward frames from one peer until it disconnects.
///
/// Returns `false` when the owner stopped listening for messages.
async fn drain_peer(mut connection: PipeConnection, sink: &mpsc::Sender<PipeMessage>) -> bool {
    loop {
        match connection.receive().await {
            Ok(Some(message)) => {
                trace!(
                    "Received command {} ({} bytes) from {}",
                    message.command,
                    message.payload.len(),
                    connection.peer()
                );
                if sink.send(message).await.is_err() {
                    warn!("Pipe message receiver dropped, closing server");
                    return false;
                }
            }
            Ok(None) => {
                debug!("Peer on {} disconnected", connection.peer());
                return true;
            }
            Err(e) => {
                warn!("Dropping peer on {}: {e}", connection.peer());
                return true;
            }
        }
    }
}

#[cfg(unix)]
async fn bind_unix(endpoint: &PipeEndpoint) -> Result<UnixListener, TransportError> {
    let path = endpoint.path();

    if path.exists() {
        if probe_liveness(endpoint).await {
            return Err(TransportError::Listen {
                message: format!("{endpoint} is already served by another process"),
                location: ErrorLocation::from(Location::caller()),
            });
        }
        debug!("Removing stale socket {endpoint}");
        std::fs::remove_file(path)?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    UnixListener::bind(path).map_err(|e| TransportError::Listen {
        message: format!("Failed to bind {endpoint}: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })
}

#[cfg(unix)]
async fn serve_unix(listener: UnixListener, endpoint: PipeEndpoint, sink: mpsc::Sender<PipeMessage>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                debug!("Peer connected on {endpoint}");
                let connection = PipeConnection::new(stream, endpoint.address());
                if !drain_peer(connection, &sink).await {
                    return;
                }
            }
            Err(e) => {
                error!("Accept failed on {endpoint}: {e}");
                tokio::time::sleep(RECREATE_DELAY).await;
            }
        }
    }
}

#[cfg(windows)]
#[track_caller]
fn create_instance(endpoint: &PipeEndpoint, first: bool) -> Result<NamedPipeServer, TransportError> {
    ServerOptions::new()
        .first_pipe_instance(first)
        .max_instances(MAX_INSTANCES)
        .in_buffer_size(PIPE_BUFFER_SIZE)
        .out_buffer_size(PIPE_BUFFER_SIZE)
        .create(endpoint.address())
        .map_err(|e| TransportError::Listen {
            message: format!("Failed to create pipe {endpoint}: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })
}

/// Peers are still drained one at a time. The spare instance exists so a
/// client arriving between peers queues on it instead of finding no pipe.
#[cfg(windows)]
async fn serve_windows(
    mut server: NamedPipeServer,
    endpoint: PipeEndpoint,
    sink: mpsc::Sender<PipeMessage>,
) {
    loop {
        let connected = server.connect().await;
        let spare = create_instance(&endpoint, false);

        match connected {
            Ok(()) => {
                debug!("Peer connected on {endpoint}");
                let connection = PipeConnection::new(server, endpoint.address());
                if !drain_peer(connection, &sink).await {
                    return;
                }
            }
            Err(e) => {
                warn!("Waiting for peer on {endpoint} failed: {e}");
                drop(server);
            }
        }

        server = match spare {
            Ok(next) => next,
            Err(e) => {
                error!("{e}");
                loop {
                    TokioSleep(RECREATE_DELAY).await;
                    match create_instance(&endpoint, true) {
                        Ok(next) => break next,
                        Err(e) => error!("{e}"),
                    }
                }
            }
        };
    }
}
