//! Rendezvous naming and the client side of the pipe.

use crate::error::transport::TransportError;
use crate::pipe::frame::{PipeMessage, read_message, write_message};
use crate::settings::notification_title;
use crate::{CONTROLLER_PIPE_SUFFIX, PIPE_SUFFIX};

use common::ErrorLocation;

use std::fmt::{Display, Formatter, Result as FormatResult};
use std::io::Error as IoError;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::sleep as TokioSleep;

#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;
#[cfg(windows)]
use windows_sys::Win32::Foundation::ERROR_PIPE_BUSY;

#[cfg(windows)]
const PIPE_PREFIX: &str = r"\\.\pipe\";
#[cfg(not(windows))]
const SOCKET_EXTENSION: &str = "sock";

/// Well-known names both peers derive from the app title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendezvous {
    title: String,
    runtime_dir: PathBuf,
}

impl Rendezvous {
    /// `runtime_dir` only matters where endpoints are socket files.
    pub fn new(title: impl Into<String>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            title: title.into(),
            runtime_dir: runtime_dir.into(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn base_name(&self) -> String {
        format!("{}{PIPE_SUFFIX}", self.title)
    }

    /// Endpoint the worker listens on.
    pub fn worker(&self) -> PipeEndpoint {
        PipeEndpoint::named(&self.runtime_dir, &self.base_name())
    }

    /// Endpoint the controller listens on.
    pub fn controller(&self) -> PipeEndpoint {
        PipeEndpoint::named(
            &self.runtime_dir,
            &format!("{}{CONTROLLER_PIPE_SUFFIX}", self.base_name()),
        )
    }

    /// Class name of the worker's legacy message window.
    pub fn window_class(&self) -> String {
        notification_title(&self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipeEndpoint {
    address: String,
}

impl PipeEndpoint {
    #[cfg(windows)]
    fn named(_runtime_dir: &Path, name: &str) -> Self {
        Self {
            address: format!("{PIPE_PREFIX}{name}"),
        }
    }

    #[cfg(not(windows))]
    fn named(runtime_dir: &Path, name: &str) -> Self {
        Self {
            address: runtime_dir
                .join(format!("{name}.{SOCKET_EXTENSION}"))
                .to_string_lossy()
                .into_owned(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.address)
    }
}

impl Display for PipeEndpoint {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FormatResult {
        formatter.write_str(&self.address)
    }
}

/// How hard a client tries when the endpoint reports busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl ConnectPolicy {
    /// Controller pushing to a worker that may be mid-handshake.
    pub const HANDSHAKE: ConnectPolicy = ConnectPolicy {
        max_attempts: 50,
        backoff: Duration::from_millis(100),
    };

    /// Worker reaching the controller.
    pub const SHORT: ConnectPolicy = ConnectPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(200),
    };

    /// Single liveness probe.
    pub const PROBE: ConnectPolicy = ConnectPolicy {
        max_attempts: 1,
        backoff: Duration::ZERO,
    };
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self::HANDSHAKE
    }
}

pub trait PipeStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> PipeStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// One open pipe connection, either side.
pub struct PipeConnection {
    stream: Box<dyn PipeStream>,
    peer: String,
}

impl PipeConnection {
    pub fn new(stream: impl PipeStream + 'static, peer: impl Into<String>) -> Self {
        Self {
            stream: Box::new(stream),
            peer: peer.into(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send(&mut self, message: &PipeMessage) -> Result<(), TransportError> {
        write_message(self.stream.as_mut(), message).await
    }

    /// `Ok(None)` once the peer has disconnected.
    pub async fn receive(&mut self) -> Result<Option<PipeMessage>, TransportError> {
        read_message(self.stream.as_mut()).await
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            trace!("Ignoring shutdown error for {}: {e}", self.peer);
        }
    }
}

/// Connect to `endpoint`, retrying only while it reports busy.
pub async fn connect_client(
    endpoint: &PipeEndpoint,
    policy: ConnectPolicy,
) -> Result<PipeConnection, TransportError> {
    let mut schedule = Constant::new(policy.backoff);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match open_client(endpoint).await {
            Ok(connection) => {
                trace!("Connected to {endpoint} on attempt {attempt}");
                return Ok(connection);
            }
            Err(e) if is_busy(&e) && attempt < policy.max_attempts => {
                let delay = schedule.next_backoff().unwrap_or(policy.backoff);
                trace!("{endpoint} busy, retrying after {delay:?}");
                TokioSleep(delay).await;
            }
            Err(e) => {
                debug!("Connect to {endpoint} failed after {attempt} attempt(s): {e}");
                return Err(TransportError::Connect {
                    message: format!("Failed to connect to {endpoint}: {e}"),
                    location: ErrorLocation::from(Location::caller()),
                    source: e,
                });
            }
        }
    }
}

/// True when something is accepting on `endpoint` right now.
pub async fn probe_liveness(endpoint: &PipeEndpoint) -> bool {
    match connect_client(endpoint, ConnectPolicy::PROBE).await {
        Ok(connection) => {
            connection.close().await;
            true
        }
        Err(_) => false,
    }
}

#[cfg(unix)]
async fn open_client(endpoint: &PipeEndpoint) -> Result<PipeConnection, IoError> {
    let stream = UnixStream::connect(endpoint.path()).await?;
    Ok(PipeConnection::new(stream, endpoint.address()))
}

#[cfg(windows)]
async fn open_client(endpoint: &PipeEndpoint) -> Result<PipeConnection, IoError> {
    let client = ClientOptions::new().open(endpoint.address())?;
    Ok(PipeConnection::new(client, endpoint.address()))
}

#[cfg(windows)]
fn is_busy(error: &IoError) -> bool {
    error.raw_os_error() == Some(ERROR_PIPE_BUSY as i32)
}

#[cfg(not(windows))]
fn is_busy(error: &IoError) -> bool {
    error.kind() == std::io::ErrorKind::WouldBlock
}
