//! Transport Channel between controller and worker.
//!
//! The primary channel is a named pipe (a Unix domain socket off Windows)
//! carrying length-prefixed frames. A legacy side-channel delivers the same
//! frames as OS window messages. Both sit behind [`Transport`] so callers
//! pick a delivery policy instead of branching on the channel.

pub mod endpoint;
pub mod frame;
pub mod legacy;
pub mod server;
#[cfg(windows)]
pub(crate) mod win32;

pub use endpoint::{ConnectPolicy, PipeConnection, PipeEndpoint, Rendezvous, connect_client, probe_liveness};
pub use frame::{MAX_FRAME_LEN, PipeMessage};
pub use legacy::{LegacyBroadcastTransport, LegacyTarget};
pub use server::{PipeServerHandle, listen};

use crate::error::transport::TransportError;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, warn};

/// One-way delivery of frames to a peer.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn send<'a>(&'a self, message: &'a PipeMessage) -> BoxFuture<'a, Result<(), TransportError>>;
}

/// Connect, write, disconnect.
#[derive(Debug, Clone)]
pub struct PipeTransport {
    endpoint: PipeEndpoint,
    policy: ConnectPolicy,
}

impl PipeTransport {
    pub fn new(endpoint: PipeEndpoint, policy: ConnectPolicy) -> Self {
        Self { endpoint, policy }
    }

    pub fn endpoint(&self) -> &PipeEndpoint {
        &self.endpoint
    }

    /// Send several frames on one connection, preserving their order.
    pub async fn send_all(&self, messages: &[PipeMessage]) -> Result<(), TransportError> {
        let mut connection = connect_client(&self.endpoint, self.policy).await?;
        for message in messages {
            connection.send(message).await?;
        }
        connection.close().await;
        Ok(())
    }
}

impl Transport for PipeTransport {
    fn name(&self) -> &'static str {
        "pipe"
    }

    fn send<'a>(&'a self, message: &'a PipeMessage) -> BoxFuture<'a, Result<(), TransportError>> {
        self.send_all(std::slice::from_ref(message)).boxed()
    }
}

/// Primary transport with a best-effort fallback.
///
/// The fallback only runs when the primary could not reach its peer at all;
/// a failure after a successful connect is returned as is.
pub struct FallbackTransport {
    primary: Box<dyn Transport>,
    fallback: Box<dyn Transport>,
}

impl FallbackTransport {
    pub fn new(primary: impl Transport + 'static, fallback: impl Transport + 'static) -> Self {
        Self {
            primary: Box::new(primary),
            fallback: Box::new(fallback),
        }
    }
}

impl Transport for FallbackTransport {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn send<'a>(&'a self, message: &'a PipeMessage) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            match self.primary.send(message).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_connect() => {
                    warn!(
                        "{} unreachable, trying {} for command {}: {e}",
                        self.primary.name(),
                        self.fallback.name(),
                        message.command
                    );
                    self.fallback.send(message).await
                }
                Err(e) => {
                    debug!("{} failed after connect: {e}", self.primary.name());
                    Err(e)
                }
            }
        }
        .boxed()
    }
}
