//! Length-prefixed framing shared by every pipe connection.
//!
//! A frame is three fields written in order: command (`u32` LE), payload
//! length (`u32` LE), then exactly that many payload bytes. Running out of
//! bytes anywhere after the first byte of a frame fails the exchange.

use crate::error::transport::TransportError;

use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;
use std::str::Utf8Error;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a declared payload length.
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeMessage {
    pub command: u32,
    pub payload: Vec<u8>,
}

impl PipeMessage {
    pub fn new(command: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    pub fn empty(command: u32) -> Self {
        Self::new(command, Vec::new())
    }

    pub fn text(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}

/// Write one frame and flush.
pub async fn write_message<W>(writer: &mut W, message: &PipeMessage) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let length = u32::try_from(message.payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| TransportError::Frame {
            message: format!(
                "Payload of {} bytes exceeds frame limit {MAX_FRAME_LEN}",
                message.payload.len()
            ),
            location: ErrorLocation::from(Location::caller()),
        })?;

    writer
        .write_all(&message.command.to_le_bytes())
        .await
        .map_err(|e| partial("command", e))?;
    writer
        .write_all(&length.to_le_bytes())
        .await
        .map_err(|e| partial("length", e))?;
    if length > 0 {
        writer
            .write_all(&message.payload)
            .await
            .map_err(|e| partial("payload", e))?;
    }
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed cleanly between frames.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<PipeMessage>, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut command = [0u8; 4];
    let first = reader.read(&mut command).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < command.len() {
        reader
            .read_exact(&mut command[first..])
            .await
            .map_err(|e| partial("command", e))?;
    }

    let mut length = [0u8; 4];
    reader
        .read_exact(&mut length)
        .await
        .map_err(|e| partial("length", e))?;
    let length = u32::from_le_bytes(length);

    if length > MAX_FRAME_LEN {
        return Err(TransportError::Frame {
            message: format!("Declared length {length} exceeds frame limit {MAX_FRAME_LEN}"),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    let mut payload = vec![0u8; length as usize];
    if length > 0 {
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| partial("payload", e))?;
    }

    Ok(Some(PipeMessage {
        command: u32::from_le_bytes(command),
        payload,
    }))
}

#[track_caller]
fn partial(field: &str, error: IoError) -> TransportError {
    TransportError::Frame {
        message: format!("Incomplete {field} field: {error}"),
        location: ErrorLocation::from(Location::caller()),
    }
}
