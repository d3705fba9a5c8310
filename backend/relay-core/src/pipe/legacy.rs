//! Window-message side-channel.
//!
//! Frames travel as `WM_COPYDATA`: the command in `dwData` and the payload as
//! null-terminated UTF-16 in `lpData`. The readiness sentinel is marked by
//! its declared length instead of a real payload. Encoding and decoding are
//! platform neutral; only the send and the message window need Win32.

use crate::error::transport::TransportError;
use crate::pipe::Transport;
use crate::pipe::frame::PipeMessage;
use crate::protocol::PipeCommand;

use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

#[cfg(not(windows))]
use common::ErrorLocation;
#[cfg(not(windows))]
use std::panic::Location;

pub const LEGACY_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// How the receiving window is located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyTarget {
    WindowClass(String),
    WindowTitle(String),
}

/// A frame in its window-message shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowFrame {
    pub command: usize,
    pub data: Vec<u8>,
}

impl WindowFrame {
    pub fn declared_len(&self) -> u32 {
        u32::try_from(self.data.len()).unwrap_or(u32::MAX)
    }
}

/// Best-effort delivery through `WM_COPYDATA`, bounded by the OS send timeout.
#[derive(Debug, Clone)]
pub struct LegacyBroadcastTransport {
    target: LegacyTarget,
    timeout: Duration,
}

impl LegacyBroadcastTransport {
    pub fn new(target: LegacyTarget) -> Self {
        Self {
            target,
            timeout: LEGACY_SEND_TIMEOUT,
        }
    }

    pub fn target(&self) -> &LegacyTarget {
        &self.target
    }
}

impl Transport for LegacyBroadcastTransport {
    fn name(&self) -> &'static str {
        "window-message"
    }

    #[cfg(windows)]
    fn send<'a>(&'a self, message: &'a PipeMessage) -> BoxFuture<'a, Result<(), TransportError>> {
        let target = self.target.clone();
        let timeout = self.timeout;
        let frame = encode_window_message(message);

        async move {
            tokio::task::spawn_blocking(move || {
                crate::pipe::win32::send_copy_data(&target, frame, timeout)
            })
            .await
            .map_err(|e| TransportError::Io {
                message: format!("Window message task failed: {e}"),
                location: common::ErrorLocation::from(std::panic::Location::caller()),
            })?
        }
        .boxed()
    }

    #[cfg(not(windows))]
    fn send<'a>(&'a self, message: &'a PipeMessage) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            Err(TransportError::Unsupported {
                message: format!(
                    "Window messages are unavailable on this platform (command {} to {:?}, timeout {:?})",
                    message.command, self.target, self.timeout
                ),
                location: ErrorLocation::from(Location::caller()),
            })
        }
        .boxed()
    }
}

pub fn encode_window_message(message: &PipeMessage) -> WindowFrame {
    let pong = PipeCommand::Pong.code();

    if message.command == pong {
        return WindowFrame {
            command: pong as usize,
            data: vec![0u8; pong as usize],
        };
    }

    WindowFrame {
        command: message.command as usize,
        data: encode_window_payload(&String::from_utf8_lossy(&message.payload)),
    }
}

/// Turn a received `WM_COPYDATA` back into a frame.
pub fn decode_window_message(command: usize, declared_len: u32, data: &[u8]) -> PipeMessage {
    let pong = PipeCommand::Pong.code();

    if declared_len == pong || command == pong as usize {
        return PipeMessage::empty(pong);
    }

    let command = u32::try_from(command).unwrap_or(u32::MAX);
    PipeMessage::new(command, decode_window_payload(data).into_bytes())
}

pub fn encode_window_payload(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

pub fn decode_window_payload(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
