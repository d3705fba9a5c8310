//! Message codec for the controller/worker channel.
//!
//! Every frame carries a [`PipeCommand`]. [`PipeCommand::Protocol`] frames
//! hold one JSON [`ProtocolMessage`]; the remaining codes are the legacy
//! command set whose payload is either empty or a base64 settings blob.

use crate::PROTOCOL_VERSION;
use crate::error::protocol::ProtocolError;
use crate::pipe::PipeMessage;
use crate::settings::Settings;

use common::ErrorLocation;

use std::panic::Location;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const ACK_OK: &str = "ok";
pub const ACK_REJECTED: &str = "rejected";
pub const EVENT_MESSAGE: &str = "message";
/// Edge signal delivered locally after the first pong of a connection.
pub const RECONNECT_SIGNAL: &str = "reconnect";
pub const LOGOUT_PAYLOAD: &str = "logout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PipeCommand {
    Logout = 99,
    UpdateSettings = 100,
    UpdateRegister = 200,
    StopService = 300,
    Reconnect = 400,
    Protocol = 500,
    Ping = 666,
    Pong = 777,
}

impl PipeCommand {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            99 => Some(PipeCommand::Logout),
            100 => Some(PipeCommand::UpdateSettings),
            200 => Some(PipeCommand::UpdateRegister),
            300 => Some(PipeCommand::StopService),
            400 => Some(PipeCommand::Reconnect),
            500 => Some(PipeCommand::Protocol),
            666 => Some(PipeCommand::Ping),
            777 => Some(PipeCommand::Pong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    Hello {
        pid: u32,
        version: String,
    },
    HelloAck {
        ok: bool,
        server_time: u64,
    },
    SetUrl {
        id: String,
        url: String,
        opts: Settings,
    },
    Ack {
        id: String,
        status: String,
    },
    SocketEvent {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        info: Option<String>,
    },
    Ping {
        t: u64,
    },
    Pong {
        t: u64,
    },
}

impl ProtocolMessage {
    pub fn hello() -> Self {
        ProtocolMessage::Hello {
            pid: std::process::id(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn hello_ack() -> Self {
        ProtocolMessage::HelloAck {
            ok: true,
            server_time: now_millis(),
        }
    }

    pub fn set_url(settings: &Settings) -> Self {
        ProtocolMessage::SetUrl {
            id: Uuid::new_v4().to_string(),
            url: settings.uri(),
            opts: settings.clone(),
        }
    }

    pub fn ack(id: impl Into<String>, status: &str) -> Self {
        ProtocolMessage::Ack {
            id: id.into(),
            status: status.to_string(),
        }
    }

    /// Relay of one upstream message; the raw text travels as a JSON string.
    pub fn socket_message(text: &str) -> Self {
        ProtocolMessage::SocketEvent {
            event: EVENT_MESSAGE.to_string(),
            payload: Some(Value::String(text.to_string())),
            id: None,
            info: None,
        }
    }

    pub fn ping() -> Self {
        ProtocolMessage::Ping { t: now_millis() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolMessage::Hello { .. } => "hello",
            ProtocolMessage::HelloAck { .. } => "hello_ack",
            ProtocolMessage::SetUrl { .. } => "set_url",
            ProtocolMessage::Ack { .. } => "ack",
            ProtocolMessage::SocketEvent { .. } => "socket_event",
            ProtocolMessage::Ping { .. } => "ping",
            ProtocolMessage::Pong { .. } => "pong",
        }
    }

    #[track_caller]
    pub fn encode(&self) -> Result<PipeMessage, ProtocolError> {
        let json = serde_json::to_vec(self)?;
        Ok(PipeMessage::new(PipeCommand::Protocol.code(), json))
    }
}

/// A frame after command and payload have been interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Protocol(ProtocolMessage),
    Legacy { command: PipeCommand, payload: String },
}

/// Interpret a received frame.
///
/// Unknown command codes and malformed JSON are errors for the caller to
/// log; they never affect the channel itself.
#[track_caller]
pub fn decode(message: &PipeMessage) -> Result<Inbound, ProtocolError> {
    let command =
        PipeCommand::from_code(message.command).ok_or_else(|| ProtocolError::UnknownCommand {
            code: message.command,
            location: ErrorLocation::from(Location::caller()),
        })?;

    let text = message.text().map_err(|e| ProtocolError::Payload {
        message: format!("Payload for command {} is not UTF-8: {e}", message.command),
        location: ErrorLocation::from(Location::caller()),
    })?;

    match command {
        PipeCommand::Protocol => Ok(Inbound::Protocol(serde_json::from_str(text)?)),
        other => Ok(Inbound::Legacy {
            command: other,
            payload: text.to_string(),
        }),
    }
}

pub fn legacy(command: PipeCommand, payload: &str) -> PipeMessage {
    PipeMessage::new(command.code(), payload.as_bytes().to_vec())
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
