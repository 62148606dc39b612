//! Socket message types

use crate::error::WebSocketError;
use roomcast_pubsub::Payload;
use serde::{de::DeserializeOwned, Serialize};
use std::borrow::Cow;
use tungstenite::protocol::frame::coding::CloseCode as WireCloseCode;

/// A message sent or received on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message (UTF-8 encoded)
    Text(String),
    /// Binary message
    Binary(Vec<u8>),
    /// Ping message
    Ping(Vec<u8>),
    /// Pong message
    Pong(Vec<u8>),
    /// Close message
    Close(Option<CloseFrame>),
}

impl Message {
    /// Create a text message
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a binary message
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary(data.into())
    }

    /// Create a JSON text message from a serializable type
    pub fn json<T: Serialize>(value: &T) -> Result<Self, WebSocketError> {
        serde_json::to_string(value)
            .map(Self::Text)
            .map_err(|e| WebSocketError::serialization_error(e.to_string()))
    }

    /// Try to deserialize a text message as JSON
    pub fn as_json<T: DeserializeOwned>(&self) -> Result<T, WebSocketError> {
        match self {
            Self::Text(text) => serde_json::from_str(text)
                .map_err(|e| WebSocketError::deserialization_error(e.to_string())),
            _ => Err(WebSocketError::deserialization_error(
                "Expected text message for JSON deserialization",
            )),
        }
    }

    /// Check if this is a text message
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Check if this is a binary message
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Check if this is a close message
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }

    /// Get the text content if this is a text message
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Get the binary content if this is a binary message
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(data) => Some(data),
            _ => None,
        }
    }

    /// The data message as a room payload, keeping the text/binary distinction
    ///
    /// Control messages have no payload form.
    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Self::Text(text) => Some(Payload::Text(text)),
            Self::Binary(data) => Some(Payload::binary(data)),
            _ => None,
        }
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data)
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Self::Binary(data.to_vec())
    }
}

/// Room payloads go out with the frame type they were published with
impl From<Payload> for Message {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => Self::Text(text),
            Payload::Binary(data) => Self::Binary(data.to_vec()),
        }
    }
}

impl From<tungstenite::Message> for Message {
    fn from(msg: tungstenite::Message) -> Self {
        match msg {
            tungstenite::Message::Text(text) => Self::Text(text),
            tungstenite::Message::Binary(data) => Self::Binary(data),
            tungstenite::Message::Ping(data) => Self::Ping(data),
            tungstenite::Message::Pong(data) => Self::Pong(data),
            tungstenite::Message::Close(frame) => Self::Close(frame.map(CloseFrame::from)),
            // Raw frames only surface when writing, never when reading
            tungstenite::Message::Frame(frame) => Self::Binary(frame.into_data()),
        }
    }
}

impl From<Message> for tungstenite::Message {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => tungstenite::Message::Text(text),
            Message::Binary(data) => tungstenite::Message::Binary(data),
            Message::Ping(data) => tungstenite::Message::Ping(data),
            Message::Pong(data) => tungstenite::Message::Pong(data),
            Message::Close(frame) => tungstenite::Message::Close(frame.map(Into::into)),
        }
    }
}

/// Close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close code
    pub code: CloseCode,
    /// Close reason
    pub reason: Cow<'static, str>,
}

impl CloseFrame {
    /// Create a new close frame
    pub fn new(code: CloseCode, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Create a normal close frame
    pub fn normal() -> Self {
        Self::new(CloseCode::Normal, "")
    }

    /// Close frame sent when a handler fails
    pub fn internal_error() -> Self {
        Self::new(CloseCode::Error, "internal error")
    }
}

impl From<tungstenite::protocol::CloseFrame<'_>> for CloseFrame {
    fn from(frame: tungstenite::protocol::CloseFrame<'_>) -> Self {
        Self {
            code: CloseCode::from(u16::from(frame.code)),
            reason: Cow::Owned(frame.reason.into_owned()),
        }
    }
}

impl From<CloseFrame> for tungstenite::protocol::CloseFrame<'static> {
    fn from(frame: CloseFrame) -> Self {
        Self {
            code: WireCloseCode::from(frame.code.as_u16()),
            reason: frame.reason,
        }
    }
}

/// Close status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// Normal closure (1000)
    Normal,
    /// Going away (1001)
    Away,
    /// Protocol error (1002)
    Protocol,
    /// Unsupported data (1003)
    Unsupported,
    /// No status received (1005)
    Status,
    /// Abnormal closure (1006)
    Abnormal,
    /// Policy violation (1008)
    Policy,
    /// Message too big (1009)
    Size,
    /// Internal error (1011)
    Error,
    /// Any other code
    Other(u16),
}

impl CloseCode {
    /// Get the numeric code
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Away => 1001,
            Self::Protocol => 1002,
            Self::Unsupported => 1003,
            Self::Status => 1005,
            Self::Abnormal => 1006,
            Self::Policy => 1008,
            Self::Size => 1009,
            Self::Error => 1011,
            Self::Other(code) => *code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1008 => Self::Policy,
            1009 => Self::Size,
            1011 => Self::Error,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}
