//! Transport framing
//!
//! Every payload relayed through a transport carries a one byte marker in
//! front of it so the receiving side can tell UTF-8 text from raw bytes:
//!
//! ```text
//! +--------+------------------------+
//! | marker | payload                |
//! +--------+------------------------+
//!   b's'     UTF-8 text
//!   b'b'     raw bytes
//! ```
//!
//! Frames starting with any other byte were not written by this codec and
//! decode to `None`.

use bytes::{BufMut, Bytes, BytesMut};

/// Marker for UTF-8 text payloads
pub const STRING_MARKER: u8 = b's';

/// Marker for binary payloads
pub const BINARY_MARKER: u8 = b'b';

/// Runtime type of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// UTF-8 text
    String,
    /// Raw bytes
    Binary,
}

impl PayloadKind {
    /// The marker byte written in front of payloads of this kind
    pub fn marker(self) -> u8 {
        match self {
            Self::String => STRING_MARKER,
            Self::Binary => BINARY_MARKER,
        }
    }

    /// Map a marker byte back to its kind
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            STRING_MARKER => Some(Self::String),
            BINARY_MARKER => Some(Self::Binary),
            _ => None,
        }
    }
}

/// A room payload, either text or bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Binary(Bytes),
}

impl Payload {
    /// Create a text payload
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a binary payload
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// The kind of this payload
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Text(_) => PayloadKind::String,
            Self::Binary(_) => PayloadKind::Binary,
        }
    }

    /// Raw payload bytes, without marker
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Text content, if this is a text payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload has no content
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

impl From<&[u8]> for Payload {
    fn from(data: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(data))
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

/// A decoded message addressed to a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Room (transport topic) the message was published to
    pub room: String,
    /// Decoded payload
    pub payload: Payload,
}

impl Envelope {
    /// Create an envelope
    pub fn new(room: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            room: room.into(),
            payload: payload.into(),
        }
    }
}

/// Prefix the payload with its marker byte
pub fn encode(payload: &Payload) -> Bytes {
    let body = payload.as_bytes();
    let mut frame = BytesMut::with_capacity(body.len() + 1);
    frame.put_u8(payload.kind().marker());
    frame.put_slice(body);
    frame.freeze()
}

/// Strip and interpret the marker byte
///
/// Returns `None` for empty frames, unknown markers, and text frames that
/// are not valid UTF-8.
pub fn decode(frame: Bytes) -> Option<Payload> {
    let marker = *frame.first()?;
    let body = frame.slice(1..);
    match PayloadKind::from_marker(marker)? {
        PayloadKind::Binary => Some(Payload::Binary(body)),
        PayloadKind::String => String::from_utf8(body.to_vec()).ok().map(Payload::Text),
    }
}
