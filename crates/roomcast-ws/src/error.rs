//! Error types

use crate::config::ConfigError;
use roomcast_pubsub::TransportError;
use thiserror::Error;

/// Boxed error returned by handlers and middleware
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a routed handler chain
pub type HandlerResult = Result<(), BoxError>;

/// Error type for socket-level operations
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// The connection is already closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The outbound queue is full; the message was not queued
    #[error("Outbound queue full")]
    OutboundFull,

    /// Message serialization error
    #[error("Message serialization error: {0}")]
    SerializationError(String),

    /// Message deserialization error
    #[error("Message deserialization error: {0}")]
    DeserializationError(String),

    /// Protocol or handshake failure reported by tungstenite
    #[error("WebSocket error: {0}")]
    Tungstenite(#[from] tungstenite::Error),
}

impl WebSocketError {
    /// Create a serialization error
    pub fn serialization_error(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Create a deserialization error
    pub fn deserialization_error(msg: impl Into<String>) -> Self {
        Self::DeserializationError(msg.into())
    }
}

/// Everything the server can report through its error sink
///
/// Only [`ServerError::ControllerNotFound`] is ever returned to the caller
/// (at route registration); the rest are recovered where they happen and
/// handed to the [`ErrorSink`](crate::ErrorSink).
#[derive(Error, Debug)]
pub enum ServerError {
    /// No route matches the upgrade path
    #[error("No route found for {path}")]
    RouteNotFound {
        /// Requested path
        path: String,
    },

    /// A named controller is not registered
    #[error("Controller not found: {0}")]
    ControllerNotFound(String),

    /// A room operation ran without a configured transport
    #[error("No pub/sub adapter configured, {operation} ignored")]
    AdapterUnavailable {
        /// The operation that was skipped
        operation: &'static str,
    },

    /// A room argument is neither a room name nor a list of room names
    #[error("Invalid room argument: {0}")]
    InvalidRoomArgument(String),

    /// The routed handler failed or panicked
    #[error("Handler error: {0}")]
    Handler(BoxError),

    /// The pub/sub backend failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Socket-level failure
    #[error(transparent)]
    WebSocket(#[from] WebSocketError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Create an invalid room argument error
    pub fn invalid_room(msg: impl Into<String>) -> Self {
        Self::InvalidRoomArgument(msg.into())
    }

    /// Short machine-readable name of the error kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "route_not_found",
            Self::ControllerNotFound(_) => "controller_not_found",
            Self::AdapterUnavailable { .. } => "adapter_unavailable",
            Self::InvalidRoomArgument(_) => "invalid_room_argument",
            Self::Handler(_) => "handler",
            Self::Transport(_) => "transport",
            Self::WebSocket(_) => "websocket",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}
