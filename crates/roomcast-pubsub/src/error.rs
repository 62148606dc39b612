use thiserror::Error;

/// Errors raised by a pub/sub transport backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport connection error: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Unsubscribe failed: {0}")]
    Unsubscribe(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
