use crate::error::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

/// A raw frame received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Event delivered on a transport's incoming stream
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A frame published to a topic this transport is subscribed to,
    /// including frames this process published itself
    Message(TransportMessage),
    /// The backend failed outside of a request, e.g. the subscriber
    /// connection dropped
    Error(TransportError),
}

/// Publish/subscribe backend shared by every connection of a process
///
/// Implementations must deliver self-published messages back on
/// [`events`](PubSubTransport::events) when subscribed to the topic.
#[async_trait]
pub trait PubSubTransport: Send + Sync + 'static {
    /// Publish an already framed payload to a topic
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to topics, returning how many were newly subscribed
    async fn subscribe(&self, topics: &[String]) -> Result<usize>;

    /// Unsubscribe from topics, returning how many were dropped
    async fn unsubscribe(&self, topics: &[String]) -> Result<usize>;

    /// Receiver for every incoming message on every subscribed topic
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Short backend name used in logs
    fn name(&self) -> &'static str;
}
