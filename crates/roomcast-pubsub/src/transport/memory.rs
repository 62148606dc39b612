use super::{PubSubTransport, TransportEvent, TransportMessage};
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// In-process message bus shared by any number of [`MemoryTransport`] nodes
///
/// Each node stands in for one server process: a publish on any node reaches
/// every node subscribed to the topic, the publisher included.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    nodes: Arc<Mutex<Vec<Weak<Node>>>>,
}

#[derive(Debug)]
struct Node {
    topics: Mutex<BTreeSet<String>>,
    events: broadcast::Sender<TransportEvent>,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    rejected_subscribes: AtomicUsize,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new node to the bus
    pub fn transport(&self) -> MemoryTransport {
        self.transport_with_capacity(DEFAULT_CAPACITY)
    }

    /// Attach a new node whose event channel holds `capacity` messages
    pub fn transport_with_capacity(&self, capacity: usize) -> MemoryTransport {
        let (events, _) = broadcast::channel(capacity.max(1));
        let node = Arc::new(Node {
            topics: Mutex::new(BTreeSet::new()),
            events,
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            rejected_subscribes: AtomicUsize::new(0),
        });
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.retain(|n| n.strong_count() > 0);
        nodes.push(Arc::downgrade(&node));
        MemoryTransport {
            broker: self.clone(),
            node,
        }
    }

    fn deliver(&self, message: TransportMessage) -> Result<usize> {
        let nodes: Vec<Arc<Node>> = {
            let mut nodes = self
                .nodes
                .lock()
                .map_err(|_| TransportError::Backend("Lock poisoned".to_string()))?;
            nodes.retain(|n| n.strong_count() > 0);
            nodes.iter().filter_map(Weak::upgrade).collect()
        };

        let mut delivered = 0;
        for node in nodes {
            let subscribed = node
                .topics
                .lock()
                .map_err(|_| TransportError::Backend("Lock poisoned".to_string()))?
                .contains(&message.topic);
            if subscribed && node.events.send(TransportEvent::Message(message.clone())).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}

/// In-memory transport (not persistent, single process; for testing/dev)
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    broker: MemoryBroker,
    node: Arc<Node>,
}

impl MemoryTransport {
    /// A standalone node on its own private bus
    pub fn new() -> Self {
        MemoryBroker::new().transport()
    }

    /// The bus this node is attached to
    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    /// Topics currently subscribed, sorted
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.node
            .topics
            .lock()
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.node
            .topics
            .lock()
            .map(|t| t.contains(topic))
            .unwrap_or(false)
    }

    /// Number of `subscribe` calls received
    pub fn subscribe_calls(&self) -> usize {
        self.node.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of `unsubscribe` calls received
    pub fn unsubscribe_calls(&self) -> usize {
        self.node.unsubscribe_calls.load(Ordering::SeqCst)
    }

    /// Make the next `count` subscribe calls fail with
    /// [`TransportError::Subscribe`] without subscribing anything
    pub fn reject_subscribes(&self, count: usize) {
        self.node.rejected_subscribes.store(count, Ordering::SeqCst);
    }

    /// Push a backend failure onto this node's event stream
    pub fn emit_error(&self, error: TransportError) {
        let _ = self.node.events.send(TransportEvent::Error(error));
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.broker.deliver(TransportMessage {
            topic: topic.to_string(),
            payload,
        })?;
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<usize> {
        self.node.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .node
            .rejected_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if rejected.is_ok() {
            return Err(TransportError::Subscribe("rejected by memory transport".to_string()));
        }
        let mut subscribed = self
            .node
            .topics
            .lock()
            .map_err(|_| TransportError::Backend("Lock poisoned".to_string()))?;
        Ok(topics
            .iter()
            .filter(|topic| subscribed.insert((*topic).clone()))
            .count())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<usize> {
        self.node.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        let mut subscribed = self
            .node
            .topics
            .lock()
            .map_err(|_| TransportError::Backend("Lock poisoned".to_string()))?;
        Ok(topics.iter().filter(|topic| subscribed.remove(*topic)).count())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.node.events.subscribe()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_subscribe_counts_only_new_topics() {
        let transport = MemoryTransport::new();
        assert_eq!(transport.subscribe(&topics(&["a", "b"])).await.unwrap(), 2);
        assert_eq!(transport.subscribe(&topics(&["b", "c"])).await.unwrap(), 1);
        assert_eq!(transport.subscribed_topics(), topics(&["a", "b", "c"]));
        assert_eq!(transport.unsubscribe(&topics(&["a", "z"])).await.unwrap(), 1);
        assert_eq!(transport.subscribe_calls(), 2);
        assert_eq!(transport.unsubscribe_calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_subscribes_change_nothing() {
        let transport = MemoryTransport::new();
        transport.reject_subscribes(1);
        assert!(matches!(
            transport.subscribe(&topics(&["a"])).await,
            Err(TransportError::Subscribe(_))
        ));
        assert!(transport.subscribed_topics().is_empty());
        assert_eq!(transport.subscribe(&topics(&["a"])).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribed_nodes_including_self() {
        let broker = MemoryBroker::new();
        let first = broker.transport();
        let second = broker.transport();
        let idle = broker.transport();

        first.subscribe(&topics(&["room"])).await.unwrap();
        second.subscribe(&topics(&["room"])).await.unwrap();

        let mut first_rx = first.events();
        let mut second_rx = second.events();
        let mut idle_rx = idle.events();

        first
            .publish("room", Bytes::from_static(b"shello"))
            .await
            .unwrap();

        for rx in [&mut first_rx, &mut second_rx] {
            match rx.recv().await.unwrap() {
                TransportEvent::Message(msg) => {
                    assert_eq!(msg.topic, "room");
                    assert_eq!(msg.payload.as_ref(), b"shello");
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(idle_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_nodes_are_pruned() {
        let broker = MemoryBroker::new();
        let keep = broker.transport();
        {
            let gone = broker.transport();
            gone.subscribe(&topics(&["room"])).await.unwrap();
        }
        keep.subscribe(&topics(&["room"])).await.unwrap();
        assert_eq!(
            broker
                .deliver(TransportMessage {
                    topic: "room".into(),
                    payload: Bytes::from_static(b"sx"),
                })
                .unwrap(),
            0,
            "no receiver is listening on the surviving node yet"
        );
        let _rx = keep.events();
        assert_eq!(
            broker
                .deliver(TransportMessage {
                    topic: "room".into(),
                    payload: Bytes::from_static(b"sx"),
                })
                .unwrap(),
            1
        );
    }
}
