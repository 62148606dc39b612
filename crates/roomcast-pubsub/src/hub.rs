//! Process-wide room membership
//!
//! A [`RoomHub`] multiplexes one transport subscription per room across every
//! local subscriber that joined it. The per-room member list doubles as the
//! room's reference count: the transport is subscribed to a topic exactly
//! while the list is non-empty.

use crate::codec::{self, Envelope, Payload};
use crate::error::{Result, TransportError};
use crate::transport::{PubSubTransport, TransportEvent, TransportMessage};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, Mutex};

/// Identity of a hub subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receives room messages from the hub
pub trait RoomSubscriber: Send + Sync + 'static {
    /// Called for every decoded message on a room this subscriber joined
    ///
    /// Runs on the hub's dispatch task; must not block.
    fn deliver(&self, envelope: &Envelope);
}

/// Callback for transport failures that happen outside of a request
pub type ErrorHook = Arc<dyn Fn(&TransportError) + Send + Sync>;

type Members = Vec<(SubscriberId, Arc<dyn RoomSubscriber>)>;

/// Shared handle to the single transport of a process
pub struct RoomHub {
    transport: Arc<dyn PubSubTransport>,
    rooms: RwLock<HashMap<String, Members>>,
    // Held across the transport round-trip so 0->1 and 1->0 transitions
    // reach the backend in the order they were decided.
    transitions: Mutex<()>,
    next_id: AtomicU64,
    on_error: Option<ErrorHook>,
}

impl RoomHub {
    /// Wrap a transport and start dispatching its messages
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<T: PubSubTransport>(transport: T) -> Arc<Self> {
        Self::start_shared(Arc::new(transport), None)
    }

    /// Like [`start`](Self::start), reporting background transport failures
    /// to `hook`
    pub fn start_with_hook<T: PubSubTransport>(transport: T, hook: ErrorHook) -> Arc<Self> {
        Self::start_shared(Arc::new(transport), Some(hook))
    }

    /// Start from an already shared transport
    pub fn start_shared(transport: Arc<dyn PubSubTransport>, on_error: Option<ErrorHook>) -> Arc<Self> {
        let events = transport.events();
        let hub = Arc::new(Self {
            transport,
            rooms: RwLock::new(HashMap::new()),
            transitions: Mutex::new(()),
            next_id: AtomicU64::new(1),
            on_error,
        });
        tokio::spawn(run_dispatcher(Arc::downgrade(&hub), events));
        hub
    }

    /// Allocate an identity for a new subscriber
    pub fn subscriber_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Name of the underlying transport
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Add `subscriber` to each room
    ///
    /// Returns how many topics were newly subscribed at the transport, which
    /// is the number of rooms that had no local member before this call.
    ///
    /// If the transport rejects the subscription the call has no effect:
    /// the subscriber is removed again from every room this call added it
    /// to, and topics that were subscribed before the failure are released.
    pub async fn join(
        &self,
        id: SubscriberId,
        subscriber: Arc<dyn RoomSubscriber>,
        rooms: &[String],
    ) -> Result<usize> {
        let _transition = self.transitions.lock().await;

        let (added, fresh) = {
            let mut table = self.write_rooms();
            let mut added = Vec::new();
            let mut fresh = Vec::new();
            for room in rooms {
                let members = table.entry(room.clone()).or_default();
                if members.iter().any(|(member, _)| *member == id) {
                    continue;
                }
                if members.is_empty() {
                    fresh.push(room.clone());
                }
                members.push((id, subscriber.clone()));
                added.push(room.clone());
            }
            (added, fresh)
        };

        if fresh.is_empty() {
            return Ok(0);
        }
        tracing::debug!(transport = self.transport.name(), rooms = ?fresh, "subscribing");
        match self.transport.subscribe(&fresh).await {
            Ok(subscribed) => Ok(subscribed),
            Err(e) => {
                self.forget(id, &added);
                // Fresh rooms have no other member while the transition lock is held
                if let Err(cleanup) = self.transport.unsubscribe(&fresh).await {
                    tracing::debug!(error = %cleanup, rooms = ?fresh, "releasing failed subscription");
                }
                Err(e)
            }
        }
    }

    fn forget(&self, id: SubscriberId, rooms: &[String]) {
        let mut table = self.write_rooms();
        for room in rooms {
            if let Some(members) = table.get_mut(room) {
                members.retain(|(member, _)| *member != id);
                if members.is_empty() {
                    table.remove(room);
                }
            }
        }
    }

    /// Remove the subscriber from each room
    ///
    /// Returns how many topics were unsubscribed at the transport because
    /// their last local member left.
    pub async fn leave(&self, id: SubscriberId, rooms: &[String]) -> Result<usize> {
        let _transition = self.transitions.lock().await;

        let emptied: Vec<String> = {
            let mut table = self.write_rooms();
            let mut emptied = Vec::new();
            for room in rooms {
                let Some(members) = table.get_mut(room) else {
                    continue;
                };
                let before = members.len();
                members.retain(|(member, _)| *member != id);
                if members.len() == before {
                    continue;
                }
                if members.is_empty() {
                    table.remove(room);
                    emptied.push(room.clone());
                }
            }
            emptied
        };

        if emptied.is_empty() {
            return Ok(0);
        }
        tracing::debug!(transport = self.transport.name(), rooms = ?emptied, "unsubscribing");
        self.transport.unsubscribe(&emptied).await
    }

    /// Frame and publish a payload to a room
    pub async fn publish(&self, room: &str, payload: &Payload) -> Result<()> {
        self.transport.publish(room, codec::encode(payload)).await
    }

    /// Fan a transport frame out to the room's current members
    ///
    /// Returns the number of subscribers the message was handed to. Frames
    /// that do not decode are dropped.
    pub fn dispatch(&self, message: TransportMessage) -> usize {
        let TransportMessage { topic, payload } = message;
        let Some(payload) = codec::decode(payload) else {
            tracing::trace!(room = %topic, "dropping frame without a known marker");
            return 0;
        };

        let members: Vec<Arc<dyn RoomSubscriber>> = match self.read_rooms().get(&topic) {
            Some(members) => members.iter().map(|(_, s)| s.clone()).collect(),
            None => return 0,
        };

        let envelope = Envelope {
            room: topic,
            payload,
        };
        for member in &members {
            member.deliver(&envelope);
        }
        members.len()
    }

    /// Number of local subscribers currently joined to `room`
    pub fn refcount(&self, room: &str) -> usize {
        self.read_rooms().get(room).map_or(0, Vec::len)
    }

    /// Rooms with at least one local member, sorted
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.read_rooms().keys().cloned().collect();
        rooms.sort();
        rooms
    }

    fn report(&self, error: &TransportError) {
        match &self.on_error {
            Some(hook) => hook(error),
            None => tracing::error!(transport = self.transport.name(), error = %error, "transport error"),
        }
    }

    fn read_rooms(&self) -> RwLockReadGuard<'_, HashMap<String, Members>> {
        self.rooms.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_rooms(&self) -> RwLockWriteGuard<'_, HashMap<String, Members>> {
        self.rooms.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for RoomHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomHub")
            .field("transport", &self.transport.name())
            .field("rooms", &self.rooms())
            .finish()
    }
}

async fn run_dispatcher(
    hub: std::sync::Weak<RoomHub>,
    mut events: broadcast::Receiver<TransportEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "room dispatcher lagging, messages dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(hub) = hub.upgrade() else {
            break;
        };
        match event {
            TransportEvent::Message(message) => {
                hub.dispatch(message);
            }
            TransportEvent::Error(error) => hub.report(&error),
        }
    }
    tracing::debug!("room dispatcher stopped");
}
