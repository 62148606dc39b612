//! Per-connection room membership
//!
//! A [`RoomRegistry`] records which rooms one connection joined and what to
//! do with messages arriving on each of them. Process-wide reference counts
//! and transport subscriptions live in the [`RoomHub`]; the registry is one
//! subscriber of it.

use crate::connection::{ConnectionId, Outlet, Undelivered};
use crate::error::{ServerError, WebSocketError};
use crate::message::Message;
use crate::sink::ErrorReporter;
use roomcast_pubsub::{Envelope, Payload, RoomHub, RoomSubscriber, SubscriberId};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Room argument accepted by join and leave
///
/// Built from a room name, a list of names, or a JSON value received from a
/// client. Validation happens when the operation runs, so a bad argument is
/// reported through the error sink instead of failing the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Rooms {
    /// A list of room names
    Names(Vec<String>),
    /// Untrusted JSON; must be a string or an array of strings
    Json(Value),
}

impl Rooms {
    /// Validated, deduplicated room names in argument order
    pub fn into_names(self) -> Result<Vec<String>, ServerError> {
        let names = match self {
            Self::Names(names) => names,
            Self::Json(Value::String(name)) => vec![name],
            Self::Json(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(name) => Ok(name),
                    other => Err(ServerError::invalid_room(format!(
                        "expected a list of room names, found {} in the list",
                        json_kind(&other)
                    ))),
                })
                .collect::<Result<_, _>>()?,
            Self::Json(other) => {
                return Err(ServerError::invalid_room(format!(
                    "expected a room name or a list of room names, got {}",
                    json_kind(&other)
                )))
            }
        };

        if names.iter().any(String::is_empty) {
            return Err(ServerError::invalid_room("room names must not be empty"));
        }
        let mut seen = HashSet::new();
        Ok(names
            .into_iter()
            .filter(|name| seen.insert(name.clone()))
            .collect())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl From<&str> for Rooms {
    fn from(name: &str) -> Self {
        Self::Names(vec![name.to_string()])
    }
}

impl From<String> for Rooms {
    fn from(name: String) -> Self {
        Self::Names(vec![name])
    }
}

impl From<&String> for Rooms {
    fn from(name: &String) -> Self {
        Self::Names(vec![name.clone()])
    }
}

impl From<Vec<String>> for Rooms {
    fn from(names: Vec<String>) -> Self {
        Self::Names(names)
    }
}

impl From<Vec<&str>> for Rooms {
    fn from(names: Vec<&str>) -> Self {
        Self::Names(names.into_iter().map(str::to_string).collect())
    }
}

impl From<&[String]> for Rooms {
    fn from(names: &[String]) -> Self {
        Self::Names(names.to_vec())
    }
}

impl From<&[&str]> for Rooms {
    fn from(names: &[&str]) -> Self {
        Self::Names(names.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Rooms {
    fn from(names: [&str; N]) -> Self {
        Self::Names(names.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Value> for Rooms {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// What a registry does with a message on one of its rooms
#[derive(Clone)]
pub enum RoomHandler {
    /// Forward the payload to the connection, keeping its frame type
    Default,
    /// Hand the message to a callback
    ///
    /// Runs on the dispatch task, so it must not block.
    Custom(Arc<dyn Fn(Envelope) + Send + Sync>),
}

impl RoomHandler {
    /// Wrap a callback
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }
}

impl fmt::Debug for RoomHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Room membership of one connection
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct RoomRegistry {
    shared: Arc<Shared>,
}

struct Shared {
    connection: ConnectionId,
    subscriber: Option<SubscriberId>,
    hub: Option<Arc<RoomHub>>,
    reporter: ErrorReporter,
    outlet: Outlet,
    // Keys are the joined rooms, values the handler installed for each
    joined: Mutex<BTreeMap<String, RoomHandler>>,
    // Serializes join, leave and close of this registry
    sequencer: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl RoomRegistry {
    pub(crate) fn new(
        connection: ConnectionId,
        hub: Option<Arc<RoomHub>>,
        reporter: ErrorReporter,
        outlet: Outlet,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connection,
                subscriber: hub.as_ref().map(|hub| hub.subscriber_id()),
                hub,
                reporter,
                outlet,
                joined: Mutex::new(BTreeMap::new()),
                sequencer: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Join rooms, forwarding their messages to the connection
    ///
    /// Returns the number of rooms newly subscribed at the transport, which
    /// is zero when every room already had a member in this process.
    pub async fn join(&self, rooms: impl Into<Rooms>) -> usize {
        self.join_inner(rooms.into(), RoomHandler::Default).await
    }

    /// Join rooms, handing their messages to `handler`
    ///
    /// Replaces the handler of rooms this connection already joined.
    pub async fn join_with_handler<F>(&self, rooms: impl Into<Rooms>, handler: F) -> usize
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.join_inner(rooms.into(), RoomHandler::custom(handler))
            .await
    }

    async fn join_inner(&self, rooms: Rooms, handler: RoomHandler) -> usize {
        let Some((hub, subscriber)) = self.adapter("join") else {
            return 0;
        };
        let Some(names) = self.validate(rooms) else {
            return 0;
        };

        let _sequence = self.shared.sequencer.lock().await;
        if self.shared.closed.load(Ordering::Acquire) {
            tracing::debug!(connection = %self.shared.connection, "join after close ignored");
            return 0;
        }

        let fresh: Vec<String> = {
            let mut joined = self.shared.joined();
            names
                .into_iter()
                .filter(|room| joined.insert(room.clone(), handler.clone()).is_none())
                .collect()
        };
        if fresh.is_empty() {
            return 0;
        }

        tracing::debug!(connection = %self.shared.connection, rooms = ?fresh, "joining rooms");
        let member: Arc<dyn RoomSubscriber> = self.shared.clone();
        match hub.join(subscriber, member, &fresh).await {
            Ok(subscribed) => subscribed,
            Err(e) => {
                // The hub dropped us from these rooms again
                let mut joined = self.shared.joined();
                for room in &fresh {
                    joined.remove(room);
                }
                drop(joined);
                self.report(ServerError::Transport(e));
                0
            }
        }
    }

    /// Leave rooms
    ///
    /// Returns the number of rooms unsubscribed at the transport because
    /// this connection was their last local member.
    pub async fn leave(&self, rooms: impl Into<Rooms>) -> usize {
        let Some((hub, subscriber)) = self.adapter("leave") else {
            return 0;
        };
        let Some(names) = self.validate(rooms.into()) else {
            return 0;
        };

        let _sequence = self.shared.sequencer.lock().await;
        let gone: Vec<String> = {
            let mut joined = self.shared.joined();
            names
                .into_iter()
                .filter(|room| joined.remove(room).is_some())
                .collect()
        };
        if gone.is_empty() {
            return 0;
        }

        tracing::debug!(connection = %self.shared.connection, rooms = ?gone, "leaving rooms");
        match hub.leave(subscriber, &gone).await {
            Ok(unsubscribed) => unsubscribed,
            Err(e) => {
                self.report(ServerError::Transport(e));
                0
            }
        }
    }

    /// Leave every joined room and refuse further joins
    ///
    /// Only the first call does anything.
    pub(crate) async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _sequence = self.shared.sequencer.lock().await;
        let rooms: Vec<String> = std::mem::take(&mut *self.shared.joined())
            .into_keys()
            .collect();

        let (Some(hub), Some(subscriber)) = (&self.shared.hub, self.shared.subscriber) else {
            return;
        };
        if rooms.is_empty() {
            return;
        }
        tracing::debug!(connection = %self.shared.connection, rooms = ?rooms, "connection closed, leaving rooms");
        if let Err(e) = hub.leave(subscriber, &rooms).await {
            self.report(ServerError::Transport(e));
        }
    }

    /// Publish a payload to a room
    ///
    /// The connection does not have to be a member. Returns whether the
    /// transport accepted the message.
    pub async fn send_to(&self, room: &str, payload: impl Into<Payload>) -> bool {
        publish(
            self.shared.hub.as_deref(),
            &self.shared.reporter,
            Some(self.shared.connection),
            room,
            payload.into(),
        )
        .await
    }

    /// Publish a value serialized as JSON text to a room
    pub async fn send_json_to<T: Serialize>(&self, room: &str, value: &T) -> bool {
        publish_json(
            self.shared.hub.as_deref(),
            &self.shared.reporter,
            Some(self.shared.connection),
            room,
            value,
        )
        .await
    }

    /// Rooms currently joined, sorted
    pub fn joined_rooms(&self) -> Vec<String> {
        self.shared.joined().keys().cloned().collect()
    }

    /// Whether this connection joined `room`
    pub fn is_joined(&self, room: &str) -> bool {
        self.shared.joined().contains_key(room)
    }

    /// Whether the registry currently receives room messages
    ///
    /// True exactly when at least one room is joined.
    pub fn is_listening(&self) -> bool {
        !self.shared.joined().is_empty()
    }

    fn adapter(&self, operation: &'static str) -> Option<(&Arc<RoomHub>, SubscriberId)> {
        match (&self.shared.hub, self.shared.subscriber) {
            (Some(hub), Some(subscriber)) => Some((hub, subscriber)),
            _ => {
                self.report(ServerError::AdapterUnavailable { operation });
                None
            }
        }
    }

    fn validate(&self, rooms: Rooms) -> Option<Vec<String>> {
        match rooms.into_names() {
            Ok(names) => Some(names),
            Err(e) => {
                self.report(e);
                None
            }
        }
    }

    fn report(&self, error: ServerError) {
        self.shared
            .reporter
            .report(&error, Some(self.shared.connection));
    }
}

impl fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("connection", &self.shared.connection)
            .field("joined", &self.joined_rooms())
            .finish()
    }
}

impl Shared {
    fn joined(&self) -> MutexGuard<'_, BTreeMap<String, RoomHandler>> {
        self.joined.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RoomSubscriber for Shared {
    fn deliver(&self, envelope: &Envelope) {
        // Membership is checked now, not when the message was published
        let Some(handler) = self.joined().get(&envelope.room).cloned() else {
            return;
        };
        match handler {
            RoomHandler::Default => {
                match self.outlet.send(Message::from(envelope.payload.clone())) {
                    Ok(()) => {}
                    Err(Undelivered::Full) => {
                        tracing::debug!(connection = %self.connection, room = %envelope.room, "outbound queue full, room message dropped");
                    }
                    Err(Undelivered::Closed) => {
                        tracing::trace!(connection = %self.connection, room = %envelope.room, "connection gone, room message dropped");
                    }
                }
            }
            RoomHandler::Custom(callback) => {
                let envelope = envelope.clone();
                if catch_unwind(AssertUnwindSafe(|| callback(envelope))).is_err() {
                    self.reporter.report(
                        &ServerError::Handler("room handler panicked".into()),
                        Some(self.connection),
                    );
                }
            }
        }
    }
}

/// Publish through the hub, reporting instead of failing
pub(crate) async fn publish(
    hub: Option<&RoomHub>,
    reporter: &ErrorReporter,
    connection: Option<ConnectionId>,
    room: &str,
    payload: Payload,
) -> bool {
    let Some(hub) = hub else {
        reporter.report(
            &ServerError::AdapterUnavailable { operation: "send_to" },
            connection,
        );
        return false;
    };
    if room.is_empty() {
        reporter.report(
            &ServerError::invalid_room("room names must not be empty"),
            connection,
        );
        return false;
    }
    match hub.publish(room, &payload).await {
        Ok(()) => true,
        Err(e) => {
            reporter.report(&ServerError::Transport(e), connection);
            false
        }
    }
}

pub(crate) async fn publish_json<T: Serialize>(
    hub: Option<&RoomHub>,
    reporter: &ErrorReporter,
    connection: Option<ConnectionId>,
    room: &str,
    value: &T,
) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => publish(hub, reporter, connection, room, Payload::Text(json)).await,
        Err(e) => {
            let error = WebSocketError::serialization_error(e.to_string());
            reporter.report(&ServerError::WebSocket(error), connection);
            false
        }
    }
}
