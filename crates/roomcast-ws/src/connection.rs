//! Upgraded connections
//!
//! Each accepted socket is owned by a driver task that multiplexes the
//! outbound queue, inbound frames and the close handshake. Handlers talk to
//! it through a cheap, cloneable [`WsConnection`] handle.

use crate::error::WebSocketError;
use crate::message::{CloseCode, CloseFrame, Message};
use crate::rooms::RoomRegistry;
use crate::sink::ErrorReporter;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use roomcast_pubsub::RoomHub;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

/// Unique identity of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of an upgraded connection
///
/// A connection only exists once the handshake succeeded, so it starts out
/// `Open`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Frames flow in both directions
    Open,
    /// The socket is gone and room cleanup has started
    Closed,
}

/// Why a message did not make it into the outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Undelivered {
    Full,
    Closed,
}

impl From<Undelivered> for WebSocketError {
    fn from(reason: Undelivered) -> Self {
        match reason {
            Undelivered::Full => WebSocketError::OutboundFull,
            Undelivered::Closed => WebSocketError::ConnectionClosed,
        }
    }
}

/// Write side of a connection, shared with its room registry
///
/// Data messages go through a bounded queue. Close requests use their own
/// unbounded queue so a slow peer cannot keep a close from being sent.
#[derive(Clone)]
pub(crate) struct Outlet {
    messages: mpsc::Sender<Message>,
    closes: mpsc::UnboundedSender<Option<CloseFrame>>,
}

/// Read side of an [`Outlet`]
pub(crate) struct OutletQueues {
    pub messages: mpsc::Receiver<Message>,
    pub closes: mpsc::UnboundedReceiver<Option<CloseFrame>>,
}

impl Outlet {
    pub(crate) fn new(capacity: usize) -> (Self, OutletQueues) {
        let (messages, messages_rx) = mpsc::channel(capacity.max(1));
        let (closes, closes_rx) = mpsc::unbounded_channel();
        (
            Self { messages, closes },
            OutletQueues {
                messages: messages_rx,
                closes: closes_rx,
            },
        )
    }

    /// Queue a message without waiting
    pub(crate) fn send(&self, message: Message) -> Result<(), Undelivered> {
        if let Message::Close(frame) = message {
            return self.closes.send(frame).map_err(|_| Undelivered::Closed);
        }
        self.messages.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Undelivered::Full,
            mpsc::error::TrySendError::Closed(_) => Undelivered::Closed,
        })
    }
}

/// Settings the driver needs from the server configuration
#[derive(Debug, Clone, Copy)]
pub(crate) struct DriverSettings {
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    pub close_timeout: Duration,
}

/// Handle to an upgraded connection
///
/// Writes are queued and never block. A write that finds the outbound queue
/// full fails with [`WebSocketError::OutboundFull`]. Writes after the
/// connection closed fail with [`WebSocketError::ConnectionClosed`];
/// handlers are expected to ignore that.
#[derive(Clone)]
pub struct WsConnection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    outlet: Outlet,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    state: watch::Receiver<ConnectionState>,
    peer_close: Arc<Mutex<Option<CloseFrame>>>,
    rooms: RoomRegistry,
}

impl WsConnection {
    /// Take ownership of an upgraded stream and start its driver
    ///
    /// The returned task finishes once the socket is closed and every room
    /// the connection joined has been left.
    pub(crate) fn open<S>(
        stream: WebSocketStream<S>,
        remote_addr: Option<SocketAddr>,
        hub: Option<Arc<RoomHub>>,
        reporter: ErrorReporter,
        settings: DriverSettings,
    ) -> (Self, JoinHandle<()>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = ConnectionId::new();
        let (outlet, queues) = Outlet::new(settings.outbound_capacity);
        let (in_tx, in_rx) = mpsc::channel(settings.inbound_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Open);
        let rooms = RoomRegistry::new(id, hub, reporter, outlet.clone());
        let peer_close = Arc::new(Mutex::new(None));

        let driver = Driver {
            id,
            outbound: queues,
            inbound: in_tx,
            state: state_tx,
            peer_close: peer_close.clone(),
            rooms: rooms.clone(),
            close_timeout: settings.close_timeout,
        };
        let task = tokio::spawn(driver.run(stream));

        let connection = Self {
            inner: Arc::new(Inner {
                id,
                remote_addr,
                outlet,
                inbound: tokio::sync::Mutex::new(in_rx),
                state: state_rx,
                peer_close,
                rooms,
            }),
        };
        (connection, task)
    }

    /// Connection identity
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Address of the peer, when the stream came from a TCP listener
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether the connection is still open
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// The connection's room registry
    pub fn rooms(&self) -> &RoomRegistry {
        &self.inner.rooms
    }

    /// Queue a message
    pub fn send(&self, message: impl Into<Message>) -> Result<(), WebSocketError> {
        if !self.is_open() {
            return Err(WebSocketError::ConnectionClosed);
        }
        self.inner.outlet.send(message.into())?;
        Ok(())
    }

    /// Queue a text message
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), WebSocketError> {
        self.send(Message::text(text))
    }

    /// Queue a binary message
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<(), WebSocketError> {
        self.send(Message::binary(data))
    }

    /// Queue a value serialized as a JSON text message
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<(), WebSocketError> {
        self.send(Message::json(value)?)
    }

    /// Next text or binary message from the peer
    ///
    /// Returns `None` once the connection is closed and every buffered
    /// message has been read.
    pub async fn recv(&self) -> Option<Message> {
        self.inner.inbound.lock().await.recv().await
    }

    /// Start a normal close handshake
    pub fn close(&self) -> Result<(), WebSocketError> {
        self.close_frame(CloseFrame::normal())
    }

    /// Start a close handshake with the given code and reason
    pub fn close_with(
        &self,
        code: CloseCode,
        reason: impl Into<std::borrow::Cow<'static, str>>,
    ) -> Result<(), WebSocketError> {
        self.close_frame(CloseFrame::new(code, reason))
    }

    fn close_frame(&self, frame: CloseFrame) -> Result<(), WebSocketError> {
        self.send(Message::Close(Some(frame)))
    }

    /// Wait until the connection is closed
    pub async fn closed(&self) {
        let mut state = self.inner.state.clone();
        // An error means the driver is gone, which also means closed
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Close frame sent by the peer, if it sent one
    pub fn peer_close_frame(&self) -> Option<CloseFrame> {
        self.inner
            .peer_close
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

struct Driver {
    id: ConnectionId,
    outbound: OutletQueues,
    inbound: mpsc::Sender<Message>,
    state: watch::Sender<ConnectionState>,
    peer_close: Arc<Mutex<Option<CloseFrame>>>,
    rooms: RoomRegistry,
    close_timeout: Duration,
}

impl Driver {
    async fn run<S>(mut self, stream: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = stream.split();
        // Set once we sent our close frame and wait for the peer's
        let mut closing: Option<Instant> = None;

        loop {
            tokio::select! {
                request = self.outbound.closes.recv(), if closing.is_none() => {
                    let frame = request.unwrap_or_else(|| Some(CloseFrame::normal()));
                    if let Err(e) = self.write_close(&mut sink, frame).await {
                        tracing::debug!(connection = %self.id, error = %e, "close write failed");
                        break;
                    }
                    closing = Some(Instant::now() + self.close_timeout);
                },
                message = self.outbound.messages.recv(), if closing.is_none() => match message {
                    Some(message) => {
                        if let Err(e) = sink.send(message.into()).await {
                            tracing::debug!(connection = %self.id, error = %e, "write failed");
                            break;
                        }
                    }
                    None => {
                        let _ = self.write_close(&mut sink, Some(CloseFrame::normal())).await;
                        closing = Some(Instant::now() + self.close_timeout);
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        *self.peer_close.lock().unwrap_or_else(|e| e.into_inner()) =
                            frame.map(CloseFrame::from);
                        // Writes the queued close reply
                        let _ = sink.flush().await;
                        break;
                    }
                    Some(Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_))) => {
                        let _ = sink.flush().await;
                    }
                    Some(Ok(tungstenite::Message::Frame(_))) => {}
                    Some(Ok(message)) => {
                        if closing.is_some() {
                            continue;
                        }
                        if let Err(mpsc::error::TrySendError::Full(_)) =
                            self.inbound.try_send(Message::from(message))
                        {
                            tracing::debug!(connection = %self.id, "inbound queue full, frame dropped");
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection = %self.id, error = %e, "read failed");
                        break;
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(closing.unwrap_or_else(Instant::now)), if closing.is_some() => {
                    tracing::debug!(connection = %self.id, "peer did not answer close, dropping socket");
                    break;
                }
            }
        }

        drop(sink);
        drop(stream);
        self.state.send_replace(ConnectionState::Closed);
        self.rooms.close().await;
    }

    /// Flush messages queued before the close request, then send the close frame
    async fn write_close<S>(
        &mut self,
        sink: &mut SplitSink<WebSocketStream<S>, tungstenite::Message>,
        frame: Option<CloseFrame>,
    ) -> Result<(), tungstenite::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Ok(message) = self.outbound.messages.try_recv() {
            sink.feed(message.into()).await?;
        }
        sink.send(tungstenite::Message::Close(frame.map(Into::into)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::Role;

    fn settings(outbound_capacity: usize) -> DriverSettings {
        DriverSettings {
            inbound_capacity: 4,
            outbound_capacity,
            close_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_full_queue_rejects_data_but_not_close() {
        let (outlet, mut queues) = Outlet::new(2);
        assert_eq!(outlet.send(Message::text("a")), Ok(()));
        assert_eq!(outlet.send(Message::text("b")), Ok(()));
        assert_eq!(outlet.send(Message::text("c")), Err(Undelivered::Full));
        assert_eq!(outlet.send(Message::Close(Some(CloseFrame::normal()))), Ok(()));

        assert_eq!(queues.messages.try_recv().unwrap(), Message::text("a"));
        assert_eq!(queues.closes.try_recv().unwrap(), Some(CloseFrame::normal()));

        drop(queues);
        assert_eq!(outlet.send(Message::text("d")), Err(Undelivered::Closed));
        assert_eq!(outlet.send(Message::Close(None)), Err(Undelivered::Closed));
    }

    #[tokio::test]
    async fn test_close_reaches_peer_after_queued_messages_when_queue_is_full() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let (socket, driver) = WsConnection::open(
            server,
            None,
            None,
            ErrorReporter::default(),
            settings(2),
        );

        // The driver may already have taken some messages off the queue
        let mut queued = Vec::new();
        let mut rejected = false;
        for i in 0..64 {
            match socket.send_text(format!("m{}", i)) {
                Ok(()) => queued.push(format!("m{}", i)),
                Err(WebSocketError::OutboundFull) => {
                    rejected = true;
                    break;
                }
                Err(other) => panic!("unexpected error {}", other),
            }
        }
        assert!(rejected, "a two-slot queue never filled up");
        socket.close_with(CloseCode::Away, "bye").unwrap();

        let mut received = Vec::new();
        loop {
            match client.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => received.push(text.to_string()),
                Some(Ok(tungstenite::Message::Close(Some(frame)))) => {
                    assert_eq!(frame.reason, "bye");
                    break;
                }
                other => panic!("expected text or close, got {:?}", other),
            }
        }
        assert_eq!(received, queued);

        drop(client);
        driver.await.unwrap();
        assert!(!socket.is_open());
        assert!(matches!(
            socket.send_text("late"),
            Err(WebSocketError::ConnectionClosed)
        ));
    }
}
