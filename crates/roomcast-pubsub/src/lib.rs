//! Room pub/sub plumbing for roomcast
//!
//! This crate holds the pieces of room broadcasting that have nothing to do
//! with WebSockets:
//!
//! - [`codec`]: the one byte marker framing used on the wire
//! - [`PubSubTransport`]: the backend contract, with an in-memory
//!   implementation and an optional Redis one (`redis` feature)
//! - [`RoomHub`]: the process-wide reference count that keeps exactly one
//!   transport subscription per room with local members
//!
//! ```rust,ignore
//! use roomcast_pubsub::{MemoryTransport, Payload, RoomHub};
//!
//! let hub = RoomHub::start(MemoryTransport::new());
//! hub.publish("lobby", &Payload::text("hello")).await?;
//! ```

pub mod codec;
pub mod error;
pub mod hub;
pub mod transport;

pub use codec::{Envelope, Payload, PayloadKind, BINARY_MARKER, STRING_MARKER};
pub use error::{Result, TransportError};
pub use hub::{ErrorHook, RoomHub, RoomSubscriber, SubscriberId};
pub use transport::memory::{MemoryBroker, MemoryTransport};
pub use transport::{PubSubTransport, TransportEvent, TransportMessage};

#[cfg(feature = "redis")]
pub use transport::redis::{RedisConfig, RedisTransport};
