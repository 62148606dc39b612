//! # roomcast-ws
//!
//! WebSocket server with routed handler chains and pub/sub rooms.
//!
//! Every inbound upgrade is matched against the route table inside the
//! handshake. Unmatched paths get a bare `404` and are never upgraded.
//! Matched connections run their route's chain: app middlewares (when
//! enabled), server middlewares, route middlewares, then the controller.
//!
//! Each connection owns a [`RoomRegistry`]. Joining a room registers the
//! connection with the process-wide [`RoomHub`], which subscribes the
//! transport to a room's topic only while at least one local connection is
//! a member. Closing a connection always leaves its rooms.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use roomcast_ws::prelude::*;
//!
//! async fn echo(ctx: WsContext) -> HandlerResult {
//!     while let Some(msg) = ctx.socket().recv().await {
//!         let _ = ctx.socket().send(msg);
//!     }
//!     Ok(())
//! }
//!
//! async fn lobby(ctx: WsContext) -> HandlerResult {
//!     ctx.rooms().join("lobby").await;
//!     ctx.rooms().send_to("lobby", "someone joined").await;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ServerError> {
//!     let config = WsConfig::default().with_transport(TransportKind::Memory);
//!     let reporter = ErrorReporter::default();
//!     let hub = adapter::connect(&config, &reporter).await?;
//!
//!     WsServer::new(config)
//!         .with_adapter(hub)
//!         .error_reporter(reporter)
//!         .route("/echo", echo)
//!         .route("/lobby", lobby)
//!         .build()
//!         .run("127.0.0.1:8080")
//!         .await
//! }
//! ```

// Allow large error types in Results - WebSocket errors include tungstenite errors which are large
#![allow(clippy::result_large_err)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod adapter;
mod config;
mod connection;
mod context;
mod controller;
mod error;
mod message;
mod middleware;
mod rooms;
mod router;
mod server;
mod sink;
mod upgrade;

pub use config::{load_dotenv, ConfigError, TransportKind, WsConfig, ENV_PREFIX};
pub use connection::{ConnectionId, ConnectionState, WsConnection};
pub use context::WsContext;
pub use controller::{Controller, ControllerRegistry};
pub use error::{BoxError, HandlerResult, ServerError, WebSocketError};
pub use message::{CloseCode, CloseFrame, Message};
pub use middleware::{BoxFuture, BoxedNext, Middleware, SharedMiddleware};
pub use rooms::{RoomHandler, RoomRegistry, Rooms};
pub use server::{WsServer, WsService};
pub use sink::{ErrorReporter, ErrorSink, TracingSink};

pub use roomcast_pubsub::{
    Envelope, MemoryBroker, MemoryTransport, Payload, PayloadKind, PubSubTransport, RoomHub,
    TransportError,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapter;
    pub use crate::{
        BoxError, BoxedNext, CloseCode, Envelope, ErrorReporter, ErrorSink, HandlerResult,
        Message, Payload, RoomHub, ServerError, SharedMiddleware, TransportKind, WsConfig,
        WsConnection, WsContext, WsServer, WsService,
    };
}
