//! Connection server
//!
//! [`WsServer`] collects routes and middlewares; [`WsService`] is the
//! immutable result that accepts sockets, performs upgrades and runs each
//! connection's handler chain on its own task.

use crate::config::WsConfig;
use crate::connection::{ConnectionId, DriverSettings, WsConnection};
use crate::context::WsContext;
use crate::controller::{terminal, Controller, ControllerRegistry};
use crate::error::{BoxError, ServerError};
use crate::message::CloseCode;
use crate::middleware::{compose, Middleware, SharedMiddleware};
use crate::rooms;
use crate::router::RouteTable;
use crate::sink::{ErrorReporter, ErrorSink};
use crate::upgrade;
use futures_util::FutureExt;
use roomcast_pubsub::{Payload, RoomHub};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tungstenite::protocol::WebSocketConfig;

/// Builder for a WebSocket server
///
/// ```rust,ignore
/// let service = WsServer::new(config)
///     .with_hub(hub)
///     .use_middleware(log_connection)
///     .route("/echo", echo)
///     .route("/chat/{room}", chat)
///     .build();
/// service.run("127.0.0.1:8080").await?;
/// ```
pub struct WsServer {
    config: WsConfig,
    hub: Option<Arc<RoomHub>>,
    reporter: ErrorReporter,
    controllers: ControllerRegistry,
    app_middlewares: Vec<SharedMiddleware>,
    middlewares: Vec<SharedMiddleware>,
    routes: RouteTable,
}

impl WsServer {
    /// Create a builder with no routes and no transport
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            hub: None,
            reporter: ErrorReporter::default(),
            controllers: ControllerRegistry::new(),
            app_middlewares: Vec::new(),
            middlewares: Vec::new(),
            routes: RouteTable::new(),
        }
    }

    /// Use `hub` for every room operation of this server
    pub fn with_hub(mut self, hub: Arc<RoomHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Like [`with_hub`](Self::with_hub), accepting the result of
    /// [`adapter::connect`](crate::adapter::connect)
    pub fn with_adapter(mut self, hub: Option<Arc<RoomHub>>) -> Self {
        self.hub = hub;
        self
    }

    /// Report recovered errors to `sink`
    pub fn error_sink<S: ErrorSink>(mut self, sink: S) -> Self {
        self.reporter = ErrorReporter::new(sink);
        self
    }

    /// Report recovered errors through an existing reporter
    pub fn error_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Controllers available to [`route_named`](Self::route_named)
    pub fn controllers(mut self, controllers: ControllerRegistry) -> Self {
        self.controllers = controllers;
        self
    }

    /// Add an app-level middleware
    ///
    /// App-level middlewares run first in every chain, but only when
    /// `use_app_middlewares` is enabled in the configuration.
    pub fn app_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        let middleware = SharedMiddleware::new(middleware);
        if contains(&self.app_middlewares, &middleware) {
            warn!(middleware = middleware.name(), "app middleware registered twice, ignoring");
            return self;
        }
        self.app_middlewares.push(middleware);
        self
    }

    /// Add a server middleware, run by every route registered after it
    pub fn use_middleware<M: Middleware>(self, middleware: M) -> Self {
        self.use_shared(SharedMiddleware::new(middleware))
    }

    /// Add an already shared server middleware
    ///
    /// Registering the same middleware twice is a no-op.
    pub fn use_shared(mut self, middleware: SharedMiddleware) -> Self {
        if contains(&self.middlewares, &middleware) {
            warn!(middleware = middleware.name(), "middleware registered twice, ignoring");
            return self;
        }
        if !self.routes.is_empty() {
            warn!(
                middleware = middleware.name(),
                routes = self.routes.len(),
                "middleware registered after routes, those routes will not run it"
            );
        }
        self.middlewares.push(middleware);
        self
    }

    /// Add a route with no route-specific middleware
    pub fn route<C: Controller>(self, path: &str, controller: C) -> Self {
        self.route_with(path, Vec::new(), controller)
    }

    /// Add a route whose chain includes `middlewares` before the controller
    pub fn route_with<C: Controller>(
        mut self,
        path: &str,
        middlewares: Vec<SharedMiddleware>,
        controller: C,
    ) -> Self {
        self.insert_route(path, middlewares, Arc::new(controller));
        self
    }

    /// Add a route whose controller is looked up by dotted name
    ///
    /// Fails with [`ServerError::ControllerNotFound`] if the name is not
    /// registered.
    pub fn route_named(
        mut self,
        path: &str,
        middlewares: Vec<SharedMiddleware>,
        controller: &str,
    ) -> Result<Self, ServerError> {
        let controller = self.controllers.resolve(controller)?;
        self.insert_route(path, middlewares, controller);
        Ok(self)
    }

    fn insert_route(
        &mut self,
        path: &str,
        route_middlewares: Vec<SharedMiddleware>,
        controller: Arc<dyn Controller>,
    ) {
        let mut layers = Vec::new();
        if self.config.use_app_middlewares {
            layers.extend(self.app_middlewares.iter().cloned());
        }
        layers.extend(self.middlewares.iter().cloned());
        layers.extend(route_middlewares);

        let chain = compose(&layers, terminal(controller));
        self.routes.insert(path, chain);
        debug!(route = %path, layers = layers.len(), "route registered");
    }

    /// Freeze the route table
    pub fn build(self) -> WsService {
        WsService {
            shared: Arc::new(Shared {
                websocket: self.config.websocket_config(),
                driver: DriverSettings {
                    inbound_capacity: self.config.inbound_capacity,
                    outbound_capacity: self.config.outbound_capacity,
                    close_timeout: self.config.close_timeout(),
                },
                routes: self.routes,
                hub: self.hub,
                reporter: self.reporter,
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }
}

fn contains(list: &[SharedMiddleware], middleware: &SharedMiddleware) -> bool {
    list.iter().any(|m| m.same_as(middleware))
}

/// A running WebSocket server
///
/// Cheap to clone; clones share routes, transport and live connections.
#[derive(Clone)]
pub struct WsService {
    shared: Arc<Shared>,
}

struct Shared {
    routes: RouteTable,
    hub: Option<Arc<RoomHub>>,
    reporter: ErrorReporter,
    websocket: WebSocketConfig,
    driver: DriverSettings,
    connections: Mutex<HashMap<ConnectionId, WsContext>>,
}

impl WsService {
    /// Bind `addr` and serve until the process stops
    pub async fn run(self, addr: &str) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "roomcast server listening");
        self.serve(listener).await
    }

    /// Serve connections from `listener`
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// Serve connections until `signal` resolves, then close every open
    /// connection
    pub async fn serve_with_shutdown<F>(
        self,
        listener: TcpListener,
        signal: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(signal);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            // Transient (EMFILE, ECONNABORTED); keep accepting
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let service = self.clone();
                    tokio::spawn(async move {
                        service.handle_stream(stream, Some(remote_addr)).await;
                    });
                }
                _ = &mut signal => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        self.close_all().await;
        Ok(())
    }

    /// Upgrade one stream and run its handler chain to completion
    ///
    /// Returns once the connection is closed and its rooms are released.
    pub async fn handle_stream<S>(&self, stream: S, remote_addr: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let shared = &self.shared;
        let (ws, pending) = match upgrade::accept(stream, &shared.routes, shared.websocket).await {
            Ok(accepted) => accepted,
            Err(e @ ServerError::RouteNotFound { .. }) => {
                debug!(kind = e.kind(), error = %e, remote = ?remote_addr, "no route for upgrade, sent 404");
                return;
            }
            Err(e) => {
                debug!(kind = e.kind(), error = %e, remote = ?remote_addr, "websocket handshake failed");
                return;
            }
        };

        let (socket, driver) = WsConnection::open(
            ws,
            remote_addr,
            shared.hub.clone(),
            shared.reporter.clone(),
            shared.driver,
        );
        let id = socket.id();
        let route = pending.parts.route.clone();
        let ctx = WsContext::new(pending.parts, socket.clone());
        self.live().insert(id, ctx.clone());
        info!(connection = %id, route = %route, remote = ?remote_addr, "connection opened");

        let outcome = AssertUnwindSafe((pending.chain)(ctx)).catch_unwind().await;
        let failure: Option<BoxError> = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(panic) => Some(panic_message(panic).into()),
        };
        match failure {
            None => {
                if socket.is_open() {
                    let _ = socket.close();
                }
            }
            Some(e) => {
                let _ = socket.close_with(CloseCode::Error, "internal error");
                shared.reporter.report(&ServerError::Handler(e), Some(id));
            }
        }

        if let Err(e) = driver.await {
            warn!(connection = %id, error = %e, "connection driver failed");
        }
        self.live().remove(&id);
        info!(connection = %id, route = %route, "connection closed");
    }

    /// Publish a payload to a room
    ///
    /// Returns whether the transport accepted it. Failures are reported
    /// through the error sink.
    pub async fn send_to(&self, room: &str, payload: impl Into<Payload>) -> bool {
        rooms::publish(
            self.shared.hub.as_deref(),
            &self.shared.reporter,
            None,
            room,
            payload.into(),
        )
        .await
    }

    /// Publish a value serialized as JSON text to a room
    pub async fn send_json_to<T: Serialize>(&self, room: &str, value: &T) -> bool {
        rooms::publish_json(
            self.shared.hub.as_deref(),
            &self.shared.reporter,
            None,
            room,
            value,
        )
        .await
    }

    /// Contexts of all open connections
    pub fn connections(&self) -> Vec<WsContext> {
        self.live().values().cloned().collect()
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.live().len()
    }

    /// Close every open connection with "going away" and wait for them
    pub async fn close_all(&self) {
        let open = self.connections();
        if open.is_empty() {
            return;
        }
        info!(connections = open.len(), "closing all connections");
        for ctx in &open {
            let _ = ctx.socket().close_with(CloseCode::Away, "server shutting down");
        }
        for ctx in &open {
            ctx.socket().closed().await;
        }
    }

    /// The room hub, when a transport is configured
    pub fn hub(&self) -> Option<&Arc<RoomHub>> {
        self.shared.hub.as_ref()
    }

    /// Registered route patterns
    pub fn routes(&self) -> Vec<String> {
        self.shared.routes.patterns().map(str::to_string).collect()
    }

    fn live(&self) -> MutexGuard<'_, HashMap<ConnectionId, WsContext>> {
        self.shared
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", msg)
    } else {
        "handler panicked".to_string()
    }
}
