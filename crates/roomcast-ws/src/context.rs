//! Request-scoped context handed down the handler chain

use crate::connection::{ConnectionId, WsConnection};
use crate::rooms::RoomRegistry;
use http::{HeaderMap, Method, Uri};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Everything a handler knows about one upgraded connection
///
/// Cheap to clone; all clones share the same extensions.
#[derive(Clone)]
pub struct WsContext {
    inner: Arc<Inner>,
}

struct Inner {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    route: Arc<str>,
    params: HashMap<String, String>,
    socket: WsConnection,
    extensions: Mutex<http::Extensions>,
}

/// Upgrade request data captured during the handshake
#[derive(Debug, Clone)]
pub(crate) struct RequestParts {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub route: Arc<str>,
    pub params: HashMap<String, String>,
}

impl WsContext {
    pub(crate) fn new(parts: RequestParts, socket: WsConnection) -> Self {
        Self {
            inner: Arc::new(Inner {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                route: parts.route,
                params: parts.params,
                socket,
                extensions: Mutex::new(http::Extensions::new()),
            }),
        }
    }

    /// The upgraded connection
    pub fn socket(&self) -> &WsConnection {
        &self.inner.socket
    }

    /// The connection's room registry
    pub fn rooms(&self) -> &RoomRegistry {
        self.inner.socket.rooms()
    }

    /// Connection identity
    pub fn id(&self) -> ConnectionId {
        self.inner.socket.id()
    }

    /// Method of the upgrade request
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// Full URI of the upgrade request
    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    /// Request path
    pub fn path(&self) -> &str {
        self.inner.uri.path()
    }

    /// Raw query string
    pub fn query(&self) -> Option<&str> {
        self.inner.uri.query()
    }

    /// First value of a query parameter
    ///
    /// Values are returned as sent; no percent-decoding is applied.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query()?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// A header value, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name)?.to_str().ok()
    }

    /// Route pattern that matched, as registered
    pub fn route(&self) -> &str {
        &self.inner.route
    }

    /// All path parameters
    pub fn params(&self) -> &HashMap<String, String> {
        &self.inner.params
    }

    /// A path parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.params.get(name).map(String::as_str)
    }

    /// Store a value for later steps of the chain
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.inner
            .extensions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(value)
    }

    /// A value stored by an earlier step
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.inner
            .extensions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get::<T>()
            .cloned()
    }
}

impl fmt::Debug for WsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsContext")
            .field("id", &self.id())
            .field("uri", &self.inner.uri)
            .field("route", &self.inner.route)
            .finish()
    }
}
