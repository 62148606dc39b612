//! Middleware composition
//!
//! A middleware receives the connection context and the rest of the chain.
//! It may run code before and after calling `next`, or return without
//! calling it to stop the chain.
//!
//! ```rust,ignore
//! async fn require_token(ctx: WsContext, next: BoxedNext) -> HandlerResult {
//!     if ctx.query_param("token").is_none() {
//!         return Err("missing token".into());
//!     }
//!     next(ctx).await
//! }
//! ```

use crate::context::WsContext;
use crate::error::HandlerResult;
use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed, sendable future
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The remainder of a middleware chain
pub type BoxedNext = Arc<dyn Fn(WsContext) -> BoxFuture<HandlerResult> + Send + Sync>;

/// A step in a route's handler chain
pub trait Middleware: Send + Sync + 'static {
    /// Handle the connection, calling `next` to continue the chain
    fn call(&self, ctx: WsContext, next: BoxedNext) -> BoxFuture<HandlerResult>;
}

impl<F, Fut> Middleware for F
where
    F: Fn(WsContext, BoxedNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: WsContext, next: BoxedNext) -> BoxFuture<HandlerResult> {
        Box::pin(self(ctx, next))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Identity {
    // Zero-sized middlewares (fn items, capture-free closures) are identified
    // by type, everything else by allocation.
    Type(TypeId),
    Instance(usize),
}

/// A registered middleware with a stable identity
///
/// Registering the same function twice, or two clones of one
/// `SharedMiddleware`, is detected as a duplicate.
#[derive(Clone)]
pub struct SharedMiddleware {
    inner: Arc<dyn Middleware>,
    identity: Identity,
    name: &'static str,
}

impl SharedMiddleware {
    /// Wrap a middleware
    pub fn new<M: Middleware>(middleware: M) -> Self {
        let inner: Arc<dyn Middleware> = Arc::new(middleware);
        let identity = if std::mem::size_of::<M>() == 0 {
            Identity::Type(TypeId::of::<M>())
        } else {
            Identity::Instance(Arc::as_ptr(&inner) as *const () as usize)
        };
        Self {
            inner,
            identity,
            name: std::any::type_name::<M>(),
        }
    }

    /// Whether both refer to the same middleware
    pub fn same_as(&self, other: &SharedMiddleware) -> bool {
        self.identity == other.identity
    }

    /// Type name of the wrapped middleware
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for SharedMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedMiddleware").field(&self.name).finish()
    }
}

/// Fold middlewares around a terminal handler
///
/// The first middleware runs first.
pub(crate) fn compose(layers: &[SharedMiddleware], terminal: BoxedNext) -> BoxedNext {
    let mut next = terminal;
    for layer in layers.iter().rev() {
        let layer = layer.inner.clone();
        let current_next = next;
        next = Arc::new(move |ctx: WsContext| layer.call(ctx, current_next.clone()));
    }
    next
}
