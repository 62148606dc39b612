//! Terminal handlers
//!
//! A controller is the last step of a route chain. Controllers can be passed
//! to a route directly, or registered under a dotted name (`"chat.join"`) in
//! a [`ControllerRegistry`] and referenced by that name when the route is
//! declared. Names are resolved at registration, so a typo fails before the
//! server starts.

use crate::context::WsContext;
use crate::error::{HandlerResult, ServerError};
use crate::middleware::{BoxFuture, BoxedNext};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The application handler at the end of a route chain
pub trait Controller: Send + Sync + 'static {
    /// Handle one connection
    fn call(&self, ctx: WsContext) -> BoxFuture<HandlerResult>;
}

impl<F, Fut> Controller for F
where
    F: Fn(WsContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: WsContext) -> BoxFuture<HandlerResult> {
        Box::pin(self(ctx))
    }
}

/// Name to controller lookup table, built once at startup
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    controllers: BTreeMap<String, Arc<dyn Controller>>,
}

impl ControllerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller under a dotted name, replacing any previous one
    pub fn register<C: Controller>(mut self, name: impl Into<String>, controller: C) -> Self {
        self.controllers.insert(name.into(), Arc::new(controller));
        self
    }

    /// Look up a controller
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Controller>, ServerError> {
        self.controllers
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::ControllerNotFound(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.controllers.keys().map(String::as_str)
    }
}

impl fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Last link of every chain: run the controller, then hold the chain open
/// until the socket closes
///
/// A controller error ends the chain immediately.
pub(crate) fn terminal(controller: Arc<dyn Controller>) -> BoxedNext {
    Arc::new(move |ctx: WsContext| -> BoxFuture<HandlerResult> {
        let controller = controller.clone();
        Box::pin(async move {
            let socket = ctx.socket().clone();
            let outcome = controller.call(ctx).await;
            if outcome.is_ok() {
                socket.closed().await;
            }
            outcome
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_ctx: WsContext) -> HandlerResult {
        Ok(())
    }

    #[test]
    fn test_unknown_name_fails_resolution() {
        let registry = ControllerRegistry::new().register("home.echo", noop);
        assert!(registry.resolve("home.echo").is_ok());
        match registry.resolve("home.missing") {
            Err(ServerError::ControllerNotFound(name)) => assert_eq!(name, "home.missing"),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["home.echo"]);
    }
}
