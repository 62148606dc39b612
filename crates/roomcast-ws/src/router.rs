//! Upgrade path routing

use crate::middleware::BoxedNext;
use matchit::Router as MatchitRouter;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A registered route
#[derive(Clone)]
pub(crate) struct Route {
    pub pattern: Arc<str>,
    pub chain: BoxedNext,
}

/// A successful lookup
pub(crate) struct RouteMatch {
    pub route: Route,
    pub params: HashMap<String, String>,
}

/// Path to handler chain table
///
/// Built before serving and read-only afterwards.
#[derive(Default)]
pub(crate) struct RouteTable {
    inner: MatchitRouter<usize>,
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route
    ///
    /// # Panics
    ///
    /// Panics when the pattern conflicts with an existing route, like
    /// `/rooms/{id}` next to `/rooms/{name}`.
    pub fn insert(&mut self, pattern: &str, chain: BoxedNext) {
        let matchit_path = convert_path_params(pattern);
        if let Err(e) = self.inner.insert(matchit_path, self.routes.len()) {
            panic!(
                "route conflict: '{}' cannot be registered: {}. Each upgrade path must be unambiguous.",
                pattern, e
            );
        }
        self.routes.push(Route {
            pattern: Arc::from(pattern),
            chain,
        });
    }

    /// Find the route for a request path
    pub fn at(&self, path: &str) -> Option<RouteMatch> {
        let matched = self.inner.at(path).ok()?;
        let route = self.routes.get(*matched.value)?.clone();
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Some(RouteMatch { route, params })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered patterns in registration order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| &*r.pattern)
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.patterns()).finish()
    }
}

/// Convert {param} style to :param for matchit
fn convert_path_params(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            '{' => result.push(':'),
            '}' => {}
            _ => result.push(ch),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WsContext;
    use crate::error::HandlerResult;
    use crate::middleware::BoxFuture;

    fn chain() -> BoxedNext {
        Arc::new(|_ctx: WsContext| -> BoxFuture<HandlerResult> { Box::pin(async { Ok(()) }) })
    }

    #[test]
    fn test_convert_path_params() {
        assert_eq!(convert_path_params("/chat/{room}"), "/chat/:room");
        assert_eq!(convert_path_params("/chat/:room"), "/chat/:room");
        assert_eq!(convert_path_params("/echo"), "/echo");
    }

    #[test]
    fn test_matches_static_and_param_routes() {
        let mut table = RouteTable::new();
        table.insert("/echo", chain());
        table.insert("/chat/{room}", chain());

        assert_eq!(&*table.at("/echo").unwrap().route.pattern, "/echo");
        let matched = table.at("/chat/lobby").unwrap();
        assert_eq!(&*matched.route.pattern, "/chat/{room}");
        assert_eq!(matched.params.get("room").map(String::as_str), Some("lobby"));

        assert!(table.at("/missing").is_none());
        assert!(table.at("/chat").is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    #[should_panic(expected = "route conflict")]
    fn test_conflicting_patterns_panic() {
        let mut table = RouteTable::new();
        table.insert("/rooms/{id}", chain());
        table.insert("/rooms/:name", chain());
    }
}
