//! Connection middlewares used by the reference server

use crate::controllers::User;
use roomcast_ws::{BoxedNext, CloseCode, HandlerResult, SharedMiddleware, WsContext};
use std::sync::Arc;
use std::time::Instant;

/// Log how long each connection stays in its handler chain
pub async fn log_connection(ctx: WsContext, next: BoxedNext) -> HandlerResult {
    let start = Instant::now();
    let result = next(ctx.clone()).await;
    tracing::info!(
        connection = %ctx.id(),
        route = %ctx.route(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        ok = result.is_ok(),
        "connection finished"
    );
    result
}

/// Require `?token=<expected>` or `Authorization: Bearer <expected>`
///
/// Rejected connections are closed with a policy violation; the rest of the
/// chain does not run. An optional `user` query parameter becomes the
/// [`User`] seen by later handlers.
pub fn require_token(expected: impl Into<String>) -> SharedMiddleware {
    let expected: Arc<str> = Arc::from(expected.into());
    SharedMiddleware::new(move |ctx: WsContext, next: BoxedNext| {
        let expected = expected.clone();
        async move {
            if presented_token(&ctx).as_deref() != Some(&*expected) {
                tracing::warn!(connection = %ctx.id(), remote = ?ctx.socket().remote_addr(), "rejected connection without a valid token");
                let _ = ctx.socket().close_with(CloseCode::Policy, "invalid token");
                return Ok(());
            }
            let user = ctx.query_param("user").unwrap_or("anonymous").to_string();
            ctx.insert(User(user));
            next(ctx).await
        }
    })
}

fn presented_token(ctx: &WsContext) -> Option<String> {
    if let Some(token) = ctx.query_param("token") {
        return Some(token.to_string());
    }
    ctx.header("authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}
