//! Upgrade handshake
//!
//! The route is matched inside the handshake callback. An unmatched path is
//! answered with a bare `HTTP/1.1 404 Not Found` status line and the socket
//! never reaches the open state.

use crate::context::RequestParts;
use crate::error::{ServerError, WebSocketError};
use crate::middleware::BoxedNext;
use crate::router::RouteTable;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::protocol::WebSocketConfig;

/// A matched upgrade, waiting for its connection
pub(crate) struct PendingUpgrade {
    pub parts: RequestParts,
    pub chain: BoxedNext,
}

fn route_request(routes: &RouteTable, request: &Request) -> Option<PendingUpgrade> {
    let matched = routes.at(request.uri().path())?;
    Some(PendingUpgrade {
        parts: RequestParts {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            route: matched.route.pattern,
            params: matched.params,
        },
        chain: matched.route.chain,
    })
}

/// Status-only response; tungstenite writes it without headers or body
fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Run the server side of the handshake, matching the path against `routes`
///
/// Fails with [`ServerError::RouteNotFound`] once the 404 was written, or
/// with [`ServerError::WebSocket`] when the handshake itself broke down.
pub(crate) async fn accept<S>(
    stream: S,
    routes: &RouteTable,
    config: WebSocketConfig,
) -> Result<(WebSocketStream<S>, PendingUpgrade), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut pending = None;
    let mut path = String::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        match route_request(routes, request) {
            Some(upgrade) => {
                pending = Some(upgrade);
                Ok(response)
            }
            None => Err(not_found()),
        }
    };

    let result = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(config)).await;
    match (result, pending) {
        (Ok(ws), Some(upgrade)) => Ok((ws, upgrade)),
        (Ok(_), None) => Err(ServerError::RouteNotFound { path }),
        (Err(tungstenite::Error::Http(response)), None)
            if response.status() == StatusCode::NOT_FOUND =>
        {
            Err(ServerError::RouteNotFound { path })
        }
        (Err(e), _) => Err(WebSocketError::Tungstenite(e).into()),
    }
}
