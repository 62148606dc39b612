#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use roomcast_ws::prelude::*;
use roomcast_ws::ConnectionId;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WireMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Error kinds received by the sink, in order
#[derive(Clone, Default)]
pub struct Reports(Arc<Mutex<Vec<&'static str>>>);

impl Reports {
    pub fn reporter(&self) -> ErrorReporter {
        let seen = self.0.clone();
        ErrorReporter::new(move |e: &ServerError, _c: Option<ConnectionId>| {
            seen.lock().unwrap().push(e.kind());
        })
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().iter().filter(|k| **k == kind).count()
    }
}

pub async fn spawn(server: WsServer) -> (SocketAddr, WsService) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = server.build();
    tokio::spawn(service.clone().serve(listener));
    (addr, service)
}

pub async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}{}", addr, path))
        .await
        .unwrap();
    client
}

/// Next data frame, failing the test after two seconds
pub async fn next(client: &mut Client) -> WireMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read failed");
        if !frame.is_ping() && !frame.is_pong() {
            return frame;
        }
    }
}

pub async fn next_text(client: &mut Client) -> String {
    match next(client).await {
        WireMessage::Text(text) => text,
        other => panic!("expected text, got {:?}", other),
    }
}

/// Whether nothing arrives within `window`
pub async fn silent(client: &mut Client, window: Duration) -> bool {
    tokio::time::timeout(window, client.next()).await.is_err()
}

/// Read until the server drops the socket
///
/// Reading past a close frame is what sends the client's close reply.
pub async fn drain(client: &mut Client) {
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while client.next().await.is_some() {}
    })
    .await;
}

pub async fn send_text(client: &mut Client, text: &str) {
    client
        .send(WireMessage::Text(text.to_string()))
        .await
        .unwrap();
}

/// Poll `check` until it holds, failing after two seconds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub async fn echo(ctx: WsContext) -> HandlerResult {
    while let Some(msg) = ctx.socket().recv().await {
        ctx.socket().send(msg)?;
    }
    Ok(())
}

/// Joins the room named in the path, then confirms with "joined"
pub async fn join_room(ctx: WsContext) -> HandlerResult {
    let room = ctx.param("room").unwrap_or_default().to_string();
    ctx.rooms().join(room).await;
    ctx.socket().send_text("joined")?;
    Ok(())
}
