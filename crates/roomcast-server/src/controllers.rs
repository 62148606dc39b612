//! Endpoint handlers

use roomcast_ws::{ControllerRegistry, HandlerResult, Message, WsContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Controllers addressable by name from the route table
pub fn registry() -> ControllerRegistry {
    ControllerRegistry::new()
        .register("home.echo", echo)
        .register("home.room", room)
        .register("home.chat", chat)
}

/// Send every frame back unchanged
pub async fn echo(ctx: WsContext) -> HandlerResult {
    while let Some(msg) = ctx.socket().recv().await {
        if ctx.socket().send(msg).is_err() {
            break;
        }
    }
    Ok(())
}

/// Command sent by clients of the `/room` endpoint
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum RoomCommand {
    Join { rooms: Value },
    Leave { rooms: Value },
    Say { room: String, text: String },
}

#[derive(Debug, Serialize)]
struct RoomReply<'a> {
    ok: bool,
    op: &'a str,
    rooms: Vec<String>,
}

/// Client-driven room membership
///
/// Accepts `{"op":"join","rooms":...}`, `{"op":"leave","rooms":...}` and
/// `{"op":"say","room":"...","text":"..."}`. Room arguments come straight
/// from the client; malformed ones are reported, never fatal.
pub async fn room(ctx: WsContext) -> HandlerResult {
    while let Some(msg) = ctx.socket().recv().await {
        let command = match msg.as_json::<RoomCommand>() {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!(connection = %ctx.id(), error = %e, "ignoring malformed room command");
                continue;
            }
        };

        let (op, ok) = match command {
            RoomCommand::Join { rooms } => ("join", {
                ctx.rooms().join(rooms).await;
                true
            }),
            RoomCommand::Leave { rooms } => ("leave", {
                ctx.rooms().leave(rooms).await;
                true
            }),
            RoomCommand::Say { room, text } => ("say", ctx.rooms().send_to(&room, text).await),
        };

        let reply = RoomReply {
            ok,
            op,
            rooms: ctx.rooms().joined_rooms(),
        };
        if ctx.socket().send_json(&reply).is_err() {
            break;
        }
    }
    Ok(())
}

/// Chat in the room named by the path
///
/// Text frames are broadcast to the room as `{"from": ..., "text": ...}`;
/// binary frames are relayed as-is.
pub async fn chat(ctx: WsContext) -> HandlerResult {
    let room = match ctx.param("room") {
        Some(room) => room.to_string(),
        None => return Err("chat route is missing its room parameter".into()),
    };
    let from = ctx
        .get::<User>()
        .map(|user| user.0)
        .unwrap_or_else(|| ctx.id().to_string());

    ctx.rooms().join(room.as_str()).await;
    tracing::info!(connection = %ctx.id(), room = %room, user = %from, "joined chat");

    while let Some(msg) = ctx.socket().recv().await {
        match msg {
            Message::Text(text) => {
                let line = serde_json::json!({ "from": from, "text": text });
                ctx.rooms().send_json_to(&room, &line).await;
            }
            Message::Binary(data) => {
                ctx.rooms().send_to(&room, data).await;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Authenticated user name, set by the token middleware
#[derive(Debug, Clone)]
pub struct User(pub String);
