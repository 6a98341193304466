//! WebSocket handler — the realtime coordination core.
//!
//! DESIGN
//! ======
//! On upgrade, consumes a one-time ticket, registers the connection in the
//! presence registry, auto-joins the user's personal room, and enters a
//! `select!` loop:
//! - Incoming client events → parse + dispatch by op prefix
//! - Broadcast events from peers → forward to the client
//!
//! Handler functions validate and mutate state, then return an `Outcome`;
//! the dispatch layer owns the reply-to-sender path. Message fan-out is the
//! one exception: it emits to several scopes (room, global unread bump,
//! global chat preview) and so broadcasts directly from its handler.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → registry transition → `session:connected`, presence + roster
//! 2. Client sends events → dispatch → handler returns Outcome
//! 3. Close → teardown of rooms/clients/presence → offline + roster
//!
//! Only the 0↔1 connection-count crossings of one user are broadcast;
//! extra tabs and devices come and go silently.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::event::{Data, Event};
use crate::services::presence::Transition;
use crate::services::room::{self, RoomKey};
use crate::services::{session, user};
use crate::state::AppState;

const CLIENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide what the sender gets back.
enum Outcome {
    /// Send empty done to sender only.
    Done,
    /// Relay the op to chat-room peers excluding the sender; no sender reply.
    /// Used for typing signals (ephemeral, never persisted).
    PeerRelay { chat_id: Uuid, op: String, data: Data },
    /// Protocol violation from a stale or misbehaving client: already logged,
    /// dropped without a reply so the actor sees no error.
    Drop,
}

/// Per-connection identity, fixed at upgrade time.
#[derive(Debug, Clone, Copy)]
struct ConnCtx {
    conn_id: Uuid,
    user_id: Uuid,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket) = params.get("ticket") else {
        return (StatusCode::UNAUTHORIZED, "ticket required").into_response();
    };

    // Authentication failure rejects the connection before any registration.
    let user_id = match session::consume_ws_ticket(&state.pool, ticket).await {
        Ok(Some(uid)) => uid,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid or expired ticket").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ws ticket validation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "ticket validation error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: Uuid) {
    let ctx = ConnCtx { conn_id: Uuid::new_v4(), user_id };

    // Per-connection channel for receiving broadcast events from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<Event>(CLIENT_CHANNEL_CAPACITY);

    let transition = register_connection(&state, ctx, client_tx).await;

    let welcome = Event::request("session:connected", Data::new())
        .with_data("conn_id", ctx.conn_id.to_string())
        .with_data("user_id", ctx.user_id.to_string());
    if send_event(&mut socket, &welcome).await.is_err() {
        teardown_connection(&state, ctx).await;
        return;
    }

    info!(conn_id = %ctx.conn_id, %user_id, "ws: client connected");
    announce_register(&state, ctx, transition).await;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, ctx, &text).await;
                        for event in replies {
                            if send_event(&mut socket, &event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = client_rx.recv() => {
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    teardown_connection(&state, ctx).await;
    info!(conn_id = %ctx.conn_id, "ws: client disconnected");
}

/// Register a connection everywhere the realtime core tracks it: presence
/// count, global client map, and the user's personal room.
async fn register_connection(state: &AppState, ctx: ConnCtx, tx: mpsc::Sender<Event>) -> Transition {
    let transition = state.presence.write().await.register(ctx.user_id);
    state.clients.write().await.insert(ctx.conn_id, tx.clone());
    state
        .rooms
        .write()
        .await
        .join(ctx.conn_id, RoomKey::User(ctx.user_id), tx);
    transition
}

/// Emit the presence consequences of a registration: `presence:online` on
/// the 0→1 crossing, then a roster snapshot to everyone as self-heal. The
/// roster is authoritative; clients reconcile their set on every delivery.
async fn announce_register(state: &AppState, ctx: ConnCtx, transition: Transition) {
    if transition == Transition::BecameOnline {
        let online = Event::request("presence:online", Data::new())
            .with_data("user_id", ctx.user_id.to_string());
        room::broadcast_global(state, &online, None).await;
        persist_presence(state, ctx.user_id, true);
    }

    broadcast_roster(state).await;
}

/// Tear down everything a connection owns: room memberships, the global
/// client entry, and its presence count. Broadcasts `presence:offline` on
/// the 1→0 crossing and a fresh roster either way.
async fn teardown_connection(state: &AppState, ctx: ConnCtx) {
    state.rooms.write().await.drop_connection(ctx.conn_id);
    state.clients.write().await.remove(&ctx.conn_id);
    let transition = state.presence.write().await.deregister(ctx.user_id);

    if transition == Transition::BecameOffline {
        let offline = Event::request("presence:offline", Data::new())
            .with_data("user_id", ctx.user_id.to_string());
        room::broadcast_global(state, &offline, None).await;
        persist_presence(state, ctx.user_id, false);
    }

    broadcast_roster(state).await;
}

/// Send the full online roster to every connected client.
async fn broadcast_roster(state: &AppState) {
    let online = state.presence.read().await.roster();
    let roster = Event::request("presence:roster", Data::new()).with_data("online", serde_json::json!(online));
    room::broadcast_global(state, &roster, None).await;
}

/// Spawn a fire-and-forget task for the persisted side of a presence
/// boundary crossing (`is_online` flag + last-seen stamp).
fn persist_presence(state: &AppState, user_id: Uuid, online: bool) {
    let pool = state.pool.clone();
    tokio::spawn(async move {
        if let Err(e) = user::set_presence(&pool, user_id, online).await {
            warn!(error = %e, %user_id, online, "presence persist failed");
        }
    });
}

// =============================================================================
// EVENT DISPATCH
// =============================================================================

/// Parse and process one inbound text event and return events for the sender.
///
/// This keeps websocket transport concerns separate from event handling, so
/// tests can exercise dispatch and fan-out end-to-end without a socket.
async fn process_inbound_text(state: &AppState, ctx: ConnCtx, text: &str) -> Vec<Event> {
    let mut req: Event = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(conn_id = %ctx.conn_id, error = %e, "ws: invalid inbound event");
            let err = Event::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the authenticated user as `from` — never trust the client's claim.
    req.from = Some(ctx.user_id.to_string());

    let result = match req.prefix() {
        "chat" => handle_chat(state, ctx, &req).await,
        "typing" => handle_typing(state, ctx, &req).await,
        "message" => handle_message(state, ctx, &req).await,
        prefix => Err(req.error(format!("unknown op prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::PeerRelay { chat_id, op, data }) => {
            let relay = Event::request(op, data)
                .with_chat_id(chat_id)
                .with_from(ctx.user_id.to_string());
            room::broadcast_chat(state, chat_id, &relay, Some(ctx.conn_id)).await;
            vec![]
        }
        Ok(Outcome::Drop) => vec![],
        Err(err_event) => vec![err_event],
    }
}

/// Pull the chat id off the envelope or the data map.
fn require_chat_id(req: &Event) -> Option<Uuid> {
    req.chat_id.or_else(|| {
        req.data
            .get("chat_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    })
}

// =============================================================================
// CHAT ROOM HANDLERS
// =============================================================================

async fn handle_chat(state: &AppState, ctx: ConnCtx, req: &Event) -> Result<Outcome, Event> {
    let op = req.op.split_once(':').map_or("", |(_, op)| op);
    let Some(chat_id) = require_chat_id(req) else {
        return Err(req.error("chat_id required"));
    };

    match op {
        "join" => {
            let Some(tx) = state.clients.read().await.get(&ctx.conn_id).cloned() else {
                // Connection raced its own teardown; nothing to join.
                return Ok(Outcome::Drop);
            };
            let newly_joined = state
                .rooms
                .write()
                .await
                .join(ctx.conn_id, RoomKey::Chat(chat_id), tx);
            if newly_joined {
                info!(conn_id = %ctx.conn_id, %chat_id, "ws: joined chat room");
            }
            Ok(Outcome::Done)
        }
        "leave" => {
            state
                .rooms
                .write()
                .await
                .leave(ctx.conn_id, RoomKey::Chat(chat_id));
            Ok(Outcome::Done)
        }
        _ => Err(req.error(format!("unknown chat op: {op}"))),
    }
}

// =============================================================================
// TYPING HANDLERS
// =============================================================================

async fn handle_typing(state: &AppState, ctx: ConnCtx, req: &Event) -> Result<Outcome, Event> {
    let op = req.op.split_once(':').map_or("", |(_, op)| op);
    if op != "start" && op != "stop" {
        return Err(req.error(format!("unknown typing op: {op}")));
    }

    let Some(chat_id) = require_chat_id(req) else {
        warn!(conn_id = %ctx.conn_id, op = %req.op, "typing signal with no chat_id; dropping");
        return Ok(Outcome::Drop);
    };

    // Spoof guard: only forward typing for rooms this connection joined.
    if !state
        .rooms
        .read()
        .await
        .is_member(ctx.conn_id, RoomKey::Chat(chat_id))
    {
        warn!(conn_id = %ctx.conn_id, %chat_id, op = %req.op, "typing signal for unjoined room; dropping");
        return Ok(Outcome::Drop);
    }

    let mut data = Data::new();
    data.insert("user_id".into(), serde_json::json!(ctx.user_id.to_string()));
    data.insert("chat_id".into(), serde_json::json!(chat_id.to_string()));
    Ok(Outcome::PeerRelay { chat_id, op: req.op.clone(), data })
}

// =============================================================================
// MESSAGE FAN-OUT (exception: broadcasts multiple scopes directly)
// =============================================================================

async fn handle_message(state: &AppState, ctx: ConnCtx, req: &Event) -> Result<Outcome, Event> {
    let op = req.op.split_once(':').map_or("", |(_, op)| op);
    let Some(chat_id) = require_chat_id(req) else {
        return Err(req.error("chat_id required"));
    };

    // Same guard as typing: fan-out only for rooms this connection joined.
    if !state
        .rooms
        .read()
        .await
        .is_member(ctx.conn_id, RoomKey::Chat(chat_id))
    {
        warn!(conn_id = %ctx.conn_id, %chat_id, op = %req.op, "message relay for unjoined room; dropping");
        return Ok(Outcome::Drop);
    }

    match op {
        "new" => {
            // Room peers get the full persisted record the sender relayed.
            let received = Event::request("message:received", req.data.clone())
                .with_chat_id(chat_id)
                .with_from(ctx.user_id.to_string());
            room::broadcast_chat(state, chat_id, &received, Some(ctx.conn_id)).await;

            // Every other client learns there is something unread, even with
            // no chat open — badge counts are global, not room-scoped.
            let bump = Event::request("unread:count", Data::new())
                .with_chat_id(chat_id)
                .with_data("chat_id", chat_id.to_string())
                .with_data("from", ctx.user_id.to_string());
            room::broadcast_global(state, &bump, Some(ctx.conn_id)).await;

            // Chat-list preview update for everyone.
            let preview = serde_json::to_value(&req.data).unwrap_or_default();
            let updated = Event::request("chat:updated", Data::new())
                .with_chat_id(chat_id)
                .with_data("chat_id", chat_id.to_string())
                .with_data("last_message", preview);
            room::broadcast_global(state, &updated, None).await;

            Ok(Outcome::Done)
        }
        "deleted" => {
            // The whole room, sender included, sees the deletion and the
            // recomputed preview atomically with the detail view.
            let deleted = Event::request("message:deleted", req.data.clone())
                .with_chat_id(chat_id)
                .with_from(ctx.user_id.to_string());
            room::broadcast_chat(state, chat_id, &deleted, None).await;

            let last_message = req
                .data
                .get("last_message")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let updated = Event::request("chat:updated", Data::new())
                .with_chat_id(chat_id)
                .with_data("chat_id", chat_id.to_string())
                .with_data("last_message", last_message);
            room::broadcast_global(state, &updated, None).await;

            Ok(Outcome::Done)
        }
        _ => Err(req.error(format!("unknown message op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize event");
            return Err(());
        }
    };
    // Typing traffic is too chatty to log.
    if event.prefix() != "typing" {
        info!(id = %event.id, op = %event.op, status = ?event.status, "ws: send event");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
