//! Room membership — personal/chat rooms and broadcast fan-out.
//!
//! DESIGN
//! ======
//! Rooms map connections to their outbound event senders. Two room kinds
//! exist: a personal room keyed by user id (auto-joined at registration,
//! never left, used for user-scoped notifications) and chat rooms keyed by
//! chat id (joined and left explicitly by client commands). Join and leave
//! are idempotent; a leave for a room never joined is logged, not fatal.
//!
//! ERROR HANDLING
//! ==============
//! Broadcasting to a room with zero members is a normal no-op: offline
//! recipients simply miss the realtime event and catch up on the next
//! history fetch. Sends use `try_send` so one slow client never stalls
//! fan-out for the rest of the room.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::event::Event;
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

/// Room identifier. Personal rooms are keyed by user identity, chat rooms by
/// chat identity; the two id spaces never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    User(Uuid),
    Chat(Uuid),
}

/// Connection-to-room membership tables plus per-connection senders.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomKey, HashMap<Uuid, mpsc::Sender<Event>>>,
    joined: HashMap<Uuid, HashSet<RoomKey>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { rooms: HashMap::new(), joined: HashMap::new() }
    }

    /// Add a connection to a room. Returns false if it was already a member.
    pub fn join(&mut self, conn_id: Uuid, room: RoomKey, tx: mpsc::Sender<Event>) -> bool {
        let newly_joined = self.joined.entry(conn_id).or_default().insert(room);
        if newly_joined {
            self.rooms.entry(room).or_default().insert(conn_id, tx);
        }
        newly_joined
    }

    /// Remove a connection from a room. Returns false (and leaves no trace)
    /// if it was not a member; empty rooms are evicted.
    pub fn leave(&mut self, conn_id: Uuid, room: RoomKey) -> bool {
        let was_member = self
            .joined
            .get_mut(&conn_id)
            .is_some_and(|rooms| rooms.remove(&room));
        if !was_member {
            debug!(?room, %conn_id, "leave for room not joined; ignoring");
            return false;
        }

        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
        true
    }

    #[must_use]
    pub fn is_member(&self, conn_id: Uuid, room: RoomKey) -> bool {
        self.joined
            .get(&conn_id)
            .is_some_and(|rooms| rooms.contains(&room))
    }

    /// Current member connections of a room.
    #[must_use]
    pub fn members_of(&self, room: RoomKey) -> Vec<Uuid> {
        self.rooms
            .get(&room)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a connection from every room it joined. Called on disconnect so
    /// no membership entry outlives its connection. Returns the rooms left.
    pub fn drop_connection(&mut self, conn_id: Uuid) -> Vec<RoomKey> {
        let Some(rooms) = self.joined.remove(&conn_id) else {
            return Vec::new();
        };

        let mut left = Vec::with_capacity(rooms.len());
        for room in rooms {
            if let Some(members) = self.rooms.get_mut(&room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    self.rooms.remove(&room);
                }
            }
            left.push(room);
        }
        left
    }

    /// Clone the senders of a room's members, minus an optional exclusion.
    #[must_use]
    pub fn senders(&self, room: RoomKey, exclude: Option<Uuid>) -> Vec<(Uuid, mpsc::Sender<Event>)> {
        let Some(members) = self.rooms.get(&room) else {
            return Vec::new();
        };
        members
            .iter()
            .filter(|(conn_id, _)| exclude != Some(**conn_id))
            .map(|(conn_id, tx)| (*conn_id, tx.clone()))
            .collect()
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast an event to all connections in a chat room, optionally
/// excluding one (the sender, to suppress room echo).
pub async fn broadcast_chat(state: &AppState, chat_id: Uuid, event: &Event, exclude: Option<Uuid>) {
    let targets = {
        let rooms = state.rooms.read().await;
        rooms.senders(RoomKey::Chat(chat_id), exclude)
    };

    for (conn_id, tx) in targets {
        // Best-effort: if a client's channel is full, skip it.
        if tx.try_send(event.clone()).is_err() {
            debug!(%conn_id, op = %event.op, "dropping room broadcast for saturated client");
        }
    }
}

/// Broadcast an event to a user's personal room (every device of one user).
pub async fn broadcast_user(state: &AppState, user_id: Uuid, event: &Event) {
    let targets = {
        let rooms = state.rooms.read().await;
        rooms.senders(RoomKey::User(user_id), None)
    };

    for (conn_id, tx) in targets {
        if tx.try_send(event.clone()).is_err() {
            debug!(%conn_id, op = %event.op, "dropping user broadcast for saturated client");
        }
    }
}

/// Broadcast an event to every live connection, optionally excluding one.
/// Used for presence transitions, roster snapshots, and unread bumps.
pub async fn broadcast_global(state: &AppState, event: &Event, exclude: Option<Uuid>) {
    let targets: Vec<(Uuid, mpsc::Sender<Event>)> = {
        let clients = state.clients.read().await;
        clients
            .iter()
            .filter(|(conn_id, _)| exclude != Some(**conn_id))
            .map(|(conn_id, tx)| (*conn_id, tx.clone()))
            .collect()
    };

    for (conn_id, tx) in targets {
        if tx.try_send(event.clone()).is_err() {
            debug!(%conn_id, op = %event.op, "dropping global broadcast for saturated client");
        }
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
