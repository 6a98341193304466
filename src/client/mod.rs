//! Client-side halves of the realtime core.
//!
//! ARCHITECTURE
//! ============
//! The server fans events out; these modules are the state machines a client
//! runs against that stream. They are deliberately UI-free: a frontend wires
//! them to its socket and render layer.
//!
//! - `roster` — online set, reconciled against authoritative snapshots
//! - `typing` — debounced typing signals with idle-timeout expiry
//! - `unread` — per-chat unread counters with sender/active suppression
//! - `outbox` — optimistic pending messages, resolved or rolled back once

pub mod outbox;
pub mod roster;
pub mod typing;
pub mod unread;
