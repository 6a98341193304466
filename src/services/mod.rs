//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation and auth plumbing.
//! `presence` and `room` are purely in-memory; the rest wrap the store.

pub mod chat;
pub mod message;
pub mod presence;
pub mod room;
pub mod session;
pub mod user;
