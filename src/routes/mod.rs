//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the REST surface and the websocket endpoint under a single Axum
//! router. REST handlers are thin wrappers over the store; the realtime core
//! lives behind `/api/ws`.

pub mod auth;
pub mod chats;
pub mod messages;
pub mod users;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post, put};
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/ws-ticket", post(auth::ws_ticket))
        .route("/api/users", get(users::search))
        .route("/api/chats", get(chats::list).post(chats::create_direct))
        .route("/api/chats/group", post(chats::create_group))
        .route(
            "/api/chats/group/{id}",
            patch(chats::update_group).delete(chats::delete_group),
        )
        .route("/api/chats/{id}", get(chats::get_chat).delete(chats::delete_chat))
        .route("/api/messages", post(messages::send))
        .route("/api/messages/unread-counts", get(messages::unread_counts))
        .route("/api/messages/mark-read/{id}", put(messages::mark_read))
        .route("/api/messages/chat/{id}", delete(messages::delete_all))
        .route("/api/messages/{id}/edit", put(messages::edit))
        .route("/api/messages/{id}", get(messages::list).delete(messages::delete))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
