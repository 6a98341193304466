//! Message REST routes — send, history, edit, soft delete, read state.
//!
//! The realtime consequences of send/delete (room fan-out, unread bumps,
//! chat-list previews) flow through the websocket relay in `routes::ws`;
//! these handlers only touch the store and return the authoritative record
//! the client reconciles its optimistic state against.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::routes::chats::chat_error_to_status;
use crate::services::message::{self, DeleteOutcome, MessageError, MessageRecord};
use crate::state::AppState;

fn message_error_to_status(err: &MessageError) -> StatusCode {
    match err {
        MessageError::NotFound(_) => StatusCode::NOT_FOUND,
        MessageError::EmptyContent => StatusCode::BAD_REQUEST,
        MessageError::NotSender(_) => StatusCode::FORBIDDEN,
        MessageError::Chat(e) => chat_error_to_status(e),
        MessageError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Deserialize)]
pub struct SendBody {
    pub chat_id: Uuid,
    pub content: String,
}

/// `POST /api/messages` — persist a new message.
pub async fn send(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<SendBody>,
) -> Result<(StatusCode, Json<MessageRecord>), StatusCode> {
    let record = message::send_message(&state.pool, body.chat_id, auth.user.id, &body.content)
        .await
        .map_err(|e| message_error_to_status(&e))?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /api/messages/:id` — a chat's history from the caller's perspective.
/// The path id names the chat, not a message.
pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<Vec<MessageRecord>>, StatusCode> {
    let messages = message::fetch_messages(&state.pool, chat_id, auth.user.id)
        .await
        .map_err(|e| message_error_to_status(&e))?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
pub struct EditBody {
    pub content: String,
}

/// `PUT /api/messages/:id/edit` — replace content. Sender only.
pub async fn edit(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<Uuid>,
    Json(body): Json<EditBody>,
) -> Result<Json<MessageRecord>, StatusCode> {
    let record = message::edit_message(&state.pool, message_id, auth.user.id, &body.content)
        .await
        .map_err(|e| message_error_to_status(&e))?;
    Ok(Json(record))
}

/// `DELETE /api/messages/:id` — soft delete. For-all when the caller sent
/// the message, for-me otherwise.
pub async fn delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let outcome = message::delete_message(&state.pool, message_id, auth.user.id)
        .await
        .map_err(|e| message_error_to_status(&e))?;

    let body = match outcome {
        DeleteOutcome::ForAll { message, last_message } => serde_json::json!({
            "message": message,
            "last_message": last_message,
            "deleted_for_all": true,
        }),
        DeleteOutcome::ForSelf { message } => serde_json::json!({
            "message": message,
            "deleted_for_all": false,
        }),
    };
    Ok(Json(body))
}

/// `DELETE /api/messages/chat/:chat_id` — bulk reset of a chat's history.
pub async fn delete_all(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    message::delete_all_in_chat(&state.pool, chat_id, auth.user.id)
        .await
        .map_err(|e| message_error_to_status(&e))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `GET /api/messages/unread-counts` — per-chat unread counts for the
/// caller. Chats with nothing unread are absent, never zero.
pub async fn unread_counts(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<HashMap<Uuid, i64>>, StatusCode> {
    let counts = message::unread_counts(&state.pool, auth.user.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(counts))
}

/// `PUT /api/messages/mark-read/:chat_id` — clear the caller's unread state
/// for a chat, so other devices and future loads agree.
pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    message::mark_read(&state.pool, chat_id, auth.user.id)
        .await
        .map_err(|e| message_error_to_status(&e))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chat::ChatError;

    #[test]
    fn error_mapping_covers_every_variant() {
        assert_eq!(
            message_error_to_status(&MessageError::NotFound(Uuid::nil())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            message_error_to_status(&MessageError::EmptyContent),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            message_error_to_status(&MessageError::NotSender(Uuid::nil())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            message_error_to_status(&MessageError::Chat(ChatError::NotMember(Uuid::nil()))),
            StatusCode::FORBIDDEN
        );
    }
}
