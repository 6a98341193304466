//! Chat REST routes — list, direct-chat create-or-get, group management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::services::chat::{self, ChatError, ChatView};
use crate::state::AppState;

pub(crate) fn chat_error_to_status(err: &ChatError) -> StatusCode {
    match err {
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::NotMember(_) | ChatError::NotAdmin(_) => StatusCode::FORBIDDEN,
        ChatError::NotGroup(_) | ChatError::InvalidMembers(_) => StatusCode::BAD_REQUEST,
        ChatError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `GET /api/chats` — all chats for the caller, most recently active first.
pub async fn list(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<ChatView>>, StatusCode> {
    let chats = chat::list_chats(&state.pool, auth.user.id)
        .await
        .map_err(|e| chat_error_to_status(&e))?;
    Ok(Json(chats))
}

#[derive(Deserialize)]
pub struct CreateDirectBody {
    pub user_id: Uuid,
}

/// `POST /api/chats` — open a direct chat with another user. Returns the
/// existing chat (200) for a pair that already has one, 201 otherwise.
pub async fn create_direct(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateDirectBody>,
) -> Result<(StatusCode, Json<ChatView>), StatusCode> {
    let (view, created) = chat::create_direct(&state.pool, auth.user.id, body.user_id)
        .await
        .map_err(|e| chat_error_to_status(&e))?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(view)))
}

#[derive(Deserialize)]
pub struct CreateGroupBody {
    pub name: String,
    pub user_ids: Vec<Uuid>,
}

/// `POST /api/chats/group` — create a group chat with the caller as admin.
pub async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateGroupBody>,
) -> Result<(StatusCode, Json<ChatView>), StatusCode> {
    let view = chat::create_group(&state.pool, auth.user.id, &body.name, &body.user_ids)
        .await
        .map_err(|e| chat_error_to_status(&e))?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Deserialize)]
pub struct UpdateGroupBody {
    pub name: Option<String>,
    pub user_ids: Option<Vec<Uuid>>,
}

/// `PATCH /api/chats/group/:id` — rename or re-member a group. Admin only.
pub async fn update_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<UpdateGroupBody>,
) -> Result<Json<ChatView>, StatusCode> {
    let view = chat::update_group(
        &state.pool,
        chat_id,
        auth.user.id,
        body.name.as_deref(),
        body.user_ids.as_deref(),
    )
    .await
    .map_err(|e| chat_error_to_status(&e))?;
    Ok(Json(view))
}

/// `DELETE /api/chats/group/:id` — delete a group chat. Admin only.
pub async fn delete_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    chat::delete_group(&state.pool, chat_id, auth.user.id)
        .await
        .map_err(|e| chat_error_to_status(&e))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `GET /api/chats/:id` — one chat with members and preview expanded.
pub async fn get_chat(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<ChatView>, StatusCode> {
    let view = chat::get_chat(&state.pool, chat_id, auth.user.id)
        .await
        .map_err(|e| chat_error_to_status(&e))?;
    Ok(Json(view))
}

/// `DELETE /api/chats/:id` — delete a chat the caller participates in,
/// cascading its messages.
pub async fn delete_chat(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    chat::delete_chat(&state.pool, chat_id, auth.user.id)
        .await
        .map_err(|e| chat_error_to_status(&e))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
