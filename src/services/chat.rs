//! Chat service — conversations and their participant sets.
//!
//! DESIGN
//! ======
//! Direct chats have exactly two immutable participants; creating one for a
//! pair that already shares a direct chat returns the existing record instead
//! of a duplicate. Group chats carry a name, an admin, and a mutable member
//! set gated on the admin. Every chat caches a pointer to its most recent
//! non-fully-deleted message so chat-list previews come from one lookup.

use std::collections::HashMap;

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::event::now_ms;
use crate::services::message::{self, MessageRecord};
use crate::services::user::{UserRow, row_to_user};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat not found: {0}")]
    NotFound(Uuid),
    #[error("not a member of chat {0}")]
    NotMember(Uuid),
    #[error("not a group chat: {0}")]
    NotGroup(Uuid),
    #[error("only the group admin may do that: {0}")]
    NotAdmin(Uuid),
    #[error("invalid participants: {0}")]
    InvalidMembers(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::event::ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_CHAT_NOT_FOUND",
            Self::NotMember(_) => "E_NOT_MEMBER",
            Self::NotGroup(_) => "E_NOT_GROUP",
            Self::NotAdmin(_) => "E_NOT_ADMIN",
            Self::InvalidMembers(_) => "E_INVALID_MEMBERS",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Bare chat row as stored.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatRow {
    pub id: Uuid,
    pub name: Option<String>,
    pub is_group: bool,
    pub admin_id: Option<Uuid>,
    pub avatar_url: Option<String>,
    pub created_ts: i64,
}

/// Chat with related entities expanded, the shape consumers receive.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatView {
    #[serde(flatten)]
    pub chat: ChatRow,
    pub members: Vec<UserRow>,
    pub last_message: Option<MessageRecord>,
}

const CHAT_COLUMNS: &str = "id, name, is_group, admin_id, avatar_url, created_ts";

fn row_to_chat(r: &sqlx::postgres::PgRow) -> ChatRow {
    ChatRow {
        id: r.get("id"),
        name: r.get("name"),
        is_group: r.get("is_group"),
        admin_id: r.get("admin_id"),
        avatar_url: r.get("avatar_url"),
        created_ts: r.get("created_ts"),
    }
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

/// Load a chat and verify the caller belongs to it.
///
/// # Errors
///
/// `NotFound` if the chat does not exist, `NotMember` if the caller is not a
/// participant.
pub async fn ensure_member(pool: &PgPool, chat_id: Uuid, user_id: Uuid) -> Result<ChatRow, ChatError> {
    let row = sqlx::query(&format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = $1"))
        .bind(chat_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ChatError::NotFound(chat_id))?;

    let is_member: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM chat_members WHERE chat_id = $1 AND user_id = $2)")
            .bind(chat_id)
            .bind(user_id)
            .fetch_one(pool)
            .await?;

    if !is_member {
        return Err(ChatError::NotMember(chat_id));
    }
    Ok(row_to_chat(&row))
}

async fn member_rows(pool: &PgPool, chat_id: Uuid) -> Result<Vec<UserRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT u.id, u.name, u.email, u.avatar_url, u.is_online, u.last_seen_ts
         FROM chat_members cm
         JOIN users u ON u.id = cm.user_id
         WHERE cm.chat_id = $1
         ORDER BY u.name ASC",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_user).collect())
}

async fn load_view(pool: &PgPool, chat: ChatRow) -> Result<ChatView, ChatError> {
    let members = member_rows(pool, chat.id).await?;
    let last_message = message::latest_visible(pool, chat.id).await?;
    Ok(ChatView { chat, members, last_message })
}

// =============================================================================
// CREATE
// =============================================================================

/// Create a direct chat between two users, or return the existing one for
/// the same unordered pair. The bool is true when a new chat was created.
///
/// # Errors
///
/// `InvalidMembers` when the pair is degenerate or the peer is unknown.
pub async fn create_direct(pool: &PgPool, me: Uuid, other: Uuid) -> Result<(ChatView, bool), ChatError> {
    if me == other {
        return Err(ChatError::InvalidMembers("cannot open a chat with yourself".into()));
    }

    let peer_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(other)
        .fetch_one(pool)
        .await?;
    if !peer_exists {
        return Err(ChatError::InvalidMembers(format!("unknown user: {other}")));
    }

    // Unordered-pair dedup: any existing non-group chat containing both.
    let existing = sqlx::query(&format!(
        "SELECT {CHAT_COLUMNS} FROM chats c
         WHERE c.is_group = FALSE
           AND EXISTS (SELECT 1 FROM chat_members m WHERE m.chat_id = c.id AND m.user_id = $1)
           AND EXISTS (SELECT 1 FROM chat_members m WHERE m.chat_id = c.id AND m.user_id = $2)
         LIMIT 1"
    ))
    .bind(me)
    .bind(other)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = existing {
        let view = load_view(pool, row_to_chat(&row)).await?;
        return Ok((view, false));
    }

    let chat_id = Uuid::new_v4();
    let created_ts = now_ms();
    let mut tx = pool.begin().await?;
    sqlx::query("INSERT INTO chats (id, is_group, created_ts) VALUES ($1, FALSE, $2)")
        .bind(chat_id)
        .bind(created_ts)
        .execute(tx.as_mut())
        .await?;
    for user_id in [me, other] {
        sqlx::query("INSERT INTO chat_members (chat_id, user_id) VALUES ($1, $2)")
            .bind(chat_id)
            .bind(user_id)
            .execute(tx.as_mut())
            .await?;
    }
    tx.commit().await?;

    let chat = ChatRow {
        id: chat_id,
        name: None,
        is_group: false,
        admin_id: None,
        avatar_url: None,
        created_ts,
    };
    let view = load_view(pool, chat).await?;
    Ok((view, true))
}

/// Create a group chat with the caller as admin. `member_ids` must name at
/// least two users besides the caller.
pub async fn create_group(
    pool: &PgPool,
    me: Uuid,
    name: &str,
    member_ids: &[Uuid],
) -> Result<ChatView, ChatError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::InvalidMembers("group name is required".into()));
    }

    let mut members: Vec<Uuid> = member_ids.iter().copied().filter(|id| *id != me).collect();
    members.sort_unstable();
    members.dedup();
    if members.len() < 2 {
        return Err(ChatError::InvalidMembers(
            "a group needs at least 2 members besides the creator".into(),
        ));
    }
    members.push(me);

    let chat_id = Uuid::new_v4();
    let created_ts = now_ms();
    let mut tx = pool.begin().await?;
    sqlx::query("INSERT INTO chats (id, name, is_group, admin_id, created_ts) VALUES ($1, $2, TRUE, $3, $4)")
        .bind(chat_id)
        .bind(name)
        .bind(me)
        .bind(created_ts)
        .execute(tx.as_mut())
        .await?;
    for user_id in &members {
        sqlx::query("INSERT INTO chat_members (chat_id, user_id) VALUES ($1, $2)")
            .bind(chat_id)
            .bind(user_id)
            .execute(tx.as_mut())
            .await?;
    }
    tx.commit().await?;

    let chat = ChatRow {
        id: chat_id,
        name: Some(name.to_string()),
        is_group: true,
        admin_id: Some(me),
        avatar_url: None,
        created_ts,
    };
    load_view(pool, chat).await
}

// =============================================================================
// UPDATE / DELETE
// =============================================================================

fn ensure_group_admin(chat: &ChatRow, user_id: Uuid) -> Result<(), ChatError> {
    if !chat.is_group {
        return Err(ChatError::NotGroup(chat.id));
    }
    if chat.admin_id != Some(user_id) {
        return Err(ChatError::NotAdmin(chat.id));
    }
    Ok(())
}

/// Rename a group and/or replace its member set. Admin only; the admin stays
/// a member regardless of the submitted set.
pub async fn update_group(
    pool: &PgPool,
    chat_id: Uuid,
    me: Uuid,
    name: Option<&str>,
    member_ids: Option<&[Uuid]>,
) -> Result<ChatView, ChatError> {
    let chat = ensure_member(pool, chat_id, me).await?;
    ensure_group_admin(&chat, me)?;

    let mut tx = pool.begin().await?;
    if let Some(name) = name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidMembers("group name is required".into()));
        }
        sqlx::query("UPDATE chats SET name = $2 WHERE id = $1")
            .bind(chat_id)
            .bind(name)
            .execute(tx.as_mut())
            .await?;
    }
    if let Some(member_ids) = member_ids {
        let mut members: Vec<Uuid> = member_ids.to_vec();
        members.push(me);
        members.sort_unstable();
        members.dedup();

        sqlx::query("DELETE FROM chat_members WHERE chat_id = $1")
            .bind(chat_id)
            .execute(tx.as_mut())
            .await?;
        for user_id in &members {
            sqlx::query("INSERT INTO chat_members (chat_id, user_id) VALUES ($1, $2)")
                .bind(chat_id)
                .bind(user_id)
                .execute(tx.as_mut())
                .await?;
        }
    }
    tx.commit().await?;

    let row = sqlx::query(&format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = $1"))
        .bind(chat_id)
        .fetch_one(pool)
        .await?;
    load_view(pool, row_to_chat(&row)).await
}

/// Delete a group chat and everything in it. Admin only.
pub async fn delete_group(pool: &PgPool, chat_id: Uuid, me: Uuid) -> Result<(), ChatError> {
    let chat = ensure_member(pool, chat_id, me).await?;
    ensure_group_admin(&chat, me)?;

    sqlx::query("DELETE FROM chats WHERE id = $1")
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete any chat the caller participates in, cascading its messages.
pub async fn delete_chat(pool: &PgPool, chat_id: Uuid, me: Uuid) -> Result<(), ChatError> {
    ensure_member(pool, chat_id, me).await?;

    sqlx::query("DELETE FROM chats WHERE id = $1")
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(())
}

// =============================================================================
// LIST
// =============================================================================

/// All chats the user participates in, most recently active first, with
/// members and last-message previews expanded.
pub async fn list_chats(pool: &PgPool, user_id: Uuid) -> Result<Vec<ChatView>, ChatError> {
    let rows = sqlx::query(
        "SELECT c.id, c.name, c.is_group, c.admin_id, c.avatar_url, c.created_ts
         FROM chats c
         JOIN chat_members cm ON cm.chat_id = c.id
         LEFT JOIN messages lm ON lm.id = c.latest_message_id
         WHERE cm.user_id = $1
         ORDER BY COALESCE(lm.created_ts, c.created_ts) DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let chats: Vec<ChatRow> = rows.iter().map(row_to_chat).collect();
    let chat_ids: Vec<Uuid> = chats.iter().map(|c| c.id).collect();

    // Batch members and previews across all listed chats.
    let member_rows = sqlx::query(
        "SELECT cm.chat_id, u.id, u.name, u.email, u.avatar_url, u.is_online, u.last_seen_ts
         FROM chat_members cm
         JOIN users u ON u.id = cm.user_id
         WHERE cm.chat_id = ANY($1)
         ORDER BY u.name ASC",
    )
    .bind(&chat_ids)
    .fetch_all(pool)
    .await?;

    let mut members_by_chat: HashMap<Uuid, Vec<UserRow>> = HashMap::new();
    for r in &member_rows {
        members_by_chat
            .entry(r.get("chat_id"))
            .or_default()
            .push(row_to_user(r));
    }

    let mut previews = message::latest_visible_many(pool, &chat_ids).await?;

    Ok(chats
        .into_iter()
        .map(|chat| {
            let members = members_by_chat.remove(&chat.id).unwrap_or_default();
            let last_message = previews.remove(&chat.id);
            ChatView { chat, members, last_message }
        })
        .collect())
}

/// Fetch one chat view, membership-checked.
pub async fn get_chat(pool: &PgPool, chat_id: Uuid, viewer: Uuid) -> Result<ChatView, ChatError> {
    let chat = ensure_member(pool, chat_id, viewer).await?;
    load_view(pool, chat).await
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
