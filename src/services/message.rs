//! Message service — send, fetch, edit, soft delete, read receipts.
//!
//! DESIGN
//! ======
//! Messages are never hard-deleted individually. A sender's delete flips
//! `deleted_for_all` and replaces the content with a fixed placeholder every
//! viewer sees; a recipient's delete appends them to the `deleted_for` set
//! and hides the message from that viewer only. Both are idempotent: a second
//! delete-for-all overwrites already-placeholder content, and the for-me
//! append is guarded so concurrent deletes from two participants union
//! instead of clobbering each other.
//!
//! Read state is a per-message receipt table; unread counts are derived, so
//! a zero count is simply an absent row group, never a materialized zero.

use std::collections::HashMap;

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::event::now_ms;
use crate::services::chat::{self, ChatError};

/// Content every viewer sees once a message is deleted for all.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("message not found: {0}")]
    NotFound(Uuid),
    #[error("message content is required")]
    EmptyContent,
    #[error("only the sender may edit a message")]
    NotSender(Uuid),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::event::ErrorCode for MessageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_MESSAGE_NOT_FOUND",
            Self::EmptyContent => "E_EMPTY_CONTENT",
            Self::NotSender(_) => "E_NOT_SENDER",
            Self::Chat(e) => crate::event::ErrorCode::error_code(e),
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Sender details inlined into every message payload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Sender {
    pub id: Uuid,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// A persisted message with its sender expanded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender: Sender,
    pub content: String,
    pub created_ts: i64,
    pub edited: bool,
    pub edited_ts: Option<i64>,
    pub deleted_for: Vec<Uuid>,
    pub deleted_for_all: bool,
}

impl MessageRecord {
    /// Project this record into one viewer's perspective: placeholder content
    /// when deleted for all (regardless of `deleted_for` membership), `None`
    /// when the viewer deleted it for themselves, the record otherwise.
    #[must_use]
    pub fn for_viewer(mut self, viewer: Uuid) -> Option<Self> {
        if self.deleted_for_all {
            self.content = DELETED_PLACEHOLDER.to_string();
            return Some(self);
        }
        if self.deleted_for.contains(&viewer) {
            return None;
        }
        Some(self)
    }
}

/// Result of a delete request, distinguishing the two soft-delete modes.
#[derive(Debug)]
pub enum DeleteOutcome {
    /// Sender delete: visible to the whole room as a placeholder. Carries the
    /// recomputed last-message preview for chat-list consumers.
    ForAll {
        message: MessageRecord,
        last_message: Option<MessageRecord>,
    },
    /// Recipient delete: only the requester's own view changes; no broadcast.
    ForSelf { message: MessageRecord },
}

const MESSAGE_COLUMNS: &str = "m.id, m.chat_id, m.content, m.created_ts, m.edited, m.edited_ts, \
     m.deleted_for, m.deleted_for_all, u.id AS sender_id, u.name AS sender_name, u.avatar_url AS sender_avatar";

fn row_to_message(r: &sqlx::postgres::PgRow) -> MessageRecord {
    MessageRecord {
        id: r.get("id"),
        chat_id: r.get("chat_id"),
        sender: Sender {
            id: r.get("sender_id"),
            name: r.get("sender_name"),
            avatar_url: r.get("sender_avatar"),
        },
        content: r.get("content"),
        created_ts: r.get("created_ts"),
        edited: r.get("edited"),
        edited_ts: r.get("edited_ts"),
        deleted_for: r.get("deleted_for"),
        deleted_for_all: r.get("deleted_for_all"),
    }
}

async fn fetch_record(pool: &PgPool, message_id: Uuid) -> Result<Option<MessageRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id WHERE m.id = $1"
    ))
    .bind(message_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_message))
}

// =============================================================================
// SEND / FETCH / EDIT
// =============================================================================

/// Persist a new message and advance the chat's last-message pointer.
///
/// # Errors
///
/// `EmptyContent` for blank content; chat errors when the chat is missing or
/// the sender is not a participant.
pub async fn send_message(
    pool: &PgPool,
    chat_id: Uuid,
    sender_id: Uuid,
    content: &str,
) -> Result<MessageRecord, MessageError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(MessageError::EmptyContent);
    }
    chat::ensure_member(pool, chat_id, sender_id).await?;

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO messages (id, chat_id, sender_id, content, created_ts) VALUES ($1, $2, $3, $4, $5)")
        .bind(id)
        .bind(chat_id)
        .bind(sender_id)
        .bind(content)
        .bind(now_ms())
        .execute(pool)
        .await?;

    sqlx::query("UPDATE chats SET latest_message_id = $2 WHERE id = $1")
        .bind(chat_id)
        .bind(id)
        .execute(pool)
        .await?;

    fetch_record(pool, id)
        .await?
        .ok_or(MessageError::NotFound(id))
}

/// Fetch a chat's history from one viewer's perspective, oldest first.
pub async fn fetch_messages(
    pool: &PgPool,
    chat_id: Uuid,
    viewer: Uuid,
) -> Result<Vec<MessageRecord>, MessageError> {
    chat::ensure_member(pool, chat_id, viewer).await?;

    let rows = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         JOIN users u ON u.id = m.sender_id
         WHERE m.chat_id = $1
         ORDER BY m.created_ts ASC, m.id ASC"
    ))
    .bind(chat_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(row_to_message)
        .filter_map(|m| m.for_viewer(viewer))
        .collect())
}

/// Replace a message's content. Sender only; a fully deleted message can no
/// longer be edited.
pub async fn edit_message(
    pool: &PgPool,
    message_id: Uuid,
    editor: Uuid,
    content: &str,
) -> Result<MessageRecord, MessageError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(MessageError::EmptyContent);
    }

    let message = fetch_record(pool, message_id)
        .await?
        .ok_or(MessageError::NotFound(message_id))?;
    if message.sender.id != editor {
        return Err(MessageError::NotSender(message_id));
    }
    if message.deleted_for_all {
        return Err(MessageError::NotFound(message_id));
    }

    sqlx::query("UPDATE messages SET content = $2, edited = TRUE, edited_ts = $3 WHERE id = $1")
        .bind(message_id)
        .bind(content)
        .bind(now_ms())
        .execute(pool)
        .await?;

    fetch_record(pool, message_id)
        .await?
        .ok_or(MessageError::NotFound(message_id))
}

// =============================================================================
// DELETE
// =============================================================================

/// Soft-delete a message. The sender deletes for everyone; any other chat
/// participant deletes for themselves only.
pub async fn delete_message(
    pool: &PgPool,
    message_id: Uuid,
    requester: Uuid,
) -> Result<DeleteOutcome, MessageError> {
    let message = fetch_record(pool, message_id)
        .await?
        .ok_or(MessageError::NotFound(message_id))?;
    chat::ensure_member(pool, message.chat_id, requester).await?;

    if message.sender.id == requester {
        // Idempotent: a concurrent second delete overwrites placeholder with
        // placeholder.
        sqlx::query("UPDATE messages SET deleted_for_all = TRUE, content = $2 WHERE id = $1")
            .bind(message_id)
            .bind(DELETED_PLACEHOLDER)
            .execute(pool)
            .await?;

        let last_message = refresh_latest(pool, message.chat_id).await?;
        let message = fetch_record(pool, message_id)
            .await?
            .ok_or(MessageError::NotFound(message_id))?;
        Ok(DeleteOutcome::ForAll { message, last_message })
    } else {
        // Guarded append: set-union semantics so concurrent for-me deletes
        // from different users never clobber each other.
        sqlx::query(
            "UPDATE messages SET deleted_for = array_append(deleted_for, $2)
             WHERE id = $1 AND NOT (deleted_for @> ARRAY[$2]::uuid[])",
        )
        .bind(message_id)
        .bind(requester)
        .execute(pool)
        .await?;

        let message = fetch_record(pool, message_id)
            .await?
            .ok_or(MessageError::NotFound(message_id))?;
        Ok(DeleteOutcome::ForSelf { message })
    }
}

/// Bulk-remove every message in a chat. Participant only; clients refetch
/// rather than receiving per-message events.
pub async fn delete_all_in_chat(pool: &PgPool, chat_id: Uuid, requester: Uuid) -> Result<(), MessageError> {
    chat::ensure_member(pool, chat_id, requester).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE chats SET latest_message_id = NULL WHERE id = $1")
        .bind(chat_id)
        .execute(tx.as_mut())
        .await?;
    sqlx::query("DELETE FROM messages WHERE chat_id = $1")
        .bind(chat_id)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await?;
    Ok(())
}

// =============================================================================
// LAST-MESSAGE PREVIEW
// =============================================================================

/// Most recent message in a chat that is not deleted for all. Per-viewer
/// `deleted_for` filtering applies at fetch time, not here — the cached
/// pointer is global.
pub async fn latest_visible(pool: &PgPool, chat_id: Uuid) -> Result<Option<MessageRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         JOIN users u ON u.id = m.sender_id
         WHERE m.chat_id = $1 AND NOT m.deleted_for_all
         ORDER BY m.created_ts DESC, m.id DESC
         LIMIT 1"
    ))
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_message))
}

/// Batched last-message previews for a set of chats.
pub async fn latest_visible_many(
    pool: &PgPool,
    chat_ids: &[Uuid],
) -> Result<HashMap<Uuid, MessageRecord>, sqlx::Error> {
    if chat_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query(&format!(
        "SELECT DISTINCT ON (m.chat_id) {MESSAGE_COLUMNS}
         FROM messages m
         JOIN users u ON u.id = m.sender_id
         WHERE m.chat_id = ANY($1) AND NOT m.deleted_for_all
         ORDER BY m.chat_id, m.created_ts DESC, m.id DESC"
    ))
    .bind(chat_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| {
            let record = row_to_message(r);
            (record.chat_id, record)
        })
        .collect())
}

/// Recompute and store a chat's last-message pointer after a deletion.
pub async fn refresh_latest(pool: &PgPool, chat_id: Uuid) -> Result<Option<MessageRecord>, sqlx::Error> {
    let latest = latest_visible(pool, chat_id).await?;
    sqlx::query("UPDATE chats SET latest_message_id = $2 WHERE id = $1")
        .bind(chat_id)
        .bind(latest.as_ref().map(|m| m.id))
        .execute(pool)
        .await?;
    Ok(latest)
}

// =============================================================================
// READ RECEIPTS
// =============================================================================

/// Per-chat unread counts for one user. A message is unread when the user is
/// a chat member, did not send it, has not deleted it, it is not deleted for
/// all, and no receipt exists. Chats with zero unread simply do not appear.
pub async fn unread_counts(pool: &PgPool, user_id: Uuid) -> Result<HashMap<Uuid, i64>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT m.chat_id, COUNT(*) AS unread
         FROM messages m
         JOIN chat_members cm ON cm.chat_id = m.chat_id AND cm.user_id = $1
         WHERE m.sender_id <> $1
           AND NOT m.deleted_for_all
           AND NOT (m.deleted_for @> ARRAY[$1]::uuid[])
           AND NOT EXISTS (SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = $1)
         GROUP BY m.chat_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| (r.get::<Uuid, _>("chat_id"), r.get::<i64, _>("unread")))
        .collect())
}

/// Mark every message in a chat read for one user. Idempotent.
pub async fn mark_read(pool: &PgPool, chat_id: Uuid, user_id: Uuid) -> Result<(), MessageError> {
    chat::ensure_member(pool, chat_id, user_id).await?;

    sqlx::query(
        "INSERT INTO message_reads (message_id, user_id, read_ts)
         SELECT id, $2, $3 FROM messages WHERE chat_id = $1 AND sender_id <> $2
         ON CONFLICT DO NOTHING",
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
