//! Optimistic pending-message table.
//!
//! A send is displayed before the server confirms it: the draft is staged
//! under a client-generated temporary id, shown as pending, and then either
//! resolved (confirmed record replaces it) or rolled back (persistence
//! failed; the draft content is returned so the composer can restore it).
//! Each entry leaves the table exactly once — a second resolve or rollback
//! for the same id is a no-op returning nothing.

use uuid::Uuid;

use crate::event::now_ms;

/// A staged message awaiting server confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub temp_id: Uuid,
    pub chat_id: Uuid,
    pub content: String,
    pub staged_ts: i64,
}

#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<PendingMessage>,
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a draft for optimistic display. Returns the temporary id the
    /// confirmation or failure must reference.
    pub fn stage(&mut self, chat_id: Uuid, content: impl Into<String>) -> Uuid {
        let temp_id = Uuid::new_v4();
        self.pending.push(PendingMessage {
            temp_id,
            chat_id,
            content: content.into(),
            staged_ts: now_ms(),
        });
        temp_id
    }

    /// Confirmation arrived: remove and return the placeholder so the UI can
    /// swap in the authoritative record. `None` if already settled.
    pub fn resolve(&mut self, temp_id: Uuid) -> Option<PendingMessage> {
        self.take(temp_id)
    }

    /// Persistence failed: remove the placeholder and hand back the draft
    /// for the composer to restore. `None` if already settled.
    pub fn roll_back(&mut self, temp_id: Uuid) -> Option<PendingMessage> {
        self.take(temp_id)
    }

    fn take(&mut self, temp_id: Uuid) -> Option<PendingMessage> {
        let index = self.pending.iter().position(|p| p.temp_id == temp_id)?;
        Some(self.pending.remove(index))
    }

    /// Pending entries for one chat, in staging order.
    #[must_use]
    pub fn pending_for(&self, chat_id: Uuid) -> Vec<&PendingMessage> {
        self.pending.iter().filter(|p| p.chat_id == chat_id).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_then_resolve_settles_once() {
        let mut outbox = Outbox::new();
        let chat = Uuid::new_v4();

        let temp_id = outbox.stage(chat, "hello");
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.pending_for(chat).len(), 1);

        let resolved = outbox.resolve(temp_id).expect("first resolve succeeds");
        assert_eq!(resolved.content, "hello");
        assert!(outbox.is_empty());

        // Exactly once: the confirmation path cannot double-settle.
        assert!(outbox.resolve(temp_id).is_none());
        assert!(outbox.roll_back(temp_id).is_none());
    }

    #[test]
    fn roll_back_returns_draft_for_restore() {
        let mut outbox = Outbox::new();
        let chat = Uuid::new_v4();

        let temp_id = outbox.stage(chat, "draft text");
        let draft = outbox.roll_back(temp_id).expect("rollback returns draft");
        assert_eq!(draft.content, "draft text");
        assert_eq!(draft.chat_id, chat);
        assert!(outbox.resolve(temp_id).is_none());
    }

    #[test]
    fn pending_entries_keep_staging_order_per_chat() {
        let mut outbox = Outbox::new();
        let chat_a = Uuid::new_v4();
        let chat_b = Uuid::new_v4();

        outbox.stage(chat_a, "first");
        outbox.stage(chat_b, "elsewhere");
        outbox.stage(chat_a, "second");

        let pending: Vec<&str> = outbox
            .pending_for(chat_a)
            .iter()
            .map(|p| p.content.as_str())
            .collect();
        assert_eq!(pending, vec!["first", "second"]);
    }

    #[test]
    fn unknown_temp_id_is_noop() {
        let mut outbox = Outbox::new();
        assert!(outbox.resolve(Uuid::new_v4()).is_none());
        assert!(outbox.roll_back(Uuid::new_v4()).is_none());
    }
}
