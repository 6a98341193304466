//! Unread counter reconciler — the client half of badge bookkeeping.
//!
//! Increments ride the global `unread:count` broadcast; suppression is
//! local, because only this device knows which chat is on screen. A chat
//! with nothing unread has no entry at all — zero is never materialized.

use std::collections::HashMap;

use uuid::Uuid;

#[derive(Debug)]
pub struct UnreadLedger {
    me: Uuid,
    active_chat: Option<Uuid>,
    counts: HashMap<Uuid, u32>,
}

impl UnreadLedger {
    #[must_use]
    pub fn new(me: Uuid) -> Self {
        Self { me, active_chat: None, counts: HashMap::new() }
    }

    /// Replace local state with server-fetched counts, dropping zeros.
    pub fn hydrate(&mut self, counts: impl IntoIterator<Item = (Uuid, i64)>) {
        self.counts = counts
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(chat_id, count)| (chat_id, u32::try_from(count).unwrap_or(u32::MAX)))
            .collect();
    }

    /// Apply one `unread:count` bump. Our own sends never count, and a
    /// message landing in the chat currently on screen is read-on-arrival.
    pub fn on_message_arrived(&mut self, chat_id: Uuid, sender_id: Uuid) {
        if sender_id == self.me {
            return;
        }
        if self.active_chat == Some(chat_id) {
            self.counts.remove(&chat_id);
            return;
        }
        *self.counts.entry(chat_id).or_insert(0) += 1;
    }

    /// Opening a chat zeroes its counter locally. The caller is expected to
    /// follow up with the mark-read request so the server-side record (and
    /// therefore other devices) agree.
    pub fn on_chat_opened(&mut self, chat_id: Uuid) {
        self.active_chat = Some(chat_id);
        self.counts.remove(&chat_id);
    }

    pub fn on_chat_closed(&mut self) {
        self.active_chat = None;
    }

    /// Set a single chat's count directly, normalizing zero to absent.
    pub fn update(&mut self, chat_id: Uuid, count: u32) {
        if count == 0 {
            self.counts.remove(&chat_id);
        } else {
            self.counts.insert(chat_id, count);
        }
    }

    #[must_use]
    pub fn count(&self, chat_id: Uuid) -> u32 {
        self.counts.get(&chat_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn counts(&self) -> &HashMap<Uuid, u32> {
        &self.counts
    }

    /// Total across chats, for an app-level badge.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().map(|c| u64::from(*c)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_messages_never_count() {
        let me = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let mut ledger = UnreadLedger::new(me);

        ledger.on_message_arrived(chat, me);
        assert_eq!(ledger.count(chat), 0);
        assert!(ledger.counts().is_empty());
    }

    #[test]
    fn active_chat_suppresses_increment() {
        let me = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let mut ledger = UnreadLedger::new(me);

        ledger.on_chat_opened(chat);
        ledger.on_message_arrived(chat, sender);
        // Read-on-arrival: no entry, not a zero entry.
        assert!(!ledger.counts().contains_key(&chat));
    }

    #[test]
    fn inactive_chat_accrues() {
        let me = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let open_chat = Uuid::new_v4();
        let background_chat = Uuid::new_v4();
        let mut ledger = UnreadLedger::new(me);
        ledger.on_chat_opened(open_chat);

        ledger.on_message_arrived(background_chat, sender);
        ledger.on_message_arrived(background_chat, sender);
        assert_eq!(ledger.count(background_chat), 2);
        assert_eq!(ledger.count(open_chat), 0);
        assert_eq!(ledger.total(), 2);
    }

    #[test]
    fn opening_chat_zeroes_its_counter() {
        let me = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let mut ledger = UnreadLedger::new(me);

        ledger.on_message_arrived(chat, sender);
        assert_eq!(ledger.count(chat), 1);

        ledger.on_chat_opened(chat);
        assert_eq!(ledger.count(chat), 0);
        assert!(!ledger.counts().contains_key(&chat));
    }

    #[test]
    fn closing_chat_resumes_accrual() {
        let me = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let mut ledger = UnreadLedger::new(me);

        ledger.on_chat_opened(chat);
        ledger.on_message_arrived(chat, sender);
        assert_eq!(ledger.count(chat), 0);

        ledger.on_chat_closed();
        ledger.on_message_arrived(chat, sender);
        assert_eq!(ledger.count(chat), 1);
    }

    #[test]
    fn hydrate_drops_non_positive_counts() {
        let me = Uuid::new_v4();
        let chat_a = Uuid::new_v4();
        let chat_b = Uuid::new_v4();
        let mut ledger = UnreadLedger::new(me);

        ledger.hydrate(vec![(chat_a, 3), (chat_b, 0)]);
        assert_eq!(ledger.count(chat_a), 3);
        assert!(!ledger.counts().contains_key(&chat_b));
    }

    #[test]
    fn update_normalizes_zero_to_absent() {
        let me = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let mut ledger = UnreadLedger::new(me);

        ledger.update(chat, 4);
        assert_eq!(ledger.count(chat), 4);
        ledger.update(chat, 0);
        assert!(!ledger.counts().contains_key(&chat));
    }
}
