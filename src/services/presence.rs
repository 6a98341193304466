//! Presence registry — live-connection counts per user.
//!
//! DESIGN
//! ======
//! Each user maps to the number of live websocket connections they currently
//! hold (multiple tabs/devices). Only the 0↔1 boundary is observable from the
//! outside: the first connection produces `BecameOnline`, the last disconnect
//! produces `BecameOffline`, everything in between is silent. Entries are
//! removed when the count reaches zero, so the key set at any instant is
//! exactly the online-user set.
//!
//! The registry is a plain injected struct owned by `AppState` — created at
//! process start, discarded at process stop, rebuilt empty after a restart.

use std::collections::HashMap;

use uuid::Uuid;

/// Externally observable result of a register/deregister call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 0 → 1 crossing: broadcast `presence:online`.
    BecameOnline,
    /// Count went up but was already positive: no broadcast.
    StillOnline,
    /// 1 → 0 crossing: broadcast `presence:offline`, persist last-seen.
    BecameOffline,
    /// Deregister for a user with no tracked connections. Harmless protocol
    /// noise (e.g. double teardown); never broadcast.
    StillOffline,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    counts: HashMap<Uuid, usize>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { counts: HashMap::new() }
    }

    /// Record one more live connection for `user_id`.
    pub fn register(&mut self, user_id: Uuid) -> Transition {
        let count = self.counts.entry(user_id).or_insert(0);
        *count += 1;
        if *count == 1 {
            Transition::BecameOnline
        } else {
            Transition::StillOnline
        }
    }

    /// Record one less live connection for `user_id`. The entry is removed
    /// (not zeroed) on the last disconnect.
    pub fn deregister(&mut self, user_id: Uuid) -> Transition {
        let Some(count) = self.counts.get_mut(&user_id) else {
            return Transition::StillOffline;
        };

        *count -= 1;
        if *count == 0 {
            self.counts.remove(&user_id);
            Transition::BecameOffline
        } else {
            Transition::StillOnline
        }
    }

    #[must_use]
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.counts.contains_key(&user_id)
    }

    #[must_use]
    pub fn online_count(&self) -> usize {
        self.counts.len()
    }

    /// Snapshot of the online-user set, identity-normalized to strings and
    /// sorted so roster payloads are stable for consumers and tests.
    #[must_use]
    pub fn roster(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.counts.keys().map(Uuid::to_string).collect();
        ids.sort_unstable();
        ids
    }
}
