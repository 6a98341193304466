//! Online-user roster with snapshot reconciliation.
//!
//! Unary `presence:online`/`presence:offline` events mutate the set
//! incrementally, but there is no ordering guarantee between a unary event
//! and an immediately following roster snapshot. The snapshot is
//! authoritative: every delivery replaces the whole set, so a missed or
//! reordered unary event can never desync the client permanently.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct PresenceRoster {
    online: HashSet<String>,
}

impl PresenceRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a unary online event. Returns true if the user was not
    /// already tracked.
    pub fn apply_online(&mut self, user_id: &str) -> bool {
        self.online.insert(user_id.to_string())
    }

    /// Apply a unary offline event. Returns true if the user was tracked.
    pub fn apply_offline(&mut self, user_id: &str) -> bool {
        self.online.remove(user_id)
    }

    /// Replace the set wholesale with an authoritative roster snapshot.
    pub fn reconcile<I>(&mut self, roster: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.online = roster.into_iter().map(Into::into).collect();
    }

    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    #[must_use]
    pub fn online_count(&self) -> usize {
        self.online.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_events_mutate_incrementally() {
        let mut roster = PresenceRoster::new();
        assert!(roster.apply_online("alice"));
        assert!(!roster.apply_online("alice"));
        assert!(roster.is_online("alice"));
        assert!(roster.apply_offline("alice"));
        assert!(!roster.apply_offline("alice"));
        assert!(!roster.is_online("alice"));
    }

    #[test]
    fn snapshot_is_authoritative_over_drift() {
        let mut roster = PresenceRoster::new();
        // Drifted state: a missed offline event left bob behind.
        roster.apply_online("alice");
        roster.apply_online("bob");

        roster.reconcile(vec!["alice".to_string(), "carol".to_string()]);
        assert!(roster.is_online("alice"));
        assert!(!roster.is_online("bob"));
        assert!(roster.is_online("carol"));
        assert_eq!(roster.online_count(), 2);
    }

    #[test]
    fn snapshot_deduplicates() {
        let mut roster = PresenceRoster::new();
        roster.reconcile(vec!["alice", "alice", "bob"]);
        assert_eq!(roster.online_count(), 2);
    }

    #[test]
    fn empty_snapshot_clears_everyone() {
        let mut roster = PresenceRoster::new();
        roster.apply_online("alice");
        roster.reconcile(Vec::<String>::new());
        assert_eq!(roster.online_count(), 0);
    }
}
