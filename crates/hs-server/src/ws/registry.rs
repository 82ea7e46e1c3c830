//! Session membership registry.
//!
//! Maps each session id to the set of listener connections subscribed to it,
//! plus the reverse index (connection → sessions) used for disconnect cleanup.
//!
//! Both maps are sharded (`DashMap`), so operations on unrelated sessions do
//! not contend on a single lock. Every mutation locks the connection's entry
//! in `memberships` first and the session's entry in `sessions` second; the
//! fixed order keeps concurrent operations deadlock-free and makes each
//! operation atomic with respect to others on the same connection id.

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// Identifier handed to every listener connection by the gateway.
pub type ConnectionId = Uuid;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// session_id → subscribed connections. A key exists only while its set is non-empty.
    sessions: DashMap<String, HashSet<ConnectionId>>,
    /// connection_id → sessions it is subscribed to
    memberships: DashMap<ConnectionId, HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `connection_id` to `session_id`, creating the session on first join.
    ///
    /// Returns `false` when the connection was already a member.
    pub fn join(&self, session_id: &str, connection_id: ConnectionId) -> bool {
        let mut owned = self.memberships.entry(connection_id).or_default();
        let added = self
            .sessions
            .entry(session_id.to_owned())
            .or_default()
            .insert(connection_id);
        owned.insert(session_id.to_owned());
        if added {
            tracing::debug!(session_id, %connection_id, "Connection joined session");
        }
        added
    }

    /// Unsubscribe `connection_id` from `session_id`, pruning the session once empty.
    ///
    /// Returns `false` when the connection was not a member.
    pub fn leave(&self, session_id: &str, connection_id: ConnectionId) -> bool {
        let Entry::Occupied(mut owned) = self.memberships.entry(connection_id) else {
            return false;
        };
        if !owned.get_mut().remove(session_id) {
            return false;
        }
        self.detach(session_id, connection_id);
        if owned.get().is_empty() {
            owned.remove();
        }
        tracing::debug!(session_id, %connection_id, "Connection left session");
        true
    }

    /// Drop `connection_id` from every session it belongs to.
    ///
    /// The connection's reverse-index entry stays locked for the whole sweep,
    /// so a concurrent join/leave on the same connection observes either the
    /// state before or after the removal, never a partial one.
    pub fn remove_connection_everywhere(&self, connection_id: ConnectionId) -> Vec<String> {
        let Entry::Occupied(owned) = self.memberships.entry(connection_id) else {
            return Vec::new();
        };
        let left: Vec<String> = owned.get().iter().cloned().collect();
        for session_id in &left {
            self.detach(session_id, connection_id);
        }
        owned.remove();
        left
    }

    /// Snapshot of the connections subscribed to `session_id` (empty if unknown).
    pub fn members_of(&self, session_id: &str) -> HashSet<ConnectionId> {
        self.sessions
            .get(session_id)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the sessions `connection_id` is subscribed to.
    pub fn sessions_of(&self, connection_id: ConnectionId) -> HashSet<String> {
        self.memberships
            .get(&connection_id)
            .map(|sessions| sessions.clone())
            .unwrap_or_default()
    }

    pub fn is_member(&self, session_id: &str, connection_id: ConnectionId) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|members| members.contains(&connection_id))
    }

    pub fn contains_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn detach(&self, session_id: &str, connection_id: ConnectionId) {
        if let Entry::Occupied(mut members) = self.sessions.entry(session_id.to_owned()) {
            members.get_mut().remove(&connection_id);
            if members.get().is_empty() {
                members.remove();
                tracing::debug!(session_id, "Cleaned up empty session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Both indexes agree and no empty session lingers.
    fn assert_consistent(registry: &SessionRegistry) {
        for entry in registry.sessions.iter() {
            assert!(!entry.value().is_empty(), "empty session {}", entry.key());
            for conn in entry.value() {
                assert!(registry.sessions_of(*conn).contains(entry.key()));
            }
        }
        for entry in registry.memberships.iter() {
            assert!(!entry.value().is_empty());
            for session in entry.value() {
                assert!(registry.is_member(session, *entry.key()));
            }
        }
    }

    #[test]
    fn unknown_session_has_no_members() {
        let registry = SessionRegistry::new();
        assert!(registry.members_of("nope").is_empty());
        assert!(!registry.contains_session("nope"));
    }

    #[test]
    fn duplicate_join_is_idempotent() {
        let registry = SessionRegistry::new();
        let conn = Uuid::new_v4();
        assert!(registry.join("abc", conn));
        assert!(!registry.join("abc", conn));
        assert_eq!(registry.members_of("abc").len(), 1);
        assert_consistent(&registry);
    }

    #[test]
    fn leave_prunes_empty_session() {
        let registry = SessionRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.join("abc", a);
        registry.join("abc", b);

        assert!(registry.leave("abc", a));
        assert!(registry.contains_session("abc"));
        assert!(registry.leave("abc", b));
        assert!(!registry.contains_session("abc"));
        assert!(registry.sessions_of(b).is_empty());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn leave_absent_member_is_noop() {
        let registry = SessionRegistry::new();
        let a = Uuid::new_v4();
        assert!(!registry.leave("abc", a));
        registry.join("abc", a);
        assert!(!registry.leave("xyz", a));
        assert!(registry.is_member("abc", a));
        assert_consistent(&registry);
    }

    #[test]
    fn operations_apply_in_order() {
        let registry = SessionRegistry::new();
        let conn = Uuid::new_v4();
        registry.join("abc", conn);
        registry.leave("abc", conn);
        registry.join("abc", conn);
        registry.join("abc", conn);
        assert!(registry.is_member("abc", conn));
        registry.leave("abc", conn);
        assert!(!registry.is_member("abc", conn));
        assert!(!registry.contains_session("abc"));
    }

    #[test]
    fn remove_everywhere_clears_all_sessions() {
        let registry = SessionRegistry::new();
        let gone = Uuid::new_v4();
        let stays = Uuid::new_v4();
        registry.join("abc", gone);
        registry.join("xyz", gone);
        registry.join("xyz", stays);

        let mut left = registry.remove_connection_everywhere(gone);
        left.sort();
        assert_eq!(left, vec!["abc".to_string(), "xyz".to_string()]);

        assert!(!registry.contains_session("abc"));
        assert_eq!(registry.members_of("xyz"), HashSet::from([stays]));
        assert!(registry.sessions_of(gone).is_empty());
        assert!(registry.remove_connection_everywhere(gone).is_empty());
        assert_consistent(&registry);
    }

    #[test]
    fn concurrent_churn_leaves_consistent_state() {
        let registry = Arc::new(SessionRegistry::new());
        let sessions = ["a", "b", "c", "d"];

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let conn = Uuid::new_v4();
                    for round in 0..500 {
                        let session = sessions[(worker + round) % sessions.len()];
                        registry.join(session, conn);
                        if round % 3 == 0 {
                            registry.leave(session, conn);
                        }
                    }
                    registry.remove_connection_everywhere(conn);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.session_count(), 0);
        assert!(registry.memberships.is_empty());
    }

    #[test]
    fn concurrent_joins_on_one_session_keep_every_member() {
        let registry = Arc::new(SessionRegistry::new());
        let conns: Vec<Uuid> = (0..16).map(|_| Uuid::new_v4()).collect();

        let handles: Vec<_> = conns
            .iter()
            .map(|conn| {
                let registry = registry.clone();
                let conn = *conn;
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        registry.join("shared", conn);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.members_of("shared").len(), conns.len());
        assert_consistent(&registry);
    }
}
