//! Membership management for the gossip protocol

use crate::config::ResurrectionPolicy;
use member_core::{Address, NodeId};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// `last_update` value marking an entry as observed failed
pub const FAILED: i64 = -1;

/// One member as known by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEntry {
    pub id: NodeId,
    pub port: u16,

    /// The member's own counter, used as the logical clock for facts about it
    pub heartbeat: i64,

    /// Local tick of the last refresh, or negative once observed failed
    pub last_update: i64,
}

impl MembershipEntry {
    /// Create a new entry
    pub fn new(id: NodeId, port: u16, heartbeat: i64, last_update: i64) -> Self {
        Self {
            id,
            port,
            heartbeat,
            last_update,
        }
    }

    /// Create an alive entry for `addr`
    pub fn alive(addr: Address, heartbeat: i64, now: i64) -> Self {
        Self::new(addr.node_id(), addr.port(), heartbeat, now.max(0))
    }

    /// Address of the member
    pub fn address(&self) -> Address {
        Address::from_node(self.id, self.port)
    }

    pub fn is_alive(&self) -> bool {
        self.last_update >= 0
    }

    pub fn is_failed(&self) -> bool {
        !self.is_alive()
    }
}

/// What an accepted update did to the local entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Heartbeat advanced, liveness unchanged
    Refreshed,
    /// Alive entry is now failed
    Failed,
    /// Failed entry is alive again
    Revived,
}

/// Outcome of merging one remote entry into the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    /// No local entry existed; a copy was added
    Added { alive: bool },
    /// A strictly newer heartbeat replaced the local one
    Updated(Transition),
    /// Older or equal information, table unchanged
    Stale,
    /// The entry describes this node, table unchanged
    SelfSeen,
}

/// Statistics about the membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MembershipStats {
    pub total: usize,
    pub alive: usize,
    pub failed: usize,
}

/// Per-node membership table.
///
/// Always holds an entry for the local node. Entries are keyed by id, so
/// [`MembershipTable::snapshot`] yields them in a stable order.
#[derive(Debug, Clone)]
pub struct MembershipTable {
    self_id: NodeId,
    entries: BTreeMap<NodeId, MembershipEntry>,
    live_neighbors: usize,
    policy: ResurrectionPolicy,
}

impl MembershipTable {
    /// Create a table that only knows about the local node
    pub fn new(local: Address, heartbeat: i64, now: i64, policy: ResurrectionPolicy) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(local.node_id(), MembershipEntry::alive(local, heartbeat, now));

        Self {
            self_id: local.node_id(),
            entries,
            live_neighbors: 0,
            policy,
        }
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Get a specific entry
    pub fn get(&self, id: NodeId) -> Option<&MembershipEntry> {
        self.entries.get(&id)
    }

    /// Number of entries, the local one included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of alive entries other than the local one
    pub fn live_neighbors(&self) -> usize {
        self.live_neighbors
    }

    /// Iterate over alive entries other than the local one
    pub fn alive_peers(&self) -> impl Iterator<Item = &MembershipEntry> + '_ {
        self.entries
            .values()
            .filter(move |e| e.id != self.self_id && e.is_alive())
    }

    /// Copy of every entry, ordered by id
    pub fn snapshot(&self) -> Vec<MembershipEntry> {
        self.entries.values().copied().collect()
    }

    /// Refresh the local entry with the node's current heartbeat
    pub fn touch_self(&mut self, heartbeat: i64, now: i64) {
        if let Some(local) = self.entries.get_mut(&self.self_id) {
            local.heartbeat = heartbeat;
            local.last_update = now.max(0);
        }
    }

    /// Merge a remote entry.
    ///
    /// Only a strictly greater heartbeat changes an existing entry, which
    /// makes the merge idempotent and independent of arrival order.
    pub fn upsert(&mut self, remote: &MembershipEntry, now: i64) -> MergeResult {
        if remote.id == self.self_id {
            return MergeResult::SelfSeen;
        }

        let Some(local) = self.entries.get_mut(&remote.id) else {
            let alive = remote.is_alive();
            let mut entry = *remote;
            entry.last_update = if alive { now.max(0) } else { FAILED };
            self.entries.insert(entry.id, entry);
            if alive {
                self.live_neighbors += 1;
            }
            debug!(id = remote.id, heartbeat = remote.heartbeat, alive, "Added member");
            return MergeResult::Added { alive };
        };

        if remote.heartbeat <= local.heartbeat {
            return MergeResult::Stale;
        }

        if local.is_failed() && self.policy == ResurrectionPolicy::Forbid {
            return MergeResult::Stale;
        }

        local.heartbeat = remote.heartbeat;

        let transition = match (local.is_alive(), remote.is_alive()) {
            (true, false) => {
                local.last_update = FAILED;
                self.live_neighbors -= 1;
                Transition::Failed
            }
            (false, true) => {
                local.last_update = now.max(0);
                self.live_neighbors += 1;
                info!(id = remote.id, heartbeat = remote.heartbeat, "Member revived by gossip");
                Transition::Revived
            }
            (true, true) => {
                local.last_update = now.max(0);
                Transition::Refreshed
            }
            (false, false) => Transition::Refreshed,
        };

        MergeResult::Updated(transition)
    }

    /// Admit a member through the join path.
    ///
    /// Inserts or replaces the entry with a fresh alive copy and returns
    /// `true` when the member was not already alive in the table.
    pub fn admit(&mut self, entry: MembershipEntry, now: i64) -> bool {
        if entry.id == self.self_id {
            return false;
        }

        let fresh = MembershipEntry {
            last_update: now.max(0),
            ..entry
        };

        match self.entries.insert(entry.id, fresh) {
            Some(previous) if previous.is_alive() => {
                if previous.heartbeat > fresh.heartbeat {
                    // a stale join request must not roll back the heartbeat
                    self.entries.insert(entry.id, MembershipEntry { heartbeat: previous.heartbeat, ..fresh });
                }
                false
            }
            _ => {
                self.live_neighbors += 1;
                true
            }
        }
    }

    /// Mark an entry as failed.
    ///
    /// Returns `true` only on an alive to failed transition.
    pub fn mark_failed(&mut self, id: NodeId) -> bool {
        if id == self.self_id {
            return false;
        }

        match self.entries.get_mut(&id) {
            Some(entry) if entry.is_alive() => {
                entry.last_update = FAILED;
                self.live_neighbors -= 1;
                true
            }
            _ => false,
        }
    }

    /// Remove an entry from the table
    pub fn remove(&mut self, id: NodeId) -> Option<MembershipEntry> {
        if id == self.self_id {
            return None;
        }

        let removed = self.entries.remove(&id)?;
        if removed.is_alive() {
            self.live_neighbors -= 1;
        }
        Some(removed)
    }

    /// Pick a uniformly random alive peer whose id is not in `exclude`.
    ///
    /// The local node is always excluded. Returns `None` when no candidate
    /// exists.
    pub fn pick_random_alive<R: Rng + ?Sized>(&self, exclude: &[NodeId], rng: &mut R) -> Option<Address> {
        let candidates: Vec<&MembershipEntry> = self
            .alive_peers()
            .filter(|e| !exclude.contains(&e.id))
            .collect();

        candidates.choose(rng).map(|e| e.address())
    }

    /// Get membership statistics
    pub fn stats(&self) -> MembershipStats {
        let alive = self.entries.values().filter(|e| e.is_alive()).count();

        MembershipStats {
            total: self.entries.len(),
            alive,
            failed: self.entries.len() - alive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn table() -> MembershipTable {
        MembershipTable::new(Address::new(1, 0), 0, 0, ResurrectionPolicy::Allow)
    }

    fn entry(id: NodeId, heartbeat: i64, last_update: i64) -> MembershipEntry {
        MembershipEntry::new(id, 0, heartbeat, last_update)
    }

    #[test]
    fn test_new_table_holds_self() {
        let table = table();
        assert_eq!(table.len(), 1);
        assert_eq!(table.live_neighbors(), 0);
        assert!(table.get(1).unwrap().is_alive());
        assert_eq!(table.alive_peers().count(), 0);
    }

    #[test]
    fn test_upsert_adds_unknown_member() {
        let mut table = table();

        assert_eq!(table.upsert(&entry(2, 4, 7), 10), MergeResult::Added { alive: true });
        assert_eq!(table.live_neighbors(), 1);
        // last_update is a local timestamp, not the sender's
        assert_eq!(table.get(2).unwrap().last_update, 10);

        assert_eq!(table.upsert(&entry(3, 4, FAILED), 10), MergeResult::Added { alive: false });
        assert_eq!(table.live_neighbors(), 1);
        assert!(table.get(3).unwrap().is_failed());
    }

    #[test]
    fn test_upsert_ignores_self() {
        let mut table = table();
        assert_eq!(table.upsert(&entry(1, 100, FAILED), 3), MergeResult::SelfSeen);
        assert!(table.get(1).unwrap().is_alive());
        assert_eq!(table.get(1).unwrap().heartbeat, 0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut once = table();
        let mut twice = table();
        let remote = entry(2, 5, 1);

        once.upsert(&remote, 4);
        twice.upsert(&remote, 4);
        assert_eq!(twice.upsert(&remote, 4), MergeResult::Stale);

        assert_eq!(once.snapshot(), twice.snapshot());
        assert_eq!(once.live_neighbors(), twice.live_neighbors());
    }

    #[test]
    fn test_merge_is_monotonic() {
        let mut table = table();
        table.upsert(&entry(2, 5, 1), 4);

        assert_eq!(table.upsert(&entry(2, 5, 9), 8), MergeResult::Stale);
        assert_eq!(table.upsert(&entry(2, 3, 9), 8), MergeResult::Stale);
        assert_eq!(table.get(2).unwrap().heartbeat, 5);
        assert_eq!(table.get(2).unwrap().last_update, 4);

        assert_eq!(
            table.upsert(&entry(2, 6, 9), 8),
            MergeResult::Updated(Transition::Refreshed)
        );
        assert_eq!(table.get(2).unwrap().heartbeat, 6);
        assert_eq!(table.get(2).unwrap().last_update, 8);
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        let updates = [entry(2, 3, 1), entry(2, 7, FAILED), entry(3, 2, 1), entry(2, 5, 1)];

        let mut forward = table();
        for update in &updates {
            forward.upsert(update, 1);
        }

        let mut backward = table();
        for update in updates.iter().rev() {
            backward.upsert(update, 1);
        }

        assert_eq!(forward.snapshot(), backward.snapshot());
        assert!(forward.get(2).unwrap().is_failed());
    }

    #[test]
    fn test_failure_is_reported_once() {
        let mut table = table();
        table.upsert(&entry(2, 5, 1), 1);

        assert_eq!(
            table.upsert(&entry(2, 6, FAILED), 2),
            MergeResult::Updated(Transition::Failed)
        );
        assert_eq!(table.live_neighbors(), 0);

        // newer failure news keeps the entry failed without a second transition
        assert_eq!(
            table.upsert(&entry(2, 7, FAILED), 3),
            MergeResult::Updated(Transition::Refreshed)
        );
        assert_eq!(table.upsert(&entry(2, 7, FAILED), 3), MergeResult::Stale);
        assert_eq!(table.live_neighbors(), 0);
    }

    #[test]
    fn test_failure_is_sticky_against_old_news() {
        let mut table = table();
        table.upsert(&entry(2, 5, 1), 1);
        assert!(table.mark_failed(2));

        assert_eq!(table.upsert(&entry(2, 5, 1), 2), MergeResult::Stale);
        assert_eq!(table.upsert(&entry(2, 4, 1), 2), MergeResult::Stale);
        assert!(table.get(2).unwrap().is_failed());
    }

    #[test]
    fn test_resurrection_allowed_by_newer_heartbeat() {
        let mut table = table();
        table.upsert(&entry(2, 5, 1), 1);
        table.mark_failed(2);

        assert_eq!(
            table.upsert(&entry(2, 6, 1), 9),
            MergeResult::Updated(Transition::Revived)
        );
        assert!(table.get(2).unwrap().is_alive());
        assert_eq!(table.live_neighbors(), 1);
    }

    #[test]
    fn test_resurrection_forbidden_until_rejoin() {
        let mut table = MembershipTable::new(Address::new(1, 0), 0, 0, ResurrectionPolicy::Forbid);
        table.upsert(&entry(2, 5, 1), 1);
        table.mark_failed(2);

        assert_eq!(table.upsert(&entry(2, 50, 1), 9), MergeResult::Stale);
        assert!(table.get(2).unwrap().is_failed());

        assert!(table.admit(entry(2, 51, 0), 10));
        assert!(table.get(2).unwrap().is_alive());
        assert_eq!(table.live_neighbors(), 1);
    }

    #[test]
    fn test_admit_reports_only_new_members() {
        let mut table = table();
        assert!(table.admit(entry(2, 0, 0), 3));
        assert!(!table.admit(entry(2, 0, 0), 4));
        assert_eq!(table.live_neighbors(), 1);
        assert_eq!(table.get(2).unwrap().last_update, 4);
        assert!(!table.admit(entry(1, 0, 0), 4));
    }

    #[test]
    fn test_admit_keeps_newer_heartbeat() {
        let mut table = table();
        table.upsert(&entry(2, 9, 1), 1);
        assert!(!table.admit(entry(2, 0, 0), 2));
        assert_eq!(table.get(2).unwrap().heartbeat, 9);
    }

    #[test]
    fn test_mark_failed_and_remove() {
        let mut table = table();
        table.upsert(&entry(2, 1, 1), 1);
        table.upsert(&entry(3, 1, 1), 1);

        assert!(table.mark_failed(2));
        assert!(!table.mark_failed(2));
        assert!(!table.mark_failed(1));
        assert!(!table.mark_failed(42));
        assert_eq!(table.live_neighbors(), 1);

        assert_eq!(table.remove(3).map(|e| e.id), Some(3));
        assert_eq!(table.live_neighbors(), 0);
        assert!(table.remove(3).is_none());
        assert!(table.remove(1).is_none());

        let stats = table.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.alive, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_pick_random_alive() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut table = table();
        assert_eq!(table.pick_random_alive(&[], &mut rng), None);

        table.upsert(&entry(2, 1, 1), 1);
        table.upsert(&entry(3, 1, 1), 1);
        table.upsert(&entry(4, 1, FAILED), 1);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let picked = table.pick_random_alive(&[], &mut rng).unwrap();
            assert_ne!(picked.node_id(), 1);
            assert_ne!(picked.node_id(), 4);
            seen.insert(picked.node_id());
        }
        assert_eq!(seen, HashSet::from([2, 3]));

        assert_eq!(
            table.pick_random_alive(&[2], &mut rng),
            Some(Address::new(3, 0))
        );
        assert_eq!(table.pick_random_alive(&[2, 3], &mut rng), None);
    }

    #[test]
    fn test_snapshot_is_ordered_by_id() {
        let mut table = table();
        table.upsert(&entry(5, 1, 1), 1);
        table.upsert(&entry(3, 1, 1), 1);

        let ids: Vec<NodeId> = table.snapshot().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn test_touch_self() {
        let mut table = table();
        table.touch_self(12, 30);
        let local = table.get(1).unwrap();
        assert_eq!(local.heartbeat, 12);
        assert_eq!(local.last_update, 30);
    }
}
