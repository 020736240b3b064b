//! Mutual exclusion checker
//!
//! Workloads report every critical-section entry and exit here. Two clients
//! inside the same lock at once is a violation; the entry log doubles as the
//! grant order for FIFO checks.

use std::collections::HashMap;
use std::sync::Mutex;

use lockfs_lock::{ClientId, LockId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub lock_id: LockId,
    pub holder: ClientId,
    pub intruder: ClientId,
}

#[derive(Default)]
struct TrackerState {
    holders: HashMap<LockId, ClientId>,
    entries: Vec<(LockId, ClientId)>,
    violations: Vec<Violation>,
}

/// Records who is inside which lock.
#[derive(Default)]
pub struct HoldTracker {
    state: Mutex<TrackerState>,
}

impl HoldTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, lock_id: LockId, client: &ClientId) {
        let mut state = self.state.lock().unwrap();
        if let Some(holder) = state.holders.get(&lock_id).cloned() {
            state.violations.push(Violation {
                lock_id,
                holder,
                intruder: client.clone(),
            });
        }
        state.holders.insert(lock_id, client.clone());
        state.entries.push((lock_id, client.clone()));
    }

    pub fn exit(&self, lock_id: LockId, client: &ClientId) {
        let mut state = self.state.lock().unwrap();
        if state.holders.get(&lock_id) == Some(client) {
            state.holders.remove(&lock_id);
        }
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.state.lock().unwrap().violations.clone()
    }

    /// Clients in the order they entered `lock_id`.
    pub fn entry_order(&self, lock_id: LockId) -> Vec<ClientId> {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|(id, _)| *id == lock_id)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn total_entries(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_holds_are_clean() {
        let tracker = HoldTracker::new();
        let lock = LockId::new(1);
        let a = ClientId::new("a");
        let b = ClientId::new("b");
        tracker.enter(lock, &a);
        tracker.exit(lock, &a);
        tracker.enter(lock, &b);
        tracker.exit(lock, &b);
        assert!(tracker.violations().is_empty());
        assert_eq!(tracker.entry_order(lock), vec![a, b]);
    }

    #[test]
    fn test_overlap_detected() {
        let tracker = HoldTracker::new();
        let lock = LockId::new(1);
        tracker.enter(lock, &ClientId::new("a"));
        tracker.enter(lock, &ClientId::new("b"));
        let violations = tracker.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].holder, ClientId::new("a"));
        assert_eq!(violations[0].intruder, ClientId::new("b"));
    }

    #[test]
    fn test_different_locks_do_not_conflict() {
        let tracker = HoldTracker::new();
        tracker.enter(LockId::new(1), &ClientId::new("a"));
        tracker.enter(LockId::new(2), &ClientId::new("b"));
        assert!(tracker.violations().is_empty());
        assert_eq!(tracker.total_entries(), 2);
    }
}
