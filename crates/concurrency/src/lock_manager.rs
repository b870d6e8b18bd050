//! Fail-fast lock manager covering the three lock domains a transaction can
//! touch: per-class, per-hash-key, and per-object (§4.4).
//!
//! Conflicting requests never wait: a request that cannot be granted
//! immediately returns `false` and the caller fails the transaction with
//! `TransactionConflict`. This trades latency fairness for throughput and
//! predictability, and it sidesteps deadlock detection entirely — nothing
//! ever blocks, so nothing ever waits in a cycle. Callers are still expected
//! to acquire locks in ascending [`ResourceKey`] order within a transaction
//! (class < hash-key < object) to keep a transaction's own requests from
//! self-conflicting in surprising ways, though the manager itself does not
//! enforce ordering — that discipline lives in `Transaction`.

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use velox_core::ids::{ClassId, ObjectId, TxnId};

/// The mode a lock is held in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Readers. Multiple transactions may hold a shared lock on the same
    /// resource concurrently.
    Shared,
    /// Writers. Exclusive with every other shared or exclusive holder.
    Exclusive,
}

/// Identifies a lockable resource. Ordering matches the domain precedence
/// class < hash-key < object (§4.4), derived from declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    /// A per-class lock, taken shared for class scans and exclusive for
    /// schema changes (§4.4, §4.9).
    Class(ClassId),
    /// A per-hash-key lock, taken shared for negative lookups and exclusive
    /// for inserts that must validate uniqueness (§4.4, §4.2).
    HashKey(Vec<u8>),
    /// A per-record object lock.
    Object(ObjectId),
}

#[derive(Default)]
struct LockState {
    exclusive_holder: Option<TxnId>,
    shared_holders: FxHashSet<TxnId>,
}

impl LockState {
    fn is_empty(&self) -> bool {
        self.exclusive_holder.is_none() && self.shared_holders.is_empty()
    }

    fn try_acquire(&mut self, txn: TxnId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => {
                if let Some(holder) = self.exclusive_holder {
                    if holder != txn {
                        return false;
                    }
                }
                self.shared_holders.insert(txn);
                true
            }
            LockMode::Exclusive => {
                if let Some(holder) = self.exclusive_holder {
                    return holder == txn;
                }
                if self.shared_holders.iter().any(|&holder| holder != txn) {
                    return false;
                }
                self.exclusive_holder = Some(txn);
                true
            }
        }
    }

    fn release(&mut self, txn: TxnId) {
        self.shared_holders.remove(&txn);
        if self.exclusive_holder == Some(txn) {
            self.exclusive_holder = None;
        }
    }
}

/// Database-wide table of every currently held lock, across all three
/// domains. One `DashMap` suffices: resources are already namespaced by
/// [`ResourceKey`] variant, so a class id and an object id with the same
/// numeric value never collide.
pub struct LockManager {
    locks: DashMap<ResourceKey, LockState>,
}

impl LockManager {
    /// An empty lock table.
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Attempt to acquire `resource` in `mode` on behalf of `txn`. Returns
    /// `false` immediately on conflict rather than waiting (§4.4).
    ///
    /// Re-entrant: a transaction that already holds a lock on `resource`
    /// (in either mode) may acquire it again, including upgrading its own
    /// shared hold to exclusive, without being considered a conflict against
    /// itself.
    pub fn try_acquire(&self, resource: ResourceKey, txn: TxnId, mode: LockMode) -> bool {
        let mut entry = self.locks.entry(resource).or_default();
        entry.try_acquire(txn, mode)
    }

    /// Release `txn`'s hold on `resource`, if any. Drops the table entry
    /// entirely once no holder remains, so the map never grows unbounded
    /// with cold resources.
    pub fn release(&self, resource: &ResourceKey, txn: TxnId) {
        let mut drop_entry = false;
        if let Some(mut state) = self.locks.get_mut(resource) {
            state.release(txn);
            drop_entry = state.is_empty();
        }
        if drop_entry {
            self.locks.remove(resource);
        }
    }

    /// Whether any transaction other than `txn` currently holds any lock on
    /// `resource`. Used by diagnostics and tests; not on the commit hot path.
    pub fn is_contended_by_others(&self, resource: &ResourceKey, txn: TxnId) -> bool {
        self.locks
            .get(resource)
            .map(|state| {
                state.exclusive_holder.is_some_and(|holder| holder != txn)
                    || state.shared_holders.iter().any(|&holder| holder != txn)
            })
            .unwrap_or(false)
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(n: u64) -> TxnId {
        TxnId::new(velox_core::ids::TXN_ID_BASE + n)
    }

    #[test]
    fn two_shared_holders_coexist() {
        let mgr = LockManager::new();
        let resource = ResourceKey::Object(ObjectId::new(1));
        assert!(mgr.try_acquire(resource.clone(), txn(1), LockMode::Shared));
        assert!(mgr.try_acquire(resource, txn(2), LockMode::Shared));
    }

    #[test]
    fn exclusive_conflicts_with_existing_shared() {
        let mgr = LockManager::new();
        let resource = ResourceKey::Object(ObjectId::new(1));
        assert!(mgr.try_acquire(resource.clone(), txn(1), LockMode::Shared));
        assert!(!mgr.try_acquire(resource, txn(2), LockMode::Exclusive));
    }

    #[test]
    fn exclusive_conflicts_with_existing_exclusive() {
        let mgr = LockManager::new();
        let resource = ResourceKey::Object(ObjectId::new(1));
        assert!(mgr.try_acquire(resource.clone(), txn(1), LockMode::Exclusive));
        assert!(!mgr.try_acquire(resource, txn(2), LockMode::Exclusive));
    }

    #[test]
    fn same_transaction_can_upgrade_shared_to_exclusive() {
        let mgr = LockManager::new();
        let resource = ResourceKey::Object(ObjectId::new(1));
        assert!(mgr.try_acquire(resource.clone(), txn(1), LockMode::Shared));
        assert!(mgr.try_acquire(resource, txn(1), LockMode::Exclusive));
    }

    #[test]
    fn release_clears_the_way_for_other_transactions() {
        let mgr = LockManager::new();
        let resource = ResourceKey::Object(ObjectId::new(1));
        assert!(mgr.try_acquire(resource.clone(), txn(1), LockMode::Exclusive));
        mgr.release(&resource, txn(1));
        assert!(mgr.try_acquire(resource, txn(2), LockMode::Exclusive));
    }

    #[test]
    fn resource_key_ordering_matches_domain_precedence() {
        let class = ResourceKey::Class(ClassId::new(1));
        let hash_key = ResourceKey::HashKey(vec![1]);
        let object = ResourceKey::Object(ObjectId::new(1));
        assert!(class < hash_key);
        assert!(hash_key < object);
    }
}
