//! Transaction state machine: read version, held locks, the changeset under
//! construction, and deferred integrity checks (§4.5).
//!
//! `Transaction` itself never touches storage. It is the bookkeeping a
//! caller accumulates while running operations against a record store, and
//! the engine's commit path drains it: lock acquisition order decides
//! commit-time validation order, the changeset becomes the WAL payload, and
//! the deferred checks are resolved once every lock the transaction needs is
//! held.

use crate::lock_manager::{LockManager, LockMode, ResourceKey};
use std::time::{Duration, Instant};
use velox_core::changeset::{ChangeSet, Operation};
use velox_core::ids::{ClassId, ObjectId, TxnId, Version};
use velox_core::{VeloxError, VeloxResult};
use velox_storage::hash_index::IndexKey;

/// Lifecycle state of a transaction (§4.5).
///
/// ```text
/// Active -> Validating -> Committed
/// Active -> Validating -> Aborting  (conflict, integrity failure, timeout)
/// Active -> Aborting               (explicit rollback)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Running: may read, write, and acquire locks.
    Active,
    /// Commit in progress: locks are being acquired and checks resolved.
    Validating,
    /// Committed; terminal.
    Committed {
        /// The version assigned at the commit fence.
        commit_version: Version,
    },
    /// Aborted; terminal. Carries the reason for diagnostics.
    Aborted {
        /// Why the transaction did not commit.
        reason: String,
    },
}

/// A referential-integrity or uniqueness check whose resolution is deferred
/// until the transaction has acquired every lock it needs, so the check sees
/// a state that cannot change underneath it before commit (§4.3, §4.2).
#[derive(Debug, Clone)]
pub enum DeferredCheck {
    /// A reference property must point at a record that still exists by
    /// commit time (§4.3: dangling references are rejected at commit).
    ReferenceTargetExists {
        /// The class whose property holds the reference.
        class_id: ClassId,
        /// The reference property's field id.
        field_id: u16,
        /// The id the reference points at.
        target: ObjectId,
    },
    /// A unique hash index key must not already be occupied by another live
    /// record (§4.2).
    UniqueKeyAvailable {
        /// The index being validated.
        index_name: String,
        /// The canonical key bytes being inserted.
        key: IndexKey,
        /// The record this key belongs to, excluded from the occupancy check.
        object_id: ObjectId,
    },
}

/// A read/write or read-only unit of work (§3).
pub struct Transaction {
    /// Unique id in the reserved transaction-id space (§4.5).
    pub txn_id: TxnId,
    /// The snapshot version this transaction reads against.
    pub read_version: Version,
    status: TransactionStatus,
    /// Locks held, in acquisition order, so release can reverse it (§4.4).
    held_locks: Vec<(ResourceKey, LockMode)>,
    changeset: ChangeSet,
    deferred_checks: Vec<DeferredCheck>,
    deadline: Option<Instant>,
}

impl Transaction {
    /// Begin a new transaction with no deadline.
    pub fn new(txn_id: TxnId, read_version: Version) -> Self {
        Self {
            txn_id,
            read_version,
            status: TransactionStatus::Active,
            held_locks: Vec::new(),
            changeset: ChangeSet::new(),
            deferred_checks: Vec::new(),
            deadline: None,
        }
    }

    /// Begin a new transaction that must commit or abort within `timeout`
    /// (§5: "each transaction has a deadline").
    pub fn with_deadline(txn_id: TxnId, read_version: Version, timeout: Duration) -> Self {
        let mut txn = Self::new(txn_id, read_version);
        txn.deadline = Some(Instant::now() + timeout);
        txn
    }

    /// The transaction's current lifecycle state.
    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    /// Whether the transaction is still running.
    pub fn is_active(&self) -> bool {
        matches!(self.status, TransactionStatus::Active)
    }

    /// Whether the deadline, if any, has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Whether this transaction has staged no mutations, and so needs no
    /// WAL frame or replication at commit (§4.5.1).
    pub fn is_read_only(&self) -> bool {
        self.changeset.is_empty()
    }

    /// Acquire `resource` in `mode` through `locks`, recording it on success
    /// so it is released on terminal transition. Fails fast with
    /// `TransactionConflict` on contention (§4.4); fails with
    /// `TransactionNotAllowed` if the transaction is not `Active`, and with
    /// `Canceled` if its deadline has passed.
    pub fn acquire(
        &mut self,
        locks: &LockManager,
        resource: ResourceKey,
        mode: LockMode,
    ) -> VeloxResult<()> {
        if !self.is_active() {
            return Err(VeloxError::transaction_not_allowed(
                "lock acquisition attempted outside the Active state",
            ));
        }
        if self.is_expired() {
            self.status = TransactionStatus::Aborted { reason: "deadline expired".into() };
            return Err(VeloxError::canceled("transaction deadline expired"));
        }
        if !locks.try_acquire(resource.clone(), self.txn_id, mode) {
            let (class_id, object_id) = match &resource {
                ResourceKey::Class(c) => (Some(*c), None),
                ResourceKey::Object(o) => (None, Some(*o)),
                ResourceKey::HashKey(_) => (None, None),
            };
            return Err(VeloxError::transaction_conflict(class_id, object_id));
        }
        self.held_locks.push((resource, mode));
        Ok(())
    }

    /// Append an operation to the transaction's changeset (§3, §6).
    pub fn record(&mut self, op: Operation) {
        self.changeset.push(op);
    }

    /// Queue a check to resolve once all locks for this transaction are
    /// held.
    pub fn defer_check(&mut self, check: DeferredCheck) {
        self.deferred_checks.push(check);
    }

    /// Checks queued so far, in the order they were deferred.
    pub fn deferred_checks(&self) -> &[DeferredCheck] {
        &self.deferred_checks
    }

    /// The changeset accumulated so far.
    pub fn changeset(&self) -> &ChangeSet {
        &self.changeset
    }

    /// Every resource this transaction currently holds a lock on, in
    /// acquisition order.
    pub fn held_locks(&self) -> &[(ResourceKey, LockMode)] {
        &self.held_locks
    }

    /// Active -> Validating, the first step of the commit protocol (§4.5).
    pub fn begin_validation(&mut self) -> VeloxResult<()> {
        if !self.is_active() {
            return Err(VeloxError::transaction_not_allowed(
                "commit attempted from a non-Active state",
            ));
        }
        self.status = TransactionStatus::Validating;
        Ok(())
    }

    /// Validating -> Committed, once every check has passed and a commit
    /// version has been assigned by the version manager.
    pub fn mark_committed(&mut self, commit_version: Version) {
        self.status = TransactionStatus::Committed { commit_version };
    }

    /// -> Aborted, from any non-terminal state.
    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.status = TransactionStatus::Aborted { reason: reason.into() };
    }

    /// Release every held lock through `locks`, in reverse acquisition order
    /// (§4.4: "locks are released ... in reverse acquisition order"). Called
    /// once the transaction reaches a terminal state.
    pub fn release_locks(&mut self, locks: &LockManager) {
        while let Some((resource, _mode)) = self.held_locks.pop() {
            locks.release(&resource, self.txn_id);
        }
    }

    /// Consume the transaction, returning its finished changeset for the WAL
    /// and replication path.
    pub fn into_changeset(self) -> ChangeSet {
        self.changeset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velox_core::value::FieldValue;

    fn txn() -> Transaction {
        Transaction::new(TxnId::new(velox_core::ids::TXN_ID_BASE + 1), Version::new(5))
    }

    #[test]
    fn new_transaction_is_active_and_read_only() {
        let t = txn();
        assert!(t.is_active());
        assert!(t.is_read_only());
    }

    #[test]
    fn recording_an_operation_makes_it_not_read_only() {
        let mut t = txn();
        t.record(Operation::Create {
            class_id: ClassId::new(1),
            object_id: ObjectId::new(1),
            fields: vec![FieldValue::Int(1)],
        });
        assert!(!t.is_read_only());
    }

    #[test]
    fn locks_release_in_reverse_acquisition_order() {
        let locks = LockManager::new();
        let mut t = txn();
        t.acquire(&locks, ResourceKey::Class(ClassId::new(1)), LockMode::Shared).unwrap();
        t.acquire(&locks, ResourceKey::Object(ObjectId::new(1)), LockMode::Exclusive).unwrap();
        assert_eq!(t.held_locks().len(), 2);
        t.release_locks(&locks);
        assert!(t.held_locks().is_empty());
        // both resources must now be free for another transaction
        let other = TxnId::new(velox_core::ids::TXN_ID_BASE + 2);
        assert!(locks.try_acquire(ResourceKey::Class(ClassId::new(1)), other, LockMode::Exclusive));
        assert!(locks.try_acquire(ResourceKey::Object(ObjectId::new(1)), other, LockMode::Exclusive));
    }

    #[test]
    fn conflicting_acquire_returns_transaction_conflict() {
        let locks = LockManager::new();
        let mut t1 = Transaction::new(TxnId::new(velox_core::ids::TXN_ID_BASE + 1), Version::new(1));
        let mut t2 = Transaction::new(TxnId::new(velox_core::ids::TXN_ID_BASE + 2), Version::new(1));
        t1.acquire(&locks, ResourceKey::Object(ObjectId::new(9)), LockMode::Exclusive).unwrap();
        let err = t2
            .acquire(&locks, ResourceKey::Object(ObjectId::new(9)), LockMode::Exclusive)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn commit_protocol_transitions_through_validating() {
        let mut t = txn();
        t.begin_validation().unwrap();
        assert_eq!(*t.status(), TransactionStatus::Validating);
        t.mark_committed(Version::new(6));
        assert_eq!(*t.status(), TransactionStatus::Committed { commit_version: Version::new(6) });
    }

    #[test]
    fn expired_deadline_fails_lock_acquisition() {
        let locks = LockManager::new();
        let mut t = Transaction::with_deadline(
            TxnId::new(velox_core::ids::TXN_ID_BASE + 1),
            Version::new(1),
            Duration::from_millis(0),
        );
        std::thread::sleep(Duration::from_millis(5));
        let err = t
            .acquire(&locks, ResourceKey::Object(ObjectId::new(1)), LockMode::Shared)
            .unwrap_err();
        assert!(matches!(err, VeloxError::Canceled { .. }));
    }
}
