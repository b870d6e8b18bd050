//! The commit fence and visible-version sequencer (§4.6).
//!
//! A monotonic commit version is assigned to every committing transaction
//! under a short critical section (the "commit fence"); the version only
//! becomes visible to new readers once its WAL frame is durable. Read
//! transactions sample the current visible version exactly once, at the
//! start of the transaction, and see a consistent snapshot as of that
//! version for their entire lifetime.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use velox_core::ids::Version;

/// Assigns commit versions and tracks which of them are visible to new
/// readers, plus the local term used by the replication elector (§4.10).
pub struct VersionManager {
    /// The next commit version to hand out. Guarded by `fence` so
    /// assignment and the WAL append that follows it happen in the same
    /// order for every committer.
    next: Mutex<u64>,
    /// The highest commit version visible to new read transactions.
    visible: AtomicU64,
    /// Incremented whenever this node transitions to primary (§4.10); a
    /// rewind also bumps it so a stale in-flight transaction's deferred
    /// checks can detect they were issued under a superseded term.
    term: AtomicU64,
}

/// Holds the commit fence for the span between assigning a commit version
/// and appending its changeset to the log. Released (dropped) immediately
/// after the append; the much longer wait for durability happens outside
/// the fence so concurrent committers can still batch in one group-commit
/// round.
pub struct CommitFence<'a> {
    _guard: parking_lot::MutexGuard<'a, u64>,
    version: Version,
}

impl<'a> CommitFence<'a> {
    /// The commit version assigned to this transaction.
    pub fn version(&self) -> Version {
        self.version
    }
}

impl VersionManager {
    /// A fresh manager with no committed history.
    pub fn new() -> Self {
        Self { next: Mutex::new(1), visible: AtomicU64::new(0), term: AtomicU64::new(0) }
    }

    /// Resume after restart at `version` (the highest version replayed)
    /// with the given local term.
    pub fn resume(version: Version, term: u64) -> Self {
        Self { next: Mutex::new(version.get() + 1), visible: AtomicU64::new(version.get()), term: AtomicU64::new(term) }
    }

    /// The version a new read transaction should pin to.
    pub fn current_read_version(&self) -> Version {
        Version::new(self.visible.load(Ordering::Acquire))
    }

    /// The current local term (§4.10).
    pub fn term(&self) -> u64 {
        self.term.load(Ordering::Acquire)
    }

    /// Bump the local term, e.g. on a primary-transition (§4.10).
    pub fn advance_term(&self) -> u64 {
        self.term.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Enter the commit fence and reserve the next commit version. Hold
    /// the returned guard only across the WAL append; drop it (or let it
    /// go out of scope) before waiting on durability.
    pub fn enter_commit_fence(&self) -> CommitFence<'_> {
        let mut guard = self.next.lock();
        let version = Version::new(*guard);
        *guard += 1;
        CommitFence { _guard: guard, version }
    }

    /// Make `version` visible to new readers, once its frame is durable.
    /// Idempotent and safe to call out of strict order: visibility only
    /// ever moves forward.
    pub fn publish(&self, version: Version) {
        self.visible.fetch_max(version.get(), Ordering::AcqRel);
    }

    /// Roll state back to `target`, discarding any higher commit version
    /// ever having existed (§4.6 rewind). The caller is responsible for
    /// truncating version chains and the log before calling this; the
    /// term is bumped so stale deferred checks from aborted transactions
    /// can be told apart from fresh ones.
    pub fn rewind(&self, target: Version) -> u64 {
        *self.next.lock() = target.get() + 1;
        self.visible.store(target.get(), Ordering::Release);
        self.advance_term()
    }
}

impl Default for VersionManager {
    fn default() -> Self {
        Self::new()
    }
}
