//! Group commit: batches pending committers within a small time window or
//! batch-size threshold into one append+fsync (§4.8: "the persister batches
//! pending committers ... into one append+fsync; committers wake in commit
//! version order").
//!
//! One thread reaching [`GroupCommitter::commit`] while no flush is in
//! flight becomes the leader for that round: it appends its own frame,
//! waits up to `max_delay` (or until `max_batch` frames have queued up,
//! whichever comes first) for other threads to append theirs, then issues
//! a single `fsync` covering all of them. Every other thread that arrives
//! during that window is a follower — it appends its frame under the same
//! lock and then blocks on a condvar until the leader's fsync has covered
//! its sequence number, waking in the order their frames were durably
//! flushed together.

use crate::header::Letter;
use crate::wal::WalWriter;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use velox_core::changeset::ChangeSet;
use velox_core::ids::Version;
use velox_core::VeloxResult;

/// Tuning knobs for batching.
#[derive(Debug, Clone, Copy)]
pub struct GroupCommitConfig {
    /// Flush immediately once this many frames have queued since the
    /// window opened, without waiting out the rest of `max_delay`.
    pub max_batch: u64,
    /// The longest a leader waits for followers before flushing anyway.
    pub max_delay: Duration,
    /// How finely the leader polls for early-exit conditions while
    /// waiting out `max_delay`.
    pub poll_interval: Duration,
}

impl Default for GroupCommitConfig {
    fn default() -> Self {
        Self { max_batch: 64, max_delay: Duration::from_millis(5), poll_interval: Duration::from_micros(200) }
    }
}

/// Serializes append+fsync of the active log file across concurrently
/// committing transactions.
pub struct GroupCommitter {
    wal: Mutex<WalWriter>,
    flushed_through: Mutex<u64>,
    condvar: Condvar,
    leading: AtomicBool,
    pending_since_flush: AtomicU64,
    config: GroupCommitConfig,
}

impl GroupCommitter {
    /// Wrap an already-open [`WalWriter`].
    pub fn new(wal: WalWriter, config: GroupCommitConfig) -> Self {
        let next = wal.next_sequence();
        Self {
            wal: Mutex::new(wal),
            flushed_through: Mutex::new(next.saturating_sub(1)),
            condvar: Condvar::new(),
            leading: AtomicBool::new(false),
            pending_since_flush: AtomicU64::new(0),
            config,
        }
    }

    /// Append `changeset` at `commit_version` and block until it is
    /// durably fsynced, as part of whichever batch picks it up. Returns
    /// the frame's assigned sequence number.
    pub fn commit(&self, commit_version: Version, changeset: ChangeSet) -> VeloxResult<u64> {
        let sequence = self.append(commit_version, changeset)?;
        self.wait_until_flushed(sequence)?;
        Ok(sequence)
    }

    /// Append `changeset` at `commit_version` without waiting for
    /// durability. Split out from [`commit`](Self::commit) so a caller
    /// holding its own short-lived critical section (the engine's commit
    /// fence, which assigns the commit version and must cover the append)
    /// can release that section before blocking on the fsync wait, letting
    /// concurrent committers still batch into one round.
    pub fn append(&self, commit_version: Version, changeset: ChangeSet) -> VeloxResult<u64> {
        let sequence = {
            let mut wal = self.wal.lock();
            wal.append(commit_version, changeset)?
        };
        self.pending_since_flush.fetch_add(1, Ordering::AcqRel);
        Ok(sequence)
    }

    /// Block until the frame assigned `sequence` by [`append`](Self::append)
    /// is durably fsynced.
    pub fn wait_for_durability(&self, sequence: u64) -> VeloxResult<()> {
        self.wait_until_flushed(sequence)
    }

    /// Rotate the underlying log once a companion snapshot is durable.
    /// Must not be called concurrently with in-flight commits (the engine
    /// quiesces writers before rotating).
    pub fn rotate(&self, snapshot_letter: Letter) -> VeloxResult<()> {
        let mut wal = self.wal.lock();
        wal.rotate(snapshot_letter)?;
        let mut flushed = self.flushed_through.lock();
        *flushed = wal.next_sequence().saturating_sub(1);
        Ok(())
    }

    fn wait_until_flushed(&self, sequence: u64) -> VeloxResult<()> {
        loop {
            {
                let flushed = self.flushed_through.lock();
                if *flushed >= sequence {
                    return Ok(());
                }
            }

            if self.leading.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                self.lead_one_round()?;
                return Ok(());
            }

            let mut flushed = self.flushed_through.lock();
            if *flushed >= sequence {
                return Ok(());
            }
            self.condvar.wait_for(&mut flushed, self.config.poll_interval);
        }
    }

    fn lead_one_round(&self) -> VeloxResult<()> {
        self.pending_since_flush.store(1, Ordering::Release);
        let deadline = Instant::now() + self.config.max_delay;
        while Instant::now() < deadline {
            if self.pending_since_flush.load(Ordering::Acquire) >= self.config.max_batch {
                break;
            }
            std::thread::sleep(self.config.poll_interval);
        }

        let flushed_to = {
            let mut wal = self.wal.lock();
            wal.flush()?;
            wal.next_sequence().saturating_sub(1)
        };

        {
            let mut flushed = self.flushed_through.lock();
            *flushed = flushed_to;
        }
        tracing::debug!(flushed_through = flushed_to, "group commit fsync");
        self.pending_since_flush.store(0, Ordering::Release);
        self.leading.store(false, Ordering::Release);
        self.condvar.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use velox_core::changeset::Operation;
    use velox_core::ids::{ClassId, ObjectId};
    use velox_core::value::FieldValue;

    fn changeset() -> ChangeSet {
        let mut cs = ChangeSet::new();
        cs.push(Operation::Create {
            class_id: ClassId::new(1),
            object_id: ObjectId::new(1),
            fields: vec![FieldValue::Int(1)],
        });
        cs
    }

    #[test]
    fn single_commit_returns_once_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let (wal, _, _) = WalWriter::open(dir.path(), "log").unwrap();
        let committer = GroupCommitter::new(wal, GroupCommitConfig { max_delay: Duration::from_millis(1), ..Default::default() });
        let sequence = committer.commit(Version::new(1), changeset()).unwrap();
        assert_eq!(sequence, 0);
    }

    #[test]
    fn concurrent_commits_all_observe_durable_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (wal, _, _) = WalWriter::open(dir.path(), "log").unwrap();
        let committer = Arc::new(GroupCommitter::new(
            wal,
            GroupCommitConfig { max_batch: 4, max_delay: Duration::from_millis(20), poll_interval: Duration::from_micros(100) },
        ));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let committer = committer.clone();
                std::thread::spawn(move || committer.commit(Version::new(i + 1), changeset()).unwrap())
            })
            .collect();

        let mut sequences: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, (0..8).collect::<Vec<_>>());

        let (_, frames, torn) = crate::wal::read_all_frames(&dir.path().join("log.a")).unwrap();
        assert_eq!(frames.len(), 8);
        assert!(!torn);
    }
}
