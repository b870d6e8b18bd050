//! Changeset shipping and replication-ack policy (§4.10).

use velox_core::changeset::ChangeSet;
use velox_core::error::{VeloxError, VeloxResult};
use velox_core::ids::Version;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Whether a committer waits for peer acknowledgement before returning
/// (§4.10, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The committer blocks until the peer acks the frame.
    Synchronous,
    /// The committer returns once local durability is satisfied; the frame
    /// ships in the background.
    Asynchronous,
}

/// This node's role with respect to write admission (§4.10's "Transaction
/// admission").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterRole {
    /// No replication configured; this node is always authoritative.
    Standalone,
    /// This node currently holds the primary lease.
    Primary,
    /// This node is a standby, mid-alignment or streaming.
    Standby,
}

impl WriterRole {
    /// Whether a read/write transaction may be admitted on this node right
    /// now.
    pub fn admits_writes(&self) -> bool {
        matches!(self, WriterRole::Standalone | WriterRole::Primary)
    }
}

/// A changeset framed for shipping to a peer, carrying the log sequence
/// number assigned by the primary (§4.10).
#[derive(Debug, Clone)]
pub struct ReplicationFrame {
    /// Monotonic sequence number assigned on the primary.
    pub sequence: u64,
    /// The commit version this changeset produced.
    pub commit_version: Version,
    /// The changeset payload.
    pub changeset: ChangeSet,
}

/// Transport used to ship frames to a peer. A trait because the concrete
/// wire protocol is out of scope for this core (§1).
pub trait PeerLink: Send + Sync {
    /// Ship `frame` to the peer, blocking until it is acked if `ack_mode`
    /// is [`AckMode::Synchronous`]. Returns once the frame has at least
    /// been queued for asynchronous delivery.
    fn ship(&self, frame: &ReplicationFrame, ack_mode: AckMode, timeout: Duration) -> VeloxResult<()>;
}

impl PeerLink for Box<dyn PeerLink> {
    fn ship(&self, frame: &ReplicationFrame, ack_mode: AckMode, timeout: Duration) -> VeloxResult<()> {
        (**self).ship(frame, ack_mode, timeout)
    }
}

/// Drives outbound replication for one primary-to-peer link.
pub struct Replicator<L: PeerLink> {
    link: L,
    ack_mode: AckMode,
    ack_timeout: Duration,
    next_sequence: AtomicU64,
    role: WriterRole,
}

impl<L: PeerLink> Replicator<L> {
    /// Build a replicator starting sequence numbers at `starting_sequence`.
    pub fn new(link: L, ack_mode: AckMode, ack_timeout: Duration, starting_sequence: u64, role: WriterRole) -> Self {
        Self {
            link,
            ack_mode,
            ack_timeout,
            next_sequence: AtomicU64::new(starting_sequence),
            role,
        }
    }

    /// The current writer role.
    pub fn role(&self) -> WriterRole {
        self.role
    }

    /// Update the writer role, e.g. after a failover promotion.
    pub fn set_role(&mut self, role: WriterRole) {
        self.role = role;
    }

    /// Reject a read/write transaction with `TransactionNotAllowed` unless
    /// this node is the authoritative writer (§4.10).
    pub fn admit_write(&self) -> VeloxResult<()> {
        if self.role.admits_writes() {
            Ok(())
        } else {
            Err(VeloxError::transaction_not_allowed(
                "this node is not the authoritative writer for the database",
            ))
        }
    }

    /// Ship a just-committed changeset to the peer, assigning it the next
    /// sequence number. Returns `Unavailable` on an ack timeout (§5, §7);
    /// the caller is expected to abort the owning transaction.
    pub fn replicate(&self, commit_version: Version, changeset: ChangeSet) -> VeloxResult<u64> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let frame = ReplicationFrame { sequence, commit_version, changeset };
        self.link.ship(&frame, self.ack_mode, self.ack_timeout)?;
        Ok(sequence)
    }
}
