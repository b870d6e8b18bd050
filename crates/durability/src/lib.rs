//! Durability layer for VeloxDB (§4.8, §6, §7).
//!
//! Everything that touches disk lives here:
//!
//! - [`frame`]: the WAL frame wire format (length-prefixed, checksummed).
//! - [`header`]: the small pointer file naming the active log and snapshot
//!   letter, flipped atomically once a rotation completes.
//! - [`wal`]: the append-only log file itself, plus replay-on-open.
//! - [`group_commit`]: batches concurrent committers into one append+fsync.
//! - [`snapshot`]: full, versioned dumps of every class's records and
//!   indexes, written to the currently-inactive snapshot letter.
//! - [`restore`]: picks the newest valid snapshot and replays every log
//!   frame committed after it to reconstruct database state on startup.
//!
//! None of this crate decides *when* to commit, flush, or rotate — that
//! policy (watermarks, quiescing writers ahead of a snapshot) belongs to
//! `velox-engine`. This crate only guarantees that once a call here
//! returns, the corresponding bytes are durable, and that a restart can
//! always get back to the last durable state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod frame;
pub mod group_commit;
pub mod header;
pub mod restore;
pub mod snapshot;
pub mod wal;

pub use frame::WalFrame;
pub use group_commit::{GroupCommitConfig, GroupCommitter};
pub use header::{ActiveHeader, Letter};
pub use restore::{restore, RestoredState};
pub use snapshot::{ClassSnapshot, IndexSnapshot, SnapshotData, SnapshotReader, SnapshotWriter};
pub use wal::WalWriter;
