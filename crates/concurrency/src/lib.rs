//! Lock manager and transaction state machine for VeloxDB (§4.4, §4.5).
//!
//! This crate holds no records and writes no WAL frames: it decides whether
//! a transaction may proceed (lock acquisition, fail-fast on conflict) and
//! accumulates what it has done (changeset, deferred checks). `velox-engine`
//! drives a `Transaction` through its lifecycle, calling into
//! `velox-storage` to apply writes and `velox-durability` to make the result
//! durable once every lock is held and every check has passed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock_manager;
pub mod transaction;

pub use lock_manager::{LockManager, LockMode, ResourceKey};
pub use transaction::{DeferredCheck, Transaction, TransactionStatus};

pub use velox_core::traits::SnapshotView;
