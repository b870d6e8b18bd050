//! Unified error type for the VeloxDB core.
//!
//! Every fallible operation in the workspace returns [`VeloxResult`]. The
//! error kinds below are exactly the ones named in the error handling design:
//! optimistic and integrity failures are retryable by the caller, durability
//! and replication timeouts are retryable once the engine reports ready, and
//! `Fatal` aborts the process — recovery on restart is the only path back.

use crate::ids::{ClassId, ObjectId};
use std::io;
use thiserror::Error;

/// Result alias used throughout the workspace.
pub type VeloxResult<T> = std::result::Result<T, VeloxError>;

/// The unified VeloxDB error type.
///
/// ## Example
/// ```ignore
/// match txn.commit() {
///     Err(e) if e.is_retryable() => retry(),
///     Err(e) if e.is_fatal() => panic!("{e}"),
///     Err(e) => return Err(e),
///     Ok(v) => v,
/// }
/// ```
#[derive(Debug, Error)]
pub enum VeloxError {
    // =========================================================================
    // Optimistic concurrency
    // =========================================================================
    /// The transaction lost an optimistic race: either a lock could not be
    /// acquired without waiting (§4.4), or a version chain it observed moved
    /// past its read version before commit (§4.1).
    ///
    /// Retryable: the caller may re-run the transaction from scratch.
    #[error("transaction conflict on class {class_id:?} object {object_id:?}")]
    TransactionConflict {
        /// Class of the contended record, if known.
        class_id: Option<ClassId>,
        /// Object id of the contended record, if known.
        object_id: Option<ObjectId>,
    },

    /// A read/write transaction was attempted where the current node or
    /// transaction state does not permit writes: a read-only transaction
    /// attempting a write (§4.1), or this replica not being the authoritative
    /// writer for the database (§4.10).
    #[error("transaction not allowed: {reason}")]
    TransactionNotAllowed {
        /// Why the write was rejected.
        reason: String,
    },

    // =========================================================================
    // Referential integrity / schema
    // =========================================================================
    /// A `PreventDelete` reference still points at the record being deleted,
    /// or a cardinality-1 reference would become null under `SetToNull`
    /// (§4.3).
    #[error("referential integrity violation on class {class_id:?} object {object_id:?}: {reason}")]
    ReferentialIntegrityViolation {
        /// Class of the offending record.
        class_id: ClassId,
        /// Object id of the offending record.
        object_id: ObjectId,
        /// Human-readable detail.
        reason: String,
    },

    /// A unique hash index would admit two live records sharing the same key
    /// tuple (§4.2).
    #[error("uniqueness violation on index {index_name}")]
    UniquenessViolation {
        /// Name of the violated index.
        index_name: String,
    },

    /// A hash index lookup or insert presented a key tuple whose declared
    /// type does not match the index's property types (§4.2).
    #[error("index key type mismatch on index {index_name}: {reason}")]
    IndexKeyTypeMismatch {
        /// Name of the index.
        index_name: String,
        /// Why the key didn't match.
        reason: String,
    },

    /// A proposed model update is not a type-compatible evolution of the
    /// existing descriptor (§4.9).
    #[error("schema incompatible: {reason}")]
    SchemaIncompatible {
        /// Why the update was rejected.
        reason: String,
    },

    /// A write/write-originated transaction collided with a concurrently
    /// promoted model update that drained readers (§4.9).
    #[error("conflict with schema update on class {class_id:?}")]
    ConflictWithSchemaUpdate {
        /// Class whose descriptor was being updated.
        class_id: ClassId,
    },

    // =========================================================================
    // Wire / log format
    // =========================================================================
    /// A changeset carried an op-kind the decoder does not recognize (§6).
    #[error("changeset corrupted: {reason}")]
    ChangesetCorrupted {
        /// Decoding detail.
        reason: String,
    },

    /// A WAL frame or snapshot section failed its checksum or header
    /// validation (§4.8, §6).
    #[error("log corrupted: {reason}")]
    LogCorrupted {
        /// Decoding detail.
        reason: String,
    },

    // =========================================================================
    // Availability
    // =========================================================================
    /// A durability or replication acknowledgement did not arrive within its
    /// bounded timeout (§5). Retryable once the engine reports ready.
    #[error("unavailable: {reason}")]
    Unavailable {
        /// What timed out.
        reason: String,
    },

    /// The transaction's deadline expired, or a long scan observed a
    /// cancellation flag (§5).
    #[error("canceled: {reason}")]
    Canceled {
        /// Why the operation was canceled.
        reason: String,
    },

    // =========================================================================
    // Fatal
    // =========================================================================
    /// An unrecoverable invariant violation. Aborts the process; recovery on
    /// restart is the only path back (§7). Includes object-id space
    /// exhaustion at the 63-bit boundary (§4.1).
    #[error("fatal: {reason}")]
    Fatal {
        /// The violated invariant.
        reason: String,
    },
}

impl VeloxError {
    /// A transaction lost an optimistic race.
    pub fn transaction_conflict(class_id: Option<ClassId>, object_id: Option<ObjectId>) -> Self {
        VeloxError::TransactionConflict { class_id, object_id }
    }

    /// A write was attempted where it is not permitted.
    pub fn transaction_not_allowed(reason: impl Into<String>) -> Self {
        VeloxError::TransactionNotAllowed { reason: reason.into() }
    }

    /// A `PreventDelete`/`SetToNull` policy rejected a mutation.
    pub fn referential_integrity_violation(
        class_id: ClassId,
        object_id: ObjectId,
        reason: impl Into<String>,
    ) -> Self {
        VeloxError::ReferentialIntegrityViolation {
            class_id,
            object_id,
            reason: reason.into(),
        }
    }

    /// A unique index key collided with a live record.
    pub fn uniqueness_violation(index_name: impl Into<String>) -> Self {
        VeloxError::UniquenessViolation { index_name: index_name.into() }
    }

    /// An index key tuple did not match the index's declared types.
    pub fn index_key_type_mismatch(index_name: impl Into<String>, reason: impl Into<String>) -> Self {
        VeloxError::IndexKeyTypeMismatch {
            index_name: index_name.into(),
            reason: reason.into(),
        }
    }

    /// A model update is not type-compatible with the existing descriptor.
    pub fn schema_incompatible(reason: impl Into<String>) -> Self {
        VeloxError::SchemaIncompatible { reason: reason.into() }
    }

    /// A transaction collided with an in-flight schema update.
    pub fn conflict_with_schema_update(class_id: ClassId) -> Self {
        VeloxError::ConflictWithSchemaUpdate { class_id }
    }

    /// A changeset carried an unrecognized op-kind.
    pub fn changeset_corrupted(reason: impl Into<String>) -> Self {
        VeloxError::ChangesetCorrupted { reason: reason.into() }
    }

    /// A WAL frame or snapshot failed validation.
    pub fn log_corrupted(reason: impl Into<String>) -> Self {
        VeloxError::LogCorrupted { reason: reason.into() }
    }

    /// A durability or replication acknowledgement timed out.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        VeloxError::Unavailable { reason: reason.into() }
    }

    /// A deadline expired or a cancellation flag was observed.
    pub fn canceled(reason: impl Into<String>) -> Self {
        VeloxError::Canceled { reason: reason.into() }
    }

    /// An unrecoverable invariant was violated; the process should abort.
    pub fn fatal(reason: impl Into<String>) -> Self {
        VeloxError::Fatal { reason: reason.into() }
    }

    /// Whether the caller may retry the same transaction from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VeloxError::TransactionConflict { .. }
                | VeloxError::Unavailable { .. }
                | VeloxError::ConflictWithSchemaUpdate { .. }
        )
    }

    /// Whether this error represents an optimistic-concurrency or lock
    /// conflict rather than a data-integrity or availability problem.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            VeloxError::TransactionConflict { .. } | VeloxError::ConflictWithSchemaUpdate { .. }
        )
    }

    /// Whether this error signals broken referential integrity or a
    /// uniqueness violation at commit time.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            VeloxError::ReferentialIntegrityViolation { .. }
                | VeloxError::UniquenessViolation { .. }
        )
    }

    /// Whether this error is fatal and the process should abort after
    /// logging it (§7).
    pub fn is_fatal(&self) -> bool {
        matches!(self, VeloxError::Fatal { .. })
    }

    /// The class id this error references, if any.
    pub fn class_id(&self) -> Option<ClassId> {
        match self {
            VeloxError::TransactionConflict { class_id, .. } => *class_id,
            VeloxError::ReferentialIntegrityViolation { class_id, .. } => Some(*class_id),
            VeloxError::ConflictWithSchemaUpdate { class_id } => Some(*class_id),
            _ => None,
        }
    }
}

impl From<io::Error> for VeloxError {
    fn from(e: io::Error) -> Self {
        VeloxError::fatal(format!("I/O error: {e}"))
    }
}

impl From<bincode::Error> for VeloxError {
    fn from(e: bincode::Error) -> Self {
        VeloxError::changeset_corrupted(format!("bincode decode failed: {e}"))
    }
}

impl From<rmp_serde::encode::Error> for VeloxError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        VeloxError::changeset_corrupted(format!("msgpack encode failed: {e}"))
    }
}

impl From<rmp_serde::decode::Error> for VeloxError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        VeloxError::changeset_corrupted(format!("msgpack decode failed: {e}"))
    }
}

impl From<serde_json::Error> for VeloxError {
    fn from(e: serde_json::Error) -> Self {
        VeloxError::fatal(format!("cluster config JSON error: {e}"))
    }
}
