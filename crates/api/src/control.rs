//! Engine control surface (§6): the operations an administrative
//! collaborator (CLI, admin RPC service) drives against a running
//! [`Database`] rather than the ordinary transaction lifecycle.
//!
//! Every operation here returns a structured, `serde::Serialize` status
//! object rather than a bare `()`, so a caller across a process boundary
//! (an admin tool talking JSON over the administration endpoint named in
//! §6's cluster-configuration document) can render it without re-deriving
//! state from logs.

use serde::Serialize;
use velox_core::descriptor::{ClassDescriptor, HashIndexDescriptor, PropertyDescriptor};
use velox_core::ids::{ClassId, Version};
use velox_core::VeloxResult;
use velox_engine::Database;
use velox_replication::WriterRole;

/// One step of a schema/model update, applied in order by
/// [`update_assemblies`]. Named after the class-reassembly language of the
/// original model-update protocol (§4.9, §6 "update-assemblies").
#[derive(Debug, Clone)]
pub enum ModelUpdate {
    /// Declare a new class.
    AddClass(ClassDescriptor),
    /// Delete an empty class.
    DeleteClass(ClassId),
    /// Add a property to a class.
    AddProperty { class_id: ClassId, property: PropertyDescriptor },
    /// Remove a property from a class.
    RemoveProperty { class_id: ClassId, field_id: u16 },
    /// Flip whether a reference property is tracked by the inverse map.
    SetReferenceTracked { class_id: ClassId, field_id: u16, tracked: bool },
    /// Declare a hash index, refilling it in the background if needed.
    AddHashIndex { class_id: ClassId, index: HashIndexDescriptor },
    /// Remove a declared hash index.
    RemoveHashIndex { class_id: ClassId, name: String },
    /// Evolve a class descriptor to a type-compatible widening.
    WidenClass { class_id: ClassId, proposed: ClassDescriptor },
}

/// Result of applying a [`ModelUpdate`] batch: how many steps were applied
/// before either finishing or hitting the error returned alongside.
#[derive(Debug, Clone, Serialize)]
pub struct ModelUpdateStatus {
    /// Number of steps applied successfully, in order.
    pub steps_applied: usize,
    /// Total steps requested.
    pub steps_requested: usize,
}

/// Apply a batch of model updates in order (§4.9, §6 "update-assemblies").
/// Stops at the first failing step; steps before it have already taken
/// effect; the caller decides whether to retry the remainder.
pub fn update_assemblies(db: &Database, updates: Vec<ModelUpdate>) -> VeloxResult<ModelUpdateStatus> {
    let steps_requested = updates.len();
    for (steps_applied, update) in updates.into_iter().enumerate() {
        let result = match update {
            ModelUpdate::AddClass(descriptor) => db.add_class(descriptor),
            ModelUpdate::DeleteClass(class_id) => db.delete_class(class_id),
            ModelUpdate::AddProperty { class_id, property } => db.add_property(class_id, property),
            ModelUpdate::RemoveProperty { class_id, field_id } => db.remove_property(class_id, field_id),
            ModelUpdate::SetReferenceTracked { class_id, field_id, tracked } => {
                db.set_reference_tracked(class_id, field_id, tracked)
            }
            ModelUpdate::AddHashIndex { class_id, index } => db.add_hash_index(class_id, index),
            ModelUpdate::RemoveHashIndex { class_id, name } => db.remove_hash_index(class_id, &name),
            ModelUpdate::WidenClass { class_id, proposed } => db.widen_class(class_id, proposed),
        };
        if let Err(e) = result {
            return Err(e);
        }
        if steps_applied + 1 == steps_requested {
            return Ok(ModelUpdateStatus { steps_applied: steps_applied + 1, steps_requested });
        }
    }
    Ok(ModelUpdateStatus { steps_applied: steps_requested, steps_requested })
}

/// Declare an additional, independently durable log stream (§4.8, §6
/// "create-log").
#[derive(Debug, Clone, Serialize)]
pub struct LogStatus {
    /// The stem of the newly declared log stream.
    pub stem: String,
    /// Every log stream currently declared, including this one.
    pub log_streams: Vec<String>,
}

/// Create a new auxiliary log stream.
pub fn create_log(db: &Database, stem: &str) -> VeloxResult<LogStatus> {
    db.create_log(stem)?;
    Ok(LogStatus { stem: stem.to_string(), log_streams: db.log_streams() })
}

/// A checkpoint's resulting state (§4.7, §4.8, §6 "create-snapshot").
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStatus {
    /// The version captured by the snapshot.
    pub version: u64,
}

/// Drain reclaimable versions and write a fresh snapshot.
pub fn create_snapshot(db: &Database) -> VeloxResult<SnapshotStatus> {
    let version = db.checkpoint()?;
    Ok(SnapshotStatus { version: version.get() })
}

/// A rewind's resulting state (§4.6, §6 "rewind").
#[derive(Debug, Clone, Serialize)]
pub struct RewindStatus {
    /// The version the database was rewound to.
    pub target_version: u64,
    /// The local term after the rewind (bumped by every rewind).
    pub term: u64,
}

/// Discard every commit after `target`.
pub fn rewind(db: &Database, target: Version) -> VeloxResult<RewindStatus> {
    let reverted = db.rewind(target)?;
    Ok(RewindStatus { target_version: reverted.get(), term: db.version_manager().term() })
}

/// A failover decision's resulting state (§4.10, §6 "fail-over").
#[derive(Debug, Clone, Serialize)]
pub struct FailoverStatus {
    /// The writer role this node holds after the promotion/demotion.
    pub role: String,
    /// The local term after the transition.
    pub term: u64,
}

/// Promote or demote this node's writer role, e.g. on a witness decision.
/// Bumps the local term when promoting to primary, matching §4.10's
/// "the newly promoted primary increments local-term".
pub fn fail_over(db: &Database, role: WriterRole) -> FailoverStatus {
    db.set_writer_role(role);
    let term = if role == WriterRole::Primary { db.version_manager().advance_term() } else { db.version_manager().term() };
    FailoverStatus { role: format!("{role:?}"), term }
}

/// Per-replica state (§4.10, §6 "status").
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaStatus {
    /// This node's current writer role ("Standalone" if unreplicated).
    pub writer_role: String,
    /// The highest commit version visible to new readers.
    pub visible_version: u64,
    /// The local replication term.
    pub term: u64,
    /// Every auxiliary log stream currently declared.
    pub log_streams: Vec<String>,
    /// Readers currently pinned, holding back GC reclamation.
    pub active_readers: usize,
}

/// Snapshot this node's current status for an admin caller.
pub fn status(db: &Database) -> ReplicaStatus {
    let role = db.writer_role().unwrap_or(WriterRole::Standalone);
    ReplicaStatus {
        writer_role: format!("{role:?}"),
        visible_version: db.version_manager().current_read_version().get(),
        term: db.version_manager().term(),
        log_streams: db.log_streams(),
        active_readers: db.gc().active_reader_count(),
    }
}
