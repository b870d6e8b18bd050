//! The database handle: opens a data directory, restores state, and serves
//! the transaction lifecycle (begin/read/write/commit) on top of the
//! storage, concurrency, and durability crates (§3, §4, §7).
//!
//! `Database` is the one type that knows about every other layer. Nothing
//! below it (storage, concurrency, durability) knows about the others;
//! nothing above it (the API surface) reaches past it into their internals.

use crate::config::{VeloxConfig, CONFIG_FILE_NAME};
use crate::gc::GarbageCollector;
use crate::integrity;
use crate::model::ModelManager;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use velox_concurrency::{DeferredCheck, LockManager, LockMode, ResourceKey, Transaction, TransactionStatus};
use velox_core::changeset::{ChangeSet, Operation, RefArrayEdit};
use velox_core::descriptor::{ClassDescriptor, DeletePolicy, HashIndexDescriptor, PropertyDescriptor, PropertyType};
use velox_core::ids::{ClassId, ObjectId, TxnId, Version, TXN_ID_BASE};
use velox_core::traits::SnapshotView;
use velox_core::value::FieldValue;
use velox_core::{VeloxError, VeloxResult};
use velox_durability::{ActiveHeader, GroupCommitter, SnapshotWriter, WalWriter};
use velox_replication::{PeerLink, Replicator};
use velox_storage::{encode_key, ClassRecordStore, ClassRegistry, ClassStore, HashIndex, IdGenerator, InverseRefMap, RefSlot};

/// Enough state to reverse one already-applied [`Operation`] against the
/// stores, recorded by [`Database::apply_operation`] and consumed by
/// [`Database::revert_operation`] when a transaction fails after its
/// changeset has already been applied but before it is durable (§4.5).
enum Undo {
    /// Undo a create: drop the pushed version and the index/inverse-ref
    /// entries it added.
    Create { class_id: ClassId, object_id: ObjectId, commit_version: Version, fields: Vec<FieldValue> },
    /// Undo an update: drop the pushed version, remove the index/inverse-ref
    /// entries the new row added, and restore the old row's.
    Update {
        class_id: ClassId,
        object_id: ObjectId,
        commit_version: Version,
        old_row: Vec<FieldValue>,
        new_row: Vec<FieldValue>,
    },
    /// Undo a delete: drop the pushed tombstone and, if the row existed,
    /// restore its index/inverse-ref entries.
    Delete { class_id: ClassId, object_id: ObjectId, commit_version: Version, old_row: Option<Vec<FieldValue>> },
    /// Undo a reference-array edit: drop the pushed version and restore the
    /// prior set of inverse-ref edges.
    RefArrayEdit {
        class_id: ClassId,
        object_id: ObjectId,
        commit_version: Version,
        field_id: u16,
        old_ids: Vec<ObjectId>,
        new_ids: Vec<ObjectId>,
    },
}

const LOG_STEM: &str = "log";
const SNAPSHOT_STEM: &str = "snap";
const DEFAULT_TXN_TIMEOUT: Duration = Duration::from_secs(30);

/// A running VeloxDB database, backed by one data directory.
///
/// Opening restores from the directory's snapshot and log (§4.8, §7);
/// closing is implicit — the process exiting cleanly loses nothing that
/// wasn't already durable, since every commit fsyncs (or joins a batch
/// that fsyncs) before returning.
pub struct Database {
    dir: PathBuf,
    config: VeloxConfig,
    registry: ClassRegistry,
    model: ModelManager,
    locks: LockManager,
    version_mgr: crate::version::VersionManager,
    gc: GarbageCollector,
    id_gen: IdGenerator,
    inverse_refs: InverseRefMap,
    committer: GroupCommitter,
    /// Auxiliary log streams declared via [`Self::create_log`] (§4.8
    /// "Multiple logs"). Every one of these must also acknowledge durability
    /// before a commit returns; they are independently framed and fsynced,
    /// keyed by log stem so a repeat `create_log` call is a no-op error
    /// rather than a silent duplicate stream.
    aux_committers: parking_lot::RwLock<Vec<(String, GroupCommitter)>>,
    next_txn_id: AtomicU64,
    replicator: Option<parking_lot::RwLock<Replicator<Box<dyn PeerLink>>>>,
}

impl Database {
    /// Open (or create) a database rooted at `dir`, restoring from its
    /// snapshot and log if present (§7).
    pub fn open(dir: impl AsRef<Path>) -> VeloxResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let config_path = dir.join(CONFIG_FILE_NAME);
        VeloxConfig::write_default_if_missing(&config_path)?;
        let config = VeloxConfig::from_file(&config_path)?;

        let state = velox_durability::restore(&dir, LOG_STEM, SNAPSHOT_STEM)?;
        if state.log_tail_was_torn {
            tracing::warn!(dir = %dir.display(), "opened with a torn trailing log frame; replayed up to the last intact commit");
        }

        let model = ModelManager::from_descriptors(state.descriptors);
        let inverse_refs = InverseRefMap::new();
        rebuild_indexes_and_inverse_refs(&model, &state.registry, &inverse_refs);

        let (wal, _frames, _torn) = WalWriter::open(&dir, LOG_STEM)?;
        let committer = GroupCommitter::new(wal, config.durability_mode()?.group_commit_config());

        tracing::info!(dir = %dir.display(), version = state.version.get(), "database opened");

        Ok(Self {
            dir,
            config,
            registry: state.registry,
            model,
            locks: LockManager::new(),
            version_mgr: crate::version::VersionManager::resume(state.version, 0),
            gc: GarbageCollector::new(),
            id_gen: state.id_gen,
            inverse_refs,
            committer,
            aux_committers: parking_lot::RwLock::new(Vec::new()),
            next_txn_id: AtomicU64::new(TXN_ID_BASE),
            replicator: None,
        })
    }

    /// Declare an additional, independently framed and fsynced log stream
    /// (§4.8 "Multiple logs", §6 create-log). Every future commit appends
    /// to it and waits for its durability alongside the primary log.
    /// Existing history is not backfilled into the new stream.
    pub fn create_log(&self, stem: &str) -> VeloxResult<()> {
        let mut aux = self.aux_committers.write();
        if aux.iter().any(|(s, _)| s == stem) {
            return Err(VeloxError::schema_incompatible(format!("log stream '{stem}' already exists")));
        }
        let (wal, _frames, _torn) = WalWriter::open(&self.dir, stem)?;
        let committer = GroupCommitter::new(wal, self.config.durability_mode()?.group_commit_config());
        aux.push((stem.to_string(), committer));
        Ok(())
    }

    /// Names of every auxiliary log stream currently declared.
    pub fn log_streams(&self) -> Vec<String> {
        self.aux_committers.read().iter().map(|(s, _)| s.clone()).collect()
    }

    /// Attach a replication link, e.g. after reading this node's role out
    /// of the cluster configuration (§4.10, §6). Replaces any previously
    /// attached link.
    pub fn attach_replicator(&mut self, replicator: Replicator<Box<dyn PeerLink>>) {
        self.replicator = Some(parking_lot::RwLock::new(replicator));
    }

    /// This node's current writer role, or [`None`] if no replication is
    /// configured (in which case this node is always authoritative).
    pub fn writer_role(&self) -> Option<velox_replication::WriterRole> {
        self.replicator.as_ref().map(|r| r.read().role())
    }

    /// Promote or demote this node's writer role, e.g. on a failover
    /// decision from the elector (§4.10).
    pub fn set_writer_role(&self, role: velox_replication::WriterRole) {
        if let Some(replicator) = &self.replicator {
            replicator.write().set_role(role);
        }
    }

    fn admit_write(&self) -> VeloxResult<()> {
        match &self.replicator {
            Some(replicator) => replicator.read().admit_write(),
            None => Ok(()),
        }
    }

    /// The data directory this database was opened from.
    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    /// The loaded configuration.
    pub fn config(&self) -> &VeloxConfig {
        &self.config
    }

    /// The class/property/index catalog.
    pub fn model(&self) -> &ModelManager {
        &self.model
    }

    /// The garbage collector.
    pub fn gc(&self) -> &GarbageCollector {
        &self.gc
    }

    /// The version sequencer.
    pub fn version_manager(&self) -> &crate::version::VersionManager {
        &self.version_mgr
    }

    // ---------------------------------------------------------------
    // Transaction lifecycle
    // ---------------------------------------------------------------

    /// Begin a transaction with the default deadline.
    pub fn begin(&self) -> Transaction {
        self.begin_with_timeout(DEFAULT_TXN_TIMEOUT)
    }

    /// Begin a transaction that must commit or abort within `timeout`.
    pub fn begin_with_timeout(&self, timeout: Duration) -> Transaction {
        let txn_id = self.fresh_txn_id();
        let read_version = self.version_mgr.current_read_version();
        self.gc.register_reader(txn_id, read_version);
        Transaction::with_deadline(txn_id, read_version, timeout)
    }

    fn fresh_txn_id(&self) -> TxnId {
        TxnId::new(self.next_txn_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a new object, staging its first version and deferring
    /// reference/uniqueness checks to commit time (§4.1, §4.2, §4.3).
    pub fn create(&self, txn: &mut Transaction, class_id: ClassId, fields: Vec<FieldValue>) -> VeloxResult<ObjectId> {
        self.admit_write()?;
        txn.acquire(&self.locks, ResourceKey::Class(class_id), LockMode::Shared)?;
        let descriptor = self.require_descriptor(class_id)?;
        let store = self.require_store(class_id)?;
        let _records = self.require_records(&store, class_id)?;

        if fields.len() != descriptor.properties.len() {
            return Err(VeloxError::schema_incompatible(format!(
                "class {class_id:?} declares {} properties, got {} field values",
                descriptor.properties.len(),
                fields.len()
            )));
        }
        for prop in &descriptor.properties {
            if prop.required && fields[prop.field_id as usize].is_null() {
                return Err(VeloxError::schema_incompatible(format!(
                    "field {} on class {class_id:?} is required",
                    prop.name
                )));
            }
        }

        let object_id = self.id_gen.allocate()?;

        for index_desc in &descriptor.indexes {
            let key = encode_key(&key_tuple(&fields, &index_desc.key_fields)?);
            txn.acquire(&self.locks, ResourceKey::HashKey(key.clone()), LockMode::Exclusive)?;
            if index_desc.unique {
                txn.defer_check(DeferredCheck::UniqueKeyAvailable {
                    index_name: index_desc.name.clone(),
                    key,
                    object_id,
                });
            }
        }

        txn.acquire(&self.locks, ResourceKey::Object(object_id), LockMode::Exclusive)?;

        for prop in &descriptor.properties {
            if prop.property_type.is_reference() {
                for target in fields[prop.field_id as usize].referenced_ids() {
                    txn.defer_check(DeferredCheck::ReferenceTargetExists {
                        class_id,
                        field_id: prop.field_id,
                        target,
                    });
                }
            }
        }

        txn.record(Operation::Create { class_id, object_id, fields });
        Ok(object_id)
    }

    /// Update a subset of an existing object's fields (§4.1).
    pub fn update(
        &self,
        txn: &mut Transaction,
        class_id: ClassId,
        object_id: ObjectId,
        changes: Vec<(u16, FieldValue)>,
    ) -> VeloxResult<()> {
        self.admit_write()?;
        txn.acquire(&self.locks, ResourceKey::Class(class_id), LockMode::Shared)?;
        let descriptor = self.require_descriptor(class_id)?;
        let store = self.require_store(class_id)?;
        let records = self.require_records(&store, class_id)?;

        self.check_write_conflict(&records, class_id, object_id, txn.read_version)?;
        let current = records
            .read_head(object_id)
            .ok_or_else(|| VeloxError::transaction_not_allowed(format!("object {object_id:?} does not exist")))?;

        for index_desc in &descriptor.indexes {
            if !index_desc.key_fields.iter().any(|fid| changes.iter().any(|(cid, _)| cid == fid)) {
                continue;
            }
            let mut proposed = current.clone();
            for (field_id, value) in &changes {
                apply_field(&mut proposed, *field_id, value.clone());
            }
            let old_key = encode_key(&key_tuple(&current, &index_desc.key_fields)?);
            let new_key = encode_key(&key_tuple(&proposed, &index_desc.key_fields)?);
            txn.acquire(&self.locks, ResourceKey::HashKey(old_key.clone()), LockMode::Exclusive)?;
            if new_key != old_key {
                txn.acquire(&self.locks, ResourceKey::HashKey(new_key.clone()), LockMode::Exclusive)?;
            }
            if index_desc.unique {
                txn.defer_check(DeferredCheck::UniqueKeyAvailable {
                    index_name: index_desc.name.clone(),
                    key: new_key,
                    object_id,
                });
            }
        }

        txn.acquire(&self.locks, ResourceKey::Object(object_id), LockMode::Exclusive)?;

        for (field_id, value) in &changes {
            if let Some(prop) = descriptor.property(*field_id) {
                if prop.property_type.is_reference() {
                    for target in value.referenced_ids() {
                        txn.defer_check(DeferredCheck::ReferenceTargetExists {
                            class_id,
                            field_id: *field_id,
                            target,
                        });
                    }
                }
            }
        }

        txn.record(Operation::Update { class_id, object_id, fields: changes });
        Ok(())
    }

    /// Apply structural edits to a reference-array field (§4.1).
    pub fn edit_ref_array(
        &self,
        txn: &mut Transaction,
        class_id: ClassId,
        object_id: ObjectId,
        field_id: u16,
        edits: Vec<RefArrayEdit>,
    ) -> VeloxResult<()> {
        self.admit_write()?;
        txn.acquire(&self.locks, ResourceKey::Class(class_id), LockMode::Shared)?;
        let descriptor = self.require_descriptor(class_id)?;
        let store = self.require_store(class_id)?;
        let records = self.require_records(&store, class_id)?;

        let prop = descriptor
            .property(field_id)
            .ok_or_else(|| VeloxError::schema_incompatible(format!("class {class_id:?} has no field {field_id}")))?;
        if !matches!(prop.property_type, PropertyType::ReferenceArray { .. }) {
            return Err(VeloxError::schema_incompatible(format!(
                "field {field_id} on class {class_id:?} is not a reference array"
            )));
        }
        let delete_policy = prop.delete_policy.unwrap_or(DeletePolicy::PreventDelete);

        self.check_write_conflict(&records, class_id, object_id, txn.read_version)?;
        txn.acquire(&self.locks, ResourceKey::Object(object_id), LockMode::Exclusive)?;

        if prop.tracked {
            for edit in &edits {
                match edit {
                    RefArrayEdit::Insert { id, .. } | RefArrayEdit::Replace { id, .. } => {
                        txn.defer_check(DeferredCheck::ReferenceTargetExists { class_id, field_id, target: *id });
                    }
                    RefArrayEdit::SetAll { ids } => {
                        for id in ids {
                            txn.defer_check(DeferredCheck::ReferenceTargetExists { class_id, field_id, target: *id });
                        }
                    }
                    RefArrayEdit::RemoveAt { .. } => {}
                }
            }
        }

        txn.record(Operation::RefArrayEdit { class_id, object_id, field_id, edits, delete_policy });
        Ok(())
    }

    /// Delete an object, cascading or clearing references per the declared
    /// delete policy of every tracked reference that points at it,
    /// transitively (§4.3).
    pub fn delete(&self, txn: &mut Transaction, class_id: ClassId, object_id: ObjectId) -> VeloxResult<()> {
        self.admit_write()?;
        let mut visited = HashSet::new();
        let mut locked_classes = HashSet::new();
        let mut worklist = vec![(class_id, object_id)];
        let mut to_delete = Vec::new();
        let mut to_clear: Vec<(RefSlot, ObjectId, ObjectId)> = Vec::new();

        while let Some((cid, oid)) = worklist.pop() {
            if !visited.insert((cid, oid)) {
                continue;
            }
            if locked_classes.insert(cid) {
                txn.acquire(&self.locks, ResourceKey::Class(cid), LockMode::Shared)?;
            }
            txn.acquire(&self.locks, ResourceKey::Object(oid), LockMode::Exclusive)?;

            if cid == class_id && oid == object_id {
                let store = self.require_store(cid)?;
                let records = self.require_records(&store, cid)?;
                self.check_write_conflict(&records, cid, oid, txn.read_version)?;
            }

            let plan = integrity::plan_delete(&self.model, &self.inverse_refs, cid, oid)?;
            to_delete.push((cid, oid));
            worklist.extend(plan.cascade);
            for (slot, source) in plan.clear {
                txn.acquire(&self.locks, ResourceKey::Class(slot.class_id), LockMode::Shared)?;
                txn.acquire(&self.locks, ResourceKey::Object(source), LockMode::Exclusive)?;
                to_clear.push((slot, source, oid));
            }
        }

        for (cid, oid) in &to_delete {
            txn.record(Operation::Delete { class_id: *cid, object_id: *oid });
        }

        for (slot, source, target) in &to_clear {
            let descriptor = self.require_descriptor(slot.class_id)?;
            let prop = descriptor.property(slot.field_id).ok_or_else(|| {
                VeloxError::fatal(format!("delete plan named unknown field {}.{}", slot.class_id.get(), slot.field_id))
            })?;
            let store = self.require_store(slot.class_id)?;
            let records = self.require_records(&store, slot.class_id)?;
            let row = records
                .read_head(*source)
                .ok_or_else(|| VeloxError::fatal(format!("delete plan named a source row that no longer exists")))?;

            match &prop.property_type {
                PropertyType::Reference { .. } => {
                    if prop.required {
                        return Err(VeloxError::referential_integrity_violation(
                            slot.class_id,
                            *source,
                            "SetToNull cannot null out a required reference",
                        ));
                    }
                    txn.record(Operation::Update {
                        class_id: slot.class_id,
                        object_id: *source,
                        fields: vec![(slot.field_id, FieldValue::Reference(None))],
                    });
                }
                PropertyType::ReferenceArray { .. } => {
                    let ids = match row.get(slot.field_id as usize) {
                        Some(FieldValue::ReferenceArray(ids)) => ids.clone(),
                        _ => Vec::new(),
                    };
                    let mut edits = Vec::new();
                    for (index, id) in ids.iter().enumerate().rev() {
                        if id == target {
                            edits.push(RefArrayEdit::RemoveAt { at: index as u32 });
                        }
                    }
                    if !edits.is_empty() {
                        txn.record(Operation::RefArrayEdit {
                            class_id: slot.class_id,
                            object_id: *source,
                            field_id: slot.field_id,
                            edits,
                            delete_policy: DeletePolicy::SetToNull,
                        });
                    }
                }
                _ => {
                    return Err(VeloxError::fatal(format!(
                        "SetToNull declared on non-reference field {}.{}",
                        slot.class_id.get(),
                        slot.field_id
                    )))
                }
            }
        }

        Ok(())
    }

    /// Read one object at the transaction's snapshot version, overlaid with
    /// this transaction's own pending writes (§4.5: "a reader inside a
    /// writer always observes that writer's pending state as if already
    /// committed").
    pub fn get(&self, txn: &Transaction, class_id: ClassId, object_id: ObjectId) -> VeloxResult<Option<Vec<FieldValue>>> {
        let store = self.require_store(class_id)?;
        let records = self.require_records(&store, class_id)?;
        let base = records.snapshot(txn.read_version).read(class_id, object_id)?;
        Ok(overlay_row(txn, class_id, object_id, base))
    }

    /// Every live id in `class_id` at the transaction's snapshot version,
    /// with this transaction's own pending creates/deletes folded in
    /// (§4.5).
    pub fn scan(&self, txn: &Transaction, class_id: ClassId) -> VeloxResult<Vec<ObjectId>> {
        let store = self.require_store(class_id)?;
        let records = self.require_records(&store, class_id)?;
        let snapshot = records.snapshot(txn.read_version);
        let mut visible: Vec<ObjectId> = snapshot.scan(class_id)?;

        for object_id in pending_ids_touched(txn, class_id) {
            let base = snapshot.read(class_id, object_id)?;
            let still_live = overlay_row(txn, class_id, object_id, base).is_some();
            let already_listed = visible.contains(&object_id);
            if still_live && !already_listed {
                visible.push(object_id);
            } else if !still_live && already_listed {
                visible.retain(|id| *id != object_id);
            }
        }
        Ok(visible)
    }

    /// Look up ids matching `key` in a declared hash index. Falls back to a
    /// full class scan while the index is refilling in the background
    /// (§4.2). Either path is overlaid with this transaction's own pending
    /// writes, since staged index entries are not applied to the table
    /// itself until commit (§4.2: "lookups see a consistent view including
    /// the transaction's own pending writes").
    pub fn lookup(&self, txn: &Transaction, class_id: ClassId, index_name: &str, key: &[FieldValue]) -> VeloxResult<Vec<ObjectId>> {
        let descriptor = self.require_descriptor(class_id)?;
        let store = self.require_store(class_id)?;
        let index_desc = descriptor
            .indexes
            .iter()
            .find(|i| i.name == index_name)
            .ok_or_else(|| VeloxError::schema_incompatible(format!("class {class_id:?} has no index {index_name}")))?;
        let index = store
            .indexes
            .get(index_name)
            .ok_or_else(|| VeloxError::fatal(format!("index {index_name} declared but not materialized")))?;

        let target = encode_key(key);

        if index.is_refilling() {
            let mut matches = Vec::new();
            for object_id in self.scan(txn, class_id)? {
                if let Some(row) = self.get(txn, class_id, object_id)? {
                    if let Ok(tuple) = key_tuple(&row, &index_desc.key_fields) {
                        if encode_key(&tuple) == target {
                            matches.push(object_id);
                        }
                    }
                }
            }
            return Ok(matches);
        }

        let mut matches = index.lookup(&target);
        let records = self.require_records(&store, class_id)?;
        for object_id in pending_ids_touched(txn, class_id) {
            let base = records.snapshot(txn.read_version).read(class_id, object_id)?;
            let now_matches = overlay_row(txn, class_id, object_id, base)
                .as_ref()
                .and_then(|row| key_tuple(row, &index_desc.key_fields).ok())
                .is_some_and(|tuple| encode_key(&tuple) == target);
            let already_listed = matches.contains(&object_id);
            if now_matches && !already_listed {
                matches.push(object_id);
            } else if !now_matches && already_listed {
                matches.retain(|id| *id != object_id);
            }
        }
        Ok(matches)
    }

    /// Validate, append, and publish a transaction's changeset (§4.5, §4.6).
    pub fn commit(&self, mut txn: Transaction) -> VeloxResult<Version> {
        let result = self.commit_inner(&mut txn);
        self.gc.unregister_reader(txn.txn_id);
        txn.release_locks(&self.locks);
        result
    }

    fn commit_inner(&self, txn: &mut Transaction) -> VeloxResult<Version> {
        txn.begin_validation()?;

        if txn.is_read_only() {
            let version = self.version_mgr.current_read_version();
            txn.mark_committed(version);
            return Ok(version);
        }

        if let Err(e) = self.resolve_deferred_checks(txn) {
            txn.mark_aborted(e.to_string());
            return Err(e);
        }

        let fence = self.version_mgr.enter_commit_fence();
        let commit_version = fence.version();

        let undo = match self.apply_changeset(txn.changeset(), commit_version) {
            Ok(undo) => undo,
            Err(e) => {
                drop(fence);
                txn.mark_aborted(e.to_string());
                return Err(VeloxError::fatal(format!("changeset apply failed after version fence was entered: {e}")));
            }
        };

        // Everything from here on can still fail. The changeset is already
        // applied to the stores (in fence order, so other committers' views
        // stay consistent with the version counter) but not yet durable: any
        // failure below must undo it before returning, or the next
        // transaction to commit would publish a higher version and expose
        // this one's never-durable, never-replicated writes to readers
        // (§4.5: "Aborting -> Completed after staged mutations are undone").
        let append_result = self.committer.append(commit_version, txn.changeset().clone());
        drop(fence);
        let sequence = match append_result {
            Ok(s) => s,
            Err(e) => {
                self.revert_changeset(&undo);
                txn.mark_aborted(e.to_string());
                return Err(e);
            }
        };
        if let Err(e) = self.committer.wait_for_durability(sequence) {
            self.revert_changeset(&undo);
            txn.mark_aborted(e.to_string());
            return Err(e);
        }

        for (_, aux) in self.aux_committers.read().iter() {
            if let Err(e) = aux.commit(commit_version, txn.changeset().clone()) {
                self.revert_changeset(&undo);
                txn.mark_aborted(e.to_string());
                return Err(e);
            }
        }

        if let Some(replicator) = &self.replicator {
            if let Err(e) = replicator.read().replicate(commit_version, txn.changeset().clone()) {
                self.revert_changeset(&undo);
                txn.mark_aborted(e.to_string());
                return Err(e);
            }
        }

        self.version_mgr.publish(commit_version);
        txn.mark_committed(commit_version);
        Ok(commit_version)
    }

    /// Abandon a transaction, releasing its locks and reservation without
    /// applying anything it recorded.
    pub fn rollback(&self, mut txn: Transaction) {
        if matches!(txn.status(), TransactionStatus::Active | TransactionStatus::Validating) {
            txn.mark_aborted("rolled back by caller");
        }
        self.gc.unregister_reader(txn.txn_id);
        txn.release_locks(&self.locks);
    }

    // ---------------------------------------------------------------
    // Model updates (§4.9)
    // ---------------------------------------------------------------

    /// Declare a new class.
    pub fn add_class(&self, descriptor: ClassDescriptor) -> VeloxResult<()> {
        let class_id = descriptor.class_id;
        self.with_exclusive_class_lock(class_id, || self.model.add_class(&self.registry, descriptor))
    }

    /// Delete a class, provided it holds no live instances.
    pub fn delete_class(&self, class_id: ClassId) -> VeloxResult<()> {
        self.with_exclusive_class_lock(class_id, || self.model.delete_class(&self.registry, class_id))
    }

    /// Add a property to a class.
    pub fn add_property(&self, class_id: ClassId, property: PropertyDescriptor) -> VeloxResult<()> {
        self.with_exclusive_class_lock(class_id, || self.model.add_property(&self.registry, class_id, property))
    }

    /// Remove a property from a class.
    pub fn remove_property(&self, class_id: ClassId, field_id: u16) -> VeloxResult<()> {
        self.with_exclusive_class_lock(class_id, || self.model.remove_property(&self.registry, class_id, field_id))
    }

    /// Flip whether a reference property is tracked by the inverse map.
    pub fn set_reference_tracked(&self, class_id: ClassId, field_id: u16, tracked: bool) -> VeloxResult<()> {
        self.with_exclusive_class_lock(class_id, || {
            self.model.set_reference_tracked(&self.registry, class_id, field_id, tracked)
        })
    }

    /// Declare a hash index, refilling it in the background if needed.
    pub fn add_hash_index(&self, class_id: ClassId, index: HashIndexDescriptor) -> VeloxResult<()> {
        let current_visible = self.version_mgr.current_read_version();
        self.with_exclusive_class_lock(class_id, || {
            self.model.add_hash_index(&self.registry, &self.gc, class_id, current_visible, index)
        })
    }

    /// Remove a declared hash index.
    pub fn remove_hash_index(&self, class_id: ClassId, name: &str) -> VeloxResult<()> {
        self.with_exclusive_class_lock(class_id, || self.model.remove_hash_index(&self.registry, class_id, name))
    }

    /// Evolve a class descriptor to a type-compatible widening.
    pub fn widen_class(&self, class_id: ClassId, proposed: ClassDescriptor) -> VeloxResult<()> {
        self.with_exclusive_class_lock(class_id, || self.model.widen_class(&self.registry, class_id, proposed))
    }

    /// The current descriptor for a class, if declared.
    pub fn descriptor(&self, class_id: ClassId) -> Option<Arc<ClassDescriptor>> {
        self.model.descriptor(class_id)
    }

    fn with_exclusive_class_lock<T>(&self, class_id: ClassId, f: impl FnOnce() -> VeloxResult<T>) -> VeloxResult<T> {
        let txn_id = self.fresh_txn_id();
        if !self.locks.try_acquire(ResourceKey::Class(class_id), txn_id, LockMode::Exclusive) {
            return Err(VeloxError::conflict_with_schema_update(class_id));
        }
        let result = f();
        self.locks.release(&ResourceKey::Class(class_id), txn_id);
        result
    }

    // ---------------------------------------------------------------
    // Durability maintenance (§4.7, §4.8)
    // ---------------------------------------------------------------

    /// Drain reclaimable versions, write a fresh snapshot to the inactive
    /// letter, and rotate the log onto a new empty file (§4.8). The caller
    /// is responsible for ensuring no commit is concurrently in flight.
    pub fn checkpoint(&self) -> VeloxResult<Version> {
        let current_visible = self.version_mgr.current_read_version();
        self.gc.drain(&self.registry, current_visible);

        let header = ActiveHeader::load_or_default(&self.dir)?;
        let snapshot_letter = header.snapshot.other();
        let descriptors = self.model.all_descriptors();
        let data = SnapshotWriter::collect(current_visible, descriptors, &self.registry, self.id_gen.last_allocated());
        SnapshotWriter::write(&self.dir, SNAPSHOT_STEM, snapshot_letter, &data)?;

        self.committer.rotate(snapshot_letter)?;
        tracing::info!(version = current_visible.get(), "checkpoint complete");
        Ok(current_visible)
    }

    /// Discard every commit after `target`, reverting the database to
    /// exactly the state visible at that version (§4.6 rewind, §6
    /// fail-over). The caller must ensure no transaction is concurrently
    /// committing; this is an administrative operation, not one a live
    /// workload triggers on itself.
    ///
    /// Truncates every class's version chains above `target`, rebuilds
    /// every hash index and the inverse-reference map from what survives,
    /// resets id allocation to the highest surviving id (ids discarded by
    /// the rewind never became durable past this point, so reusing them is
    /// safe), bumps the local term so any deferred check issued before the
    /// rewind can be told apart from a fresh one, and writes a new snapshot
    /// so a restart never replays the discarded tail again.
    pub fn rewind(&self, target: Version) -> VeloxResult<Version> {
        for class_id in self.registry.class_ids() {
            if let Some(store) = self.registry.get(class_id) {
                if let Some(records) = &store.records {
                    records.truncate_above(target);
                }
                for entry in store.indexes.iter() {
                    entry.value().clear();
                }
            }
        }
        self.inverse_refs.clear();
        rebuild_indexes_and_inverse_refs(&self.model, &self.registry, &self.inverse_refs);

        let mut max_id = 0u64;
        for class_id in self.registry.class_ids() {
            if let Some(records) = self.registry.get(class_id).and_then(|store| store.records.clone()) {
                for id in records.all_ids() {
                    max_id = max_id.max(id.get());
                }
            }
        }
        self.id_gen.reset_to(max_id);

        let term = self.version_mgr.rewind(target);

        let header = ActiveHeader::load_or_default(&self.dir)?;
        let snapshot_letter = header.snapshot.other();
        let descriptors = self.model.all_descriptors();
        let data = SnapshotWriter::collect(target, descriptors, &self.registry, self.id_gen.last_allocated());
        SnapshotWriter::write(&self.dir, SNAPSHOT_STEM, snapshot_letter, &data)?;
        self.committer.rotate(snapshot_letter)?;

        tracing::warn!(target = target.get(), term, "database rewound");
        Ok(target)
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn require_descriptor(&self, class_id: ClassId) -> VeloxResult<Arc<ClassDescriptor>> {
        self.model
            .descriptor(class_id)
            .ok_or_else(|| VeloxError::schema_incompatible(format!("class {class_id:?} is not declared")))
    }

    fn require_store(&self, class_id: ClassId) -> VeloxResult<Arc<ClassStore>> {
        self.registry
            .get(class_id)
            .ok_or_else(|| VeloxError::schema_incompatible(format!("class {class_id:?} has no storage")))
    }

    fn require_records(&self, store: &Arc<ClassStore>, class_id: ClassId) -> VeloxResult<Arc<ClassRecordStore>> {
        store
            .records
            .clone()
            .ok_or_else(|| VeloxError::schema_incompatible(format!("class {class_id:?} is abstract")))
    }

    fn check_write_conflict(
        &self,
        records: &ClassRecordStore,
        class_id: ClassId,
        object_id: ObjectId,
        read_version: Version,
    ) -> VeloxResult<()> {
        if let Some(head) = records.head_version(object_id) {
            if head.get() > read_version.get() {
                return Err(VeloxError::transaction_conflict(Some(class_id), Some(object_id)));
            }
        }
        Ok(())
    }

    /// Whether `object_id` is live, taking `txn`'s own not-yet-committed
    /// operations into account (§4.3 deferred-check resolution runs before
    /// this transaction's changeset has been applied to the store, so a
    /// target created or resurrected earlier in the same transaction must
    /// still count as live).
    fn object_is_live(&self, txn: &Transaction, class_id: ClassId, object_id: ObjectId) -> bool {
        if let Some(op) = txn
            .changeset()
            .operations
            .iter()
            .rev()
            .find(|op| op.class_id() == class_id && op.object_id() == object_id)
        {
            return !matches!(op, Operation::Delete { .. });
        }
        self.registry
            .get(class_id)
            .and_then(|store| store.records.clone())
            .is_some_and(|records| records.read_head(object_id).is_some())
    }

    fn find_index(&self, index_name: &str) -> Option<Arc<HashIndex>> {
        for class_id in self.registry.class_ids() {
            if let Some(store) = self.registry.get(class_id) {
                if let Some(index) = store.indexes.get(index_name) {
                    return Some(index.clone());
                }
            }
        }
        None
    }

    fn resolve_deferred_checks(&self, txn: &Transaction) -> VeloxResult<()> {
        for check in txn.deferred_checks() {
            match check {
                DeferredCheck::ReferenceTargetExists { class_id, field_id, target } => {
                    let descriptor = self.require_descriptor(*class_id)?;
                    let prop = descriptor.property(*field_id).ok_or_else(|| {
                        VeloxError::schema_incompatible(format!("field {field_id} missing on class {class_id:?}"))
                    })?;
                    let target_class = match &prop.property_type {
                        PropertyType::Reference { target } | PropertyType::ReferenceArray { target } => *target,
                        _ => {
                            return Err(VeloxError::schema_incompatible(format!(
                                "field {field_id} on class {class_id:?} is not a reference"
                            )))
                        }
                    };
                    if !self.object_is_live(txn, target_class, *target) {
                        return Err(VeloxError::referential_integrity_violation(
                            *class_id,
                            *target,
                            format!("dangling reference: {target:?} does not exist in class {target_class:?}"),
                        ));
                    }
                }
                DeferredCheck::UniqueKeyAvailable { index_name, key, object_id } => {
                    let index = self
                        .find_index(index_name)
                        .ok_or_else(|| VeloxError::schema_incompatible(format!("index {index_name} not found")))?;
                    if index.has_other_occupant(key, *object_id) {
                        return Err(VeloxError::uniqueness_violation(index_name.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply every operation in `changeset` at `commit_version`, returning
    /// enough per-operation undo state to reverse all of it via
    /// [`Self::revert_changeset`] if a later commit stage fails.
    fn apply_changeset(&self, changeset: &ChangeSet, commit_version: Version) -> VeloxResult<Vec<Undo>> {
        changeset.operations.iter().map(|op| self.apply_operation(op, commit_version)).collect()
    }

    fn apply_operation(&self, op: &Operation, commit_version: Version) -> VeloxResult<Undo> {
        match op {
            Operation::Create { class_id, object_id, fields } => {
                let store = self.require_store(*class_id)?;
                let records = self.require_records(&store, *class_id)?;
                let descriptor = self.require_descriptor(*class_id)?;
                records.create(*class_id, *object_id, commit_version, fields.clone())?;
                self.index_insert_row(&store, &descriptor, *object_id, fields);
                self.retrack_references(&descriptor, *class_id, *object_id, fields, true);
                Ok(Undo::Create { class_id: *class_id, object_id: *object_id, commit_version, fields: fields.clone() })
            }
            Operation::Update { class_id, object_id, fields } => {
                let store = self.require_store(*class_id)?;
                let records = self.require_records(&store, *class_id)?;
                let descriptor = self.require_descriptor(*class_id)?;
                let old_row = records.read_head(*object_id).unwrap_or_default();
                let mut new_row = old_row.clone();
                for (field_id, value) in fields {
                    apply_field(&mut new_row, *field_id, value.clone());
                }
                self.index_remove_row(&store, &descriptor, *object_id, &old_row);
                self.retrack_references(&descriptor, *class_id, *object_id, &old_row, false);
                records.update(*class_id, *object_id, commit_version, new_row.clone())?;
                self.index_insert_row(&store, &descriptor, *object_id, &new_row);
                self.retrack_references(&descriptor, *class_id, *object_id, &new_row, true);
                Ok(Undo::Update { class_id: *class_id, object_id: *object_id, commit_version, old_row, new_row })
            }
            Operation::Delete { class_id, object_id } => {
                let store = self.require_store(*class_id)?;
                let records = self.require_records(&store, *class_id)?;
                let descriptor = self.require_descriptor(*class_id)?;
                let existing = records.read_head(*object_id);
                if let Some(old_row) = &existing {
                    self.index_remove_row(&store, &descriptor, *object_id, old_row);
                    self.retrack_references(&descriptor, *class_id, *object_id, old_row, false);
                }
                records.delete(*class_id, *object_id, commit_version)?;
                Ok(Undo::Delete { class_id: *class_id, object_id: *object_id, commit_version, old_row: existing })
            }
            Operation::RefArrayEdit { class_id, object_id, field_id, edits, .. } => {
                let store = self.require_store(*class_id)?;
                let records = self.require_records(&store, *class_id)?;
                let descriptor = self.require_descriptor(*class_id)?;
                let mut row = records.read_head(*object_id).unwrap_or_default();
                let idx = *field_id as usize;
                if idx >= row.len() {
                    row.resize(idx + 1, FieldValue::ReferenceArray(Vec::new()));
                }
                let old_ids = match &row[idx] {
                    FieldValue::ReferenceArray(ids) => ids.clone(),
                    _ => Vec::new(),
                };
                let mut ids = old_ids.clone();
                for edit in edits {
                    apply_ref_array_edit(&mut ids, edit);
                }
                row[idx] = FieldValue::ReferenceArray(ids.clone());

                if let Some(prop) = descriptor.property(*field_id) {
                    if prop.tracked {
                        let slot = RefSlot { class_id: *class_id, field_id: *field_id };
                        for old_id in &old_ids {
                            self.inverse_refs.remove_edge(slot, *old_id, *object_id);
                        }
                        for new_id in &ids {
                            self.inverse_refs.add_edge(slot, *new_id, *object_id);
                        }
                    }
                }
                records.update(*class_id, *object_id, commit_version, row)?;
                Ok(Undo::RefArrayEdit {
                    class_id: *class_id,
                    object_id: *object_id,
                    commit_version,
                    field_id: *field_id,
                    old_ids,
                    new_ids: ids,
                })
            }
        }
    }

    /// Reverse every operation an aborted commit already applied to the
    /// stores, in reverse order, so the failure is invisible to every later
    /// reader (§4.5). Called only for a transaction whose locks are still
    /// held, so every resource it touched is guaranteed unchanged since
    /// `apply_changeset` ran.
    fn revert_changeset(&self, undo: &[Undo]) {
        for entry in undo.iter().rev() {
            self.revert_operation(entry);
        }
    }

    fn revert_operation(&self, undo: &Undo) {
        match undo {
            Undo::Create { class_id, object_id, commit_version, fields } => {
                if let (Ok(store), Ok(descriptor)) = (self.require_store(*class_id), self.require_descriptor(*class_id)) {
                    self.index_remove_row(&store, &descriptor, *object_id, fields);
                    self.retrack_references(&descriptor, *class_id, *object_id, fields, false);
                    if let Some(records) = &store.records {
                        records.revert_head(*object_id, *commit_version);
                    }
                }
            }
            Undo::Update { class_id, object_id, commit_version, old_row, new_row } => {
                if let (Ok(store), Ok(descriptor)) = (self.require_store(*class_id), self.require_descriptor(*class_id)) {
                    self.index_remove_row(&store, &descriptor, *object_id, new_row);
                    self.retrack_references(&descriptor, *class_id, *object_id, new_row, false);
                    if let Some(records) = &store.records {
                        records.revert_head(*object_id, *commit_version);
                    }
                    self.index_insert_row(&store, &descriptor, *object_id, old_row);
                    self.retrack_references(&descriptor, *class_id, *object_id, old_row, true);
                }
            }
            Undo::Delete { class_id, object_id, commit_version, old_row } => {
                if let (Ok(store), Ok(descriptor)) = (self.require_store(*class_id), self.require_descriptor(*class_id)) {
                    if let Some(records) = &store.records {
                        records.revert_head(*object_id, *commit_version);
                    }
                    if let Some(old_row) = old_row {
                        self.index_insert_row(&store, &descriptor, *object_id, old_row);
                        self.retrack_references(&descriptor, *class_id, *object_id, old_row, true);
                    }
                }
            }
            Undo::RefArrayEdit { class_id, object_id, commit_version, field_id, old_ids, new_ids } => {
                if let Ok(descriptor) = self.require_descriptor(*class_id) {
                    if descriptor.property(*field_id).is_some_and(|p| p.tracked) {
                        let slot = RefSlot { class_id: *class_id, field_id: *field_id };
                        for id in new_ids {
                            self.inverse_refs.remove_edge(slot, *id, *object_id);
                        }
                        for id in old_ids {
                            self.inverse_refs.add_edge(slot, *id, *object_id);
                        }
                    }
                }
                if let Some(records) = self.require_store(*class_id).ok().and_then(|store| store.records.clone()) {
                    records.revert_head(*object_id, *commit_version);
                }
            }
        }
    }

    fn retrack_references(&self, descriptor: &ClassDescriptor, class_id: ClassId, object_id: ObjectId, row: &[FieldValue], adding: bool) {
        for prop in &descriptor.properties {
            if !prop.tracked || !prop.property_type.is_reference() {
                continue;
            }
            let Some(value) = row.get(prop.field_id as usize) else { continue };
            let slot = RefSlot { class_id, field_id: prop.field_id };
            for target in value.referenced_ids() {
                if adding {
                    self.inverse_refs.add_edge(slot, target, object_id);
                } else {
                    self.inverse_refs.remove_edge(slot, target, object_id);
                }
            }
        }
    }

    fn index_insert_row(&self, store: &ClassStore, descriptor: &ClassDescriptor, object_id: ObjectId, row: &[FieldValue]) {
        for index_desc in &descriptor.indexes {
            if let Some(index) = store.indexes.get(&index_desc.name) {
                if let Ok(tuple) = key_tuple(row, &index_desc.key_fields) {
                    index.insert(encode_key(&tuple), object_id);
                }
            }
        }
    }

    fn index_remove_row(&self, store: &ClassStore, descriptor: &ClassDescriptor, object_id: ObjectId, row: &[FieldValue]) {
        for index_desc in &descriptor.indexes {
            if let Some(index) = store.indexes.get(&index_desc.name) {
                if let Ok(tuple) = key_tuple(row, &index_desc.key_fields) {
                    index.remove(&encode_key(&tuple), object_id);
                }
            }
        }
    }
}

/// Fold `txn`'s own pending operations for `(class_id, object_id)` onto
/// `base` (the committed row visible at `txn.read_version`, if any),
/// producing the row this transaction itself would see (§4.2, §4.5).
/// `None` means deleted or never created, either by the base snapshot or by
/// a pending `Delete` later in the same changeset.
fn overlay_row(txn: &Transaction, class_id: ClassId, object_id: ObjectId, base: Option<Vec<FieldValue>>) -> Option<Vec<FieldValue>> {
    let mut row = base;
    for op in &txn.changeset().operations {
        if op.class_id() != class_id || op.object_id() != object_id {
            continue;
        }
        match op {
            Operation::Create { fields, .. } => row = Some(fields.clone()),
            Operation::Update { fields, .. } => {
                let mut r = row.take().unwrap_or_default();
                for (field_id, value) in fields {
                    apply_field(&mut r, *field_id, value.clone());
                }
                row = Some(r);
            }
            Operation::Delete { .. } => row = None,
            Operation::RefArrayEdit { field_id, edits, .. } => {
                let mut r = row.take().unwrap_or_default();
                let idx = *field_id as usize;
                if idx >= r.len() {
                    r.resize(idx + 1, FieldValue::ReferenceArray(Vec::new()));
                }
                let mut ids = match &r[idx] {
                    FieldValue::ReferenceArray(ids) => ids.clone(),
                    _ => Vec::new(),
                };
                for edit in edits {
                    apply_ref_array_edit(&mut ids, edit);
                }
                r[idx] = FieldValue::ReferenceArray(ids);
                row = Some(r);
            }
        }
    }
    row
}

/// Every distinct object id this transaction's changeset has touched within
/// `class_id` so far, in unspecified order. Used to overlay `scan`/`lookup`
/// against a transaction's own pending writes without re-scanning the whole
/// changeset per id.
fn pending_ids_touched(txn: &Transaction, class_id: ClassId) -> Vec<ObjectId> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for op in &txn.changeset().operations {
        if op.class_id() == class_id && seen.insert(op.object_id()) {
            ids.push(op.object_id());
        }
    }
    ids
}

fn apply_field(row: &mut Vec<FieldValue>, field_id: u16, value: FieldValue) {
    let idx = field_id as usize;
    if idx >= row.len() {
        row.resize(idx + 1, FieldValue::Null);
    }
    row[idx] = value;
}

fn apply_ref_array_edit(ids: &mut Vec<ObjectId>, edit: &RefArrayEdit) {
    match edit {
        RefArrayEdit::Insert { at, id } => {
            let at = (*at as usize).min(ids.len());
            ids.insert(at, *id);
        }
        RefArrayEdit::RemoveAt { at } => {
            if (*at as usize) < ids.len() {
                ids.remove(*at as usize);
            }
        }
        RefArrayEdit::Replace { at, id } => {
            if let Some(slot) = ids.get_mut(*at as usize) {
                *slot = *id;
            }
        }
        RefArrayEdit::SetAll { ids: new_ids } => {
            *ids = new_ids.clone();
        }
    }
}

fn key_tuple(fields: &[FieldValue], key_fields: &[u16]) -> VeloxResult<Vec<FieldValue>> {
    key_fields
        .iter()
        .map(|&field_id| {
            fields
                .get(field_id as usize)
                .cloned()
                .ok_or_else(|| VeloxError::schema_incompatible(format!("missing field {field_id} for index key")))
        })
        .collect()
}

/// Rebuild every declared hash index and the inverse-reference map from
/// current record state, rather than trusting what a restored snapshot
/// captured: log replay past the snapshot version (`restore::apply_changeset`)
/// updates only record chains, not index or inverse-map state, so the
/// only way to guarantee both are caught up with a replayed tail is to
/// recompute them from the replayed result (§4.2, §4.3, §7).
fn rebuild_indexes_and_inverse_refs(model: &ModelManager, registry: &ClassRegistry, inverse_refs: &InverseRefMap) {
    for class_id in registry.class_ids() {
        let Some(store) = registry.get(class_id) else { continue };
        let Some(descriptor) = model.descriptor(class_id) else { continue };
        for index_desc in &descriptor.indexes {
            store.indexes.insert(
                index_desc.name.clone(),
                Arc::new(HashIndex::new(index_desc.name.clone(), index_desc.unique, false)),
            );
        }
    }

    for class_id in registry.class_ids() {
        let Some(store) = registry.get(class_id) else { continue };
        let Some(records) = &store.records else { continue };
        let Some(descriptor) = model.descriptor(class_id) else { continue };
        for object_id in records.all_ids() {
            let Some(row) = records.read_head(object_id) else { continue };
            for index_desc in &descriptor.indexes {
                if let Some(index) = store.indexes.get(&index_desc.name) {
                    if let Ok(tuple) = key_tuple(&row, &index_desc.key_fields) {
                        index.insert(encode_key(&tuple), object_id);
                    }
                }
            }
            for prop in &descriptor.properties {
                if !prop.tracked || !prop.property_type.is_reference() {
                    continue;
                }
                let Some(value) = row.get(prop.field_id as usize) else { continue };
                let slot = RefSlot { class_id, field_id: prop.field_id };
                for target in value.referenced_ids() {
                    inverse_refs.add_edge(slot, target, object_id);
                }
            }
        }
    }
}
