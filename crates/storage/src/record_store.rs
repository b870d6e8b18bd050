//! Per-class record storage: chunked lookup plus MVCC version chains
//! (§4.1).
//!
//! Records are partitioned by id into shards of a [`dashmap::DashMap`],
//! adapted here to object ids so unrelated ids never contend on the same
//! lock. Each shard entry holds a [`VersionChain`]: newest-first, for O(1)
//! `push_front` on every new write.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use velox_core::descriptor::ClassDescriptor;
use velox_core::ids::{ClassId, ObjectId, Version};
use velox_core::traits::{RecordStore, SnapshotView};
use velox_core::value::FieldValue;
use velox_core::{VeloxError, VeloxResult};

/// One committed version of a record.
#[derive(Debug, Clone)]
struct RecordVersion {
    commit_version: Version,
    /// `None` means this version is a tombstone (§3: "deletion").
    fields: Option<Vec<FieldValue>>,
}

/// The version chain for a single object id, newest version first.
///
/// Invariant (§3): versions of a given id form a singly linked chain,
/// strictly decreasing in commit version from front to back.
#[derive(Debug, Clone, Default)]
struct VersionChain {
    versions: VecDeque<RecordVersion>,
}

impl VersionChain {
    fn head_version(&self) -> Option<Version> {
        self.versions.front().map(|v| v.commit_version)
    }

    fn push(&mut self, commit_version: Version, fields: Option<Vec<FieldValue>>) {
        debug_assert!(
            self.versions.front().map(|v| v.commit_version.get() < commit_version.get()).unwrap_or(true),
            "commit versions must strictly increase front-to-back insert"
        );
        self.versions.push_front(RecordVersion { commit_version, fields });
    }

    /// Visibility rule (§4.1): walk older versions until the first
    /// `V' <= read_version` is found; `None` if none exists or that
    /// version is a tombstone.
    fn visible_at(&self, read_version: Version) -> Option<&[FieldValue]> {
        self.versions
            .iter()
            .find(|v| v.commit_version.get() <= read_version.get())
            .and_then(|v| v.fields.as_deref())
    }

    /// Truncate every version strictly older than `watermark` and not the
    /// current head (§4.7 garbage collection).
    fn reclaim_older_than(&mut self, watermark: Version) -> usize {
        if self.versions.len() <= 1 {
            return 0;
        }
        let keep_from = self
            .versions
            .iter()
            .position(|v| v.commit_version.get() <= watermark.get())
            .unwrap_or(self.versions.len() - 1);
        let reclaimed = self.versions.len() - 1 - keep_from;
        self.versions.truncate(keep_from + 1);
        reclaimed
    }

    /// Drop every version committed strictly after `target`, e.g. to undo
    /// log entries a rewind discards (§4.6). Returns the number of
    /// versions dropped; the chain is left empty if none survive.
    fn truncate_above(&mut self, target: Version) -> usize {
        let before = self.versions.len();
        self.versions.retain(|v| v.commit_version.get() <= target.get());
        before - self.versions.len()
    }
}

const SHARD_COUNT: usize = 16;

fn shard_of(id: ObjectId) -> usize {
    (id.get() as usize) % SHARD_COUNT
}

/// Per-class record container: a fixed number of id-partitioned shards,
/// each a `DashMap` keyed by raw object id for O(1) lookup (§4.1: "stored
/// in chunked arrays keyed by id").
pub struct ClassRecordStore {
    descriptor: RwLock<Arc<ClassDescriptor>>,
    shards: Vec<DashMap<u64, RwLock<VersionChain>>>,
}

impl ClassRecordStore {
    /// A new, empty store for `descriptor`.
    pub fn new(descriptor: ClassDescriptor) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| DashMap::new()).collect();
        Self { descriptor: RwLock::new(Arc::new(descriptor)), shards }
    }

    /// The current descriptor, as an `Arc` snapshot readers may hold onto
    /// without racing a concurrent model update (§4.9: "readers never
    /// observe a half-updated descriptor").
    pub fn descriptor_arc(&self) -> Arc<ClassDescriptor> {
        self.descriptor.read().clone()
    }

    /// Atomically replace the descriptor after a model-update promotion
    /// (§4.9 step 5: "swap descriptor tables atomically").
    pub fn swap_descriptor(&self, new_descriptor: ClassDescriptor) {
        *self.descriptor.write() = Arc::new(new_descriptor);
    }

    /// The commit version at the head of `object_id`'s chain, if it
    /// exists, used by the concurrency layer's write-write conflict check
    /// (§4.1) before calling [`RecordStore::update`]/[`RecordStore::delete`].
    pub fn head_version(&self, object_id: ObjectId) -> Option<Version> {
        let shard = &self.shards[shard_of(object_id)];
        shard.get(&object_id.get()).and_then(|chain| chain.read().head_version())
    }

    /// Every id currently present in this class's container, live or
    /// tombstoned, in unspecified order. Used by class scans and by the
    /// untracked-reference fallback scan (§4.3).
    pub fn all_ids(&self) -> Vec<ObjectId> {
        let mut ids = Vec::new();
        for shard in &self.shards {
            for entry in shard.iter() {
                ids.push(ObjectId::new(*entry.key()));
            }
        }
        ids
    }

    /// The current head row's field values, regardless of what version a
    /// reader is pinned to. Used by replay (WAL and schema-update row
    /// rewrite), which always operates against the latest state rather
    /// than a transaction's snapshot.
    pub fn read_head(&self, object_id: ObjectId) -> Option<Vec<FieldValue>> {
        let shard = &self.shards[shard_of(object_id)];
        shard.get(&object_id.get()).and_then(|chain| chain.read().versions.front().and_then(|v| v.fields.clone()))
    }

    /// Every id visible at `version` together with its field values, for a
    /// snapshot dump (§4.8: a snapshot only ever captures one committed
    /// version per id, never the whole chain).
    pub fn snapshot_dump(&self, version: Version) -> Vec<(ObjectId, Vec<FieldValue>)> {
        let mut rows = Vec::new();
        for shard in &self.shards {
            for entry in shard.iter() {
                if let Some(fields) = entry.value().read().visible_at(version) {
                    rows.push((ObjectId::new(*entry.key()), fields.to_vec()));
                }
            }
        }
        rows
    }

    /// Seed one row directly from a snapshot, as though it were created at
    /// `version`. Used only during restore, before any transaction has
    /// touched the store.
    pub fn restore_row(&self, object_id: ObjectId, version: Version, fields: Vec<FieldValue>) {
        let shard = &self.shards[shard_of(object_id)];
        shard.entry(object_id.get()).or_default().write().push(version, Some(fields));
    }

    /// Reclaim every version strictly older than `watermark` and not the
    /// chain head (§4.7). Returns the number of versions freed.
    pub fn gc_reclaim(&self, watermark: Version) -> usize {
        let mut reclaimed = 0;
        for shard in &self.shards {
            for entry in shard.iter() {
                reclaimed += entry.value().write().reclaim_older_than(watermark);
            }
        }
        reclaimed
    }

    /// Undo the single most recent push for `object_id` if its commit
    /// version is exactly `commit_version`, restoring whatever version (or
    /// absence of one) preceded it. Used to roll back a transaction's
    /// applied mutation when a later commit stage (WAL append, durability
    /// wait, auxiliary log, or replication) fails (§4.5: "Aborting ->
    /// Completed after staged mutations are undone"). Safe to call even
    /// though other transactions may be committing concurrently: the
    /// caller still holds this object's exclusive lock, so no other
    /// transaction can have pushed a newer version in the meantime.
    pub fn revert_head(&self, object_id: ObjectId, commit_version: Version) {
        let shard = &self.shards[shard_of(object_id)];
        let now_empty = {
            let Some(chain) = shard.get(&object_id.get()) else { return };
            let mut chain = chain.write();
            if chain.head_version() == Some(commit_version) {
                chain.versions.pop_front();
            }
            chain.versions.is_empty()
        };
        if now_empty {
            shard.remove(&object_id.get());
        }
    }

    /// Discard every version committed after `target` across every id,
    /// dropping ids left with no surviving version entirely (§4.6 rewind).
    /// Returns the number of versions dropped.
    pub fn truncate_above(&self, target: Version) -> usize {
        let mut dropped = 0;
        for shard in &self.shards {
            let mut empty_ids = Vec::new();
            for entry in shard.iter() {
                let removed = entry.value().write().truncate_above(target);
                dropped += removed;
                if entry.value().read().versions.is_empty() {
                    empty_ids.push(*entry.key());
                }
            }
            for id in empty_ids {
                shard.remove(&id);
            }
        }
        dropped
    }
}

impl RecordStore for ClassRecordStore {
    fn create(
        &self,
        _class_id: ClassId,
        object_id: ObjectId,
        commit_version: Version,
        fields: Vec<FieldValue>,
    ) -> VeloxResult<()> {
        let shard = &self.shards[shard_of(object_id)];
        let chain = shard.entry(object_id.get()).or_default();
        chain.write().push(commit_version, Some(fields));
        Ok(())
    }

    fn update(
        &self,
        _class_id: ClassId,
        object_id: ObjectId,
        commit_version: Version,
        fields: Vec<FieldValue>,
    ) -> VeloxResult<()> {
        let shard = &self.shards[shard_of(object_id)];
        let chain = shard.entry(object_id.get()).or_default();
        chain.write().push(commit_version, Some(fields));
        Ok(())
    }

    fn delete(&self, _class_id: ClassId, object_id: ObjectId, commit_version: Version) -> VeloxResult<()> {
        let shard = &self.shards[shard_of(object_id)];
        let chain = shard.entry(object_id.get()).or_default();
        chain.write().push(commit_version, None);
        Ok(())
    }

    fn snapshot(&self, read_version: Version) -> Box<dyn SnapshotView> {
        Box::new(ClassSnapshotView { store: self, read_version })
    }

    fn descriptor(&self) -> Arc<ClassDescriptor> {
        self.descriptor_arc()
    }

    fn reserve(&self, additional: usize) {
        for shard in &self.shards {
            shard.reserve(additional / SHARD_COUNT + 1);
        }
    }
}

/// A read view over one class, pinned to `read_version` (§4.1).
struct ClassSnapshotView<'a> {
    store: &'a ClassRecordStore,
    read_version: Version,
}

impl SnapshotView for ClassSnapshotView<'_> {
    fn read(&self, _class_id: ClassId, object_id: ObjectId) -> VeloxResult<Option<Vec<FieldValue>>> {
        let shard = &self.store.shards[shard_of(object_id)];
        Ok(shard
            .get(&object_id.get())
            .and_then(|chain| chain.read().visible_at(self.read_version).map(<[_]>::to_vec)))
    }

    fn scan(&self, _class_id: ClassId) -> VeloxResult<Vec<ObjectId>> {
        let mut visible = Vec::new();
        for shard in &self.store.shards {
            for entry in shard.iter() {
                if entry.value().read().visible_at(self.read_version).is_some() {
                    visible.push(ObjectId::new(*entry.key()));
                }
            }
        }
        Ok(visible)
    }

    fn read_version(&self) -> Version {
        self.read_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velox_core::descriptor::PropertyType;

    fn descriptor() -> ClassDescriptor {
        ClassDescriptor {
            class_id: ClassId::new(1),
            name: "Customer".into(),
            parent: None,
            abstract_class: false,
            properties: vec![velox_core::descriptor::PropertyDescriptor {
                field_id: 0,
                name: "name".into(),
                property_type: PropertyType::String,
                delete_policy: None,
                tracked: false,
                required: true,
            }],
            indexes: vec![],
        }
    }

    #[test]
    fn create_then_read_in_same_commit_version_is_visible() {
        let store = ClassRecordStore::new(descriptor());
        let id = ObjectId::new(42);
        store.create(ClassId::new(1), id, Version::new(1), vec![FieldValue::String("a".into())]).unwrap();
        let view = store.snapshot(Version::new(1));
        let row = view.read(ClassId::new(1), id).unwrap().unwrap();
        assert_eq!(row[0], FieldValue::String("a".into()));
    }

    #[test]
    fn reader_before_first_commit_sees_nothing() {
        let store = ClassRecordStore::new(descriptor());
        let id = ObjectId::new(1);
        store.create(ClassId::new(1), id, Version::new(5), vec![FieldValue::Int(1)]).unwrap();
        let view = store.snapshot(Version::new(4));
        assert!(view.read(ClassId::new(1), id).unwrap().is_none());
    }

    #[test]
    fn delete_makes_record_invisible_to_later_readers() {
        let store = ClassRecordStore::new(descriptor());
        let id = ObjectId::new(7);
        store.create(ClassId::new(1), id, Version::new(1), vec![FieldValue::Int(1)]).unwrap();
        store.delete(ClassId::new(1), id, Version::new(2)).unwrap();
        assert!(store.snapshot(Version::new(2)).read(ClassId::new(1), id).unwrap().is_none());
        assert!(store.snapshot(Version::new(1)).read(ClassId::new(1), id).unwrap().is_some());
    }

    #[test]
    fn scan_returns_only_visible_ids() {
        let store = ClassRecordStore::new(descriptor());
        store.create(ClassId::new(1), ObjectId::new(1), Version::new(1), vec![FieldValue::Int(1)]).unwrap();
        store.create(ClassId::new(1), ObjectId::new(2), Version::new(2), vec![FieldValue::Int(2)]).unwrap();
        store.delete(ClassId::new(1), ObjectId::new(1), Version::new(3)).unwrap();

        let ids = store.snapshot(Version::new(2)).scan(ClassId::new(1)).unwrap();
        assert_eq!(ids, vec![ObjectId::new(1)]);

        let ids = store.snapshot(Version::new(3)).scan(ClassId::new(1)).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn gc_reclaims_versions_older_than_watermark_but_never_the_head() {
        let store = ClassRecordStore::new(descriptor());
        let id = ObjectId::new(1);
        store.create(ClassId::new(1), id, Version::new(1), vec![FieldValue::Int(1)]).unwrap();
        store.update(ClassId::new(1), id, Version::new(2), vec![FieldValue::Int(2)]).unwrap();
        store.update(ClassId::new(1), id, Version::new(3), vec![FieldValue::Int(3)]).unwrap();

        let reclaimed = store.gc_reclaim(Version::new(2));
        assert_eq!(reclaimed, 1);
        // head (v3) still there; v1 reclaimed; v2 kept as the watermark boundary
        assert!(store.snapshot(Version::new(3)).read(ClassId::new(1), id).unwrap().is_some());
    }

    #[test]
    fn head_version_tracks_latest_write() {
        let store = ClassRecordStore::new(descriptor());
        let id = ObjectId::new(9);
        assert!(store.head_version(id).is_none());
        store.create(ClassId::new(1), id, Version::new(4), vec![]).unwrap();
        assert_eq!(store.head_version(id), Some(Version::new(4)));
    }

    #[test]
    fn revert_head_restores_the_prior_version_and_leaves_other_ids_untouched() {
        let store = ClassRecordStore::new(descriptor());
        let id = ObjectId::new(1);
        store.create(ClassId::new(1), id, Version::new(1), vec![FieldValue::Int(1)]).unwrap();
        store.update(ClassId::new(1), id, Version::new(2), vec![FieldValue::Int(2)]).unwrap();

        store.revert_head(id, Version::new(2));
        assert_eq!(store.head_version(id), Some(Version::new(1)));
        let row = store.read_head(id).unwrap();
        assert_eq!(row[0], FieldValue::Int(1));
    }

    #[test]
    fn revert_head_of_a_create_removes_the_id_entirely() {
        let store = ClassRecordStore::new(descriptor());
        let id = ObjectId::new(1);
        store.create(ClassId::new(1), id, Version::new(1), vec![FieldValue::Int(1)]).unwrap();

        store.revert_head(id, Version::new(1));
        assert!(store.head_version(id).is_none());
        assert!(store.all_ids().is_empty());
    }

    #[test]
    fn revert_head_is_a_no_op_if_the_head_has_moved_past_the_given_version() {
        let store = ClassRecordStore::new(descriptor());
        let id = ObjectId::new(1);
        store.create(ClassId::new(1), id, Version::new(1), vec![FieldValue::Int(1)]).unwrap();
        store.update(ClassId::new(1), id, Version::new(2), vec![FieldValue::Int(2)]).unwrap();

        store.revert_head(id, Version::new(1));
        assert_eq!(store.head_version(id), Some(Version::new(2)), "stale revert must not touch a newer head");
    }

    #[test]
    fn truncate_above_drops_later_versions_and_empties_ids_created_after_target() {
        let store = ClassRecordStore::new(descriptor());
        let kept = ObjectId::new(1);
        let discarded = ObjectId::new(2);
        store.create(ClassId::new(1), kept, Version::new(1), vec![FieldValue::Int(1)]).unwrap();
        store.update(ClassId::new(1), kept, Version::new(3), vec![FieldValue::Int(3)]).unwrap();
        store.create(ClassId::new(1), discarded, Version::new(4), vec![FieldValue::Int(9)]).unwrap();

        let dropped = store.truncate_above(Version::new(2));
        assert_eq!(dropped, 2);
        assert_eq!(store.head_version(kept), Some(Version::new(1)));
        assert!(store.head_version(discarded).is_none());
    }
}
