//! Storage-facing traits shared by the record store, transaction, and
//! replication layers.
//!
//! These traits let `velox-concurrency` and `velox-engine` depend on the
//! *shape* of a record store (§4.1) without depending on `velox-storage`'s
//! concrete chunked-array implementation.

use crate::descriptor::ClassDescriptor;
use crate::error::VeloxResult;
use crate::ids::{ClassId, ObjectId, Version};
use crate::value::FieldValue;
use std::sync::Arc;

/// A read-only, version-bounded view over one class's records, as seen by
/// a transaction at a fixed read version (§4.1's visibility rule: "the
/// greatest committed version ≤ R that is not a tombstone").
///
/// Thread safety: a `SnapshotView` is handed to exactly one transaction and
/// never mutated after creation, but may be read from multiple worker
/// threads cooperating on one scan, so implementations must be `Send + Sync`.
pub trait SnapshotView: Send + Sync {
    /// Read one record's fields at or before this view's read version.
    /// Returns `Ok(None)` if the record is invisible (never existed, or
    /// its visible version is a tombstone).
    fn read(&self, class_id: ClassId, object_id: ObjectId) -> VeloxResult<Option<Vec<FieldValue>>>;

    /// A lazy, restartable sequence over every record of `class_id` visible
    /// at this view's read version (§4.1 `scan`).
    fn scan(&self, class_id: ClassId) -> VeloxResult<Vec<ObjectId>>;

    /// The read version this view is pinned to.
    fn read_version(&self) -> Version;
}

/// The mutating surface of a per-class record store (§4.1).
///
/// Implementations own the chunked array and version chains for one class;
/// `velox-concurrency`'s transaction drives this trait through its
/// write-set application step, and `velox-durability`'s WAL replay drives
/// it during restore.
pub trait RecordStore: Send + Sync {
    /// Materialize the first version of `object_id`. The id itself is
    /// allocated by a database-wide id generator before this call, since ids
    /// must be unique across every class, not just this one (§3, §4.1).
    fn create(
        &self,
        class_id: ClassId,
        object_id: ObjectId,
        commit_version: Version,
        fields: Vec<FieldValue>,
    ) -> VeloxResult<()>;

    /// Append a new version to `object_id`'s chain carrying `fields`.
    fn update(
        &self,
        class_id: ClassId,
        object_id: ObjectId,
        commit_version: Version,
        fields: Vec<FieldValue>,
    ) -> VeloxResult<()>;

    /// Append a tombstone version to `object_id`'s chain.
    fn delete(&self, class_id: ClassId, object_id: ObjectId, commit_version: Version) -> VeloxResult<()>;

    /// A version-bounded read view as of `read_version`.
    fn snapshot(&self, read_version: Version) -> Box<dyn SnapshotView>;

    /// The class descriptor this store's records conform to, as an `Arc`
    /// snapshot so a concurrent model-update swap never hands a reader a
    /// half-updated descriptor (§4.9).
    fn descriptor(&self) -> Arc<ClassDescriptor>;

    /// Reserve storage capacity ahead of a bulk load (§4.1).
    fn reserve(&self, additional: usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_store_is_object_safe() {
        fn accepts_dyn(_store: &dyn RecordStore) {}
        let _ = accepts_dyn as fn(&dyn RecordStore);
    }

    #[test]
    fn snapshot_view_is_object_safe() {
        fn accepts_dyn(_view: &dyn SnapshotView) {}
        let _ = accepts_dyn as fn(&dyn SnapshotView);
    }

    #[test]
    fn record_store_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Box<dyn RecordStore>>();
        assert_sync::<Box<dyn RecordStore>>();
    }

    #[test]
    fn snapshot_view_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Box<dyn SnapshotView>>();
        assert_sync::<Box<dyn SnapshotView>>();
    }
}
