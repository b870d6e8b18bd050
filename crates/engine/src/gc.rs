//! Background garbage collection of superseded record versions (§4.7).
//!
//! Every active transaction is registered here with the read version it
//! pinned at start. The watermark is the oldest such version still in
//! use; versions strictly older than the watermark, and not the current
//! head, are safe to reclaim because no live snapshot can ever observe
//! them again. Sweeping never blocks committers — it only ever removes
//! chain entries a reader could no longer reach.

use dashmap::DashMap;
use velox_core::ids::{TxnId, Version};
use velox_storage::ClassRegistry;

/// Tracks active readers and reclaims superseded versions once no
/// transaction can still observe them.
pub struct GarbageCollector {
    active_readers: DashMap<TxnId, Version>,
}

impl GarbageCollector {
    /// An empty tracker.
    pub fn new() -> Self {
        Self { active_readers: DashMap::new() }
    }

    /// Record that `txn_id` has pinned `read_version` for its lifetime.
    /// Called once, at the start of every transaction (read or write).
    pub fn register_reader(&self, txn_id: TxnId, read_version: Version) {
        self.active_readers.insert(txn_id, read_version);
    }

    /// Stop tracking `txn_id`, e.g. on commit, abort, or timeout.
    pub fn unregister_reader(&self, txn_id: TxnId) {
        self.active_readers.remove(&txn_id);
    }

    /// How many transactions are currently registered.
    pub fn active_reader_count(&self) -> usize {
        self.active_readers.len()
    }

    /// The oldest version any live transaction still depends on. With no
    /// active readers, everything up to `current_visible` is reclaimable.
    pub fn watermark(&self, current_visible: Version) -> Version {
        self.active_readers.iter().map(|entry| *entry.value()).min().unwrap_or(current_visible)
    }

    /// Reclaim every record version older than the watermark, across
    /// every concrete class in `registry`. Returns the number of chain
    /// entries freed. Safe to call repeatedly from a background thread;
    /// also used synchronously to drain the queue before a schema update
    /// or snapshot (§4.9 step 2, §4.7 "drain").
    pub fn sweep(&self, registry: &ClassRegistry, current_visible: Version) -> usize {
        let watermark = self.watermark(current_visible);
        let mut reclaimed = 0;
        for class_id in registry.class_ids() {
            let Some(store) = registry.get(class_id) else { continue };
            if let Some(records) = &store.records {
                reclaimed += records.gc_reclaim(watermark);
            }
        }
        reclaimed
    }

    /// Synchronous alias for [`sweep`](Self::sweep), named for call sites
    /// that must see reclamation complete before proceeding (schema
    /// updates, restart). Sweeping is already synchronous within a single
    /// call; the distinction is in the caller's intent, not the behavior.
    pub fn drain(&self, registry: &ClassRegistry, current_visible: Version) -> usize {
        self.sweep(registry, current_visible)
    }
}

impl Default for GarbageCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velox_core::descriptor::{ClassDescriptor, PropertyDescriptor, PropertyType};
    use velox_core::ids::{ClassId, ObjectId};
    use velox_core::traits::RecordStore;
    use velox_core::value::FieldValue;
    use velox_storage::{ClassRecordStore, ClassStore};
    use std::sync::Arc;

    fn descriptor() -> ClassDescriptor {
        ClassDescriptor {
            class_id: ClassId::new(1),
            name: "Widget".into(),
            parent: None,
            abstract_class: false,
            properties: vec![PropertyDescriptor {
                field_id: 0,
                name: "n".into(),
                property_type: PropertyType::Int(64),
                delete_policy: None,
                tracked: false,
                required: true,
            }],
            indexes: vec![],
        }
    }

    fn registry_with_one_row() -> (ClassRegistry, Arc<ClassRecordStore>) {
        let registry = ClassRegistry::new();
        registry.register(ClassId::new(1), ClassStore::concrete(descriptor()));
        let records = registry.get(ClassId::new(1)).unwrap().records.clone().unwrap();
        records.create(ClassId::new(1), ObjectId::new(1), Version::new(1), vec![FieldValue::Int(1)]).unwrap();
        records.update(ClassId::new(1), ObjectId::new(1), Version::new(2), vec![FieldValue::Int(2)]).unwrap();
        records.update(ClassId::new(1), ObjectId::new(1), Version::new(3), vec![FieldValue::Int(3)]).unwrap();
        (registry, records)
    }

    #[test]
    fn watermark_with_no_readers_is_current_visible() {
        let gc = GarbageCollector::new();
        assert_eq!(gc.watermark(Version::new(5)), Version::new(5));
    }

    #[test]
    fn watermark_is_oldest_active_reader() {
        let gc = GarbageCollector::new();
        gc.register_reader(TxnId::new(1), Version::new(2));
        gc.register_reader(TxnId::new(2), Version::new(7));
        assert_eq!(gc.watermark(Version::new(10)), Version::new(2));
    }

    #[test]
    fn sweep_reclaims_versions_older_than_watermark_but_keeps_head() {
        let (registry, _records) = registry_with_one_row();
        let gc = GarbageCollector::new();
        // No active readers: watermark == current visible (3), so every
        // version strictly older than the head (1 and 2) is reclaimable.
        let reclaimed = gc.sweep(&registry, Version::new(3));
        assert_eq!(reclaimed, 2);
    }

    #[test]
    fn sweep_respects_a_registered_reader_pinned_to_an_old_version() {
        let (registry, _records) = registry_with_one_row();
        let gc = GarbageCollector::new();
        gc.register_reader(TxnId::new(1), Version::new(1));
        let reclaimed = gc.sweep(&registry, Version::new(3));
        assert_eq!(reclaimed, 0, "version 1 is still needed by the registered reader");
    }

    #[test]
    fn unregister_reader_allows_its_pinned_version_to_be_reclaimed() {
        let (registry, _records) = registry_with_one_row();
        let gc = GarbageCollector::new();
        gc.register_reader(TxnId::new(1), Version::new(1));
        gc.unregister_reader(TxnId::new(1));
        let reclaimed = gc.sweep(&registry, Version::new(3));
        assert_eq!(reclaimed, 2);
    }
}
