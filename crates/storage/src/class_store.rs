//! Ties a class's record store together with its declared hash indexes
//! (§3: "a set of declared hash indexes and declared references") and
//! registers every class in a database-wide, atomically swappable table
//! (§4.9).

use dashmap::DashMap;
use std::sync::Arc;
use velox_core::descriptor::ClassDescriptor;
use velox_core::ids::ClassId;

use crate::hash_index::HashIndex;
use crate::record_store::ClassRecordStore;

/// One non-abstract class's storage: its record container plus its
/// declared hash indexes, in descriptor order.
pub struct ClassStore {
    /// The record container. Absent for abstract classes (§3, §9:
    /// "do not allocate a record container for abstract classes").
    pub records: Option<Arc<ClassRecordStore>>,
    /// Declared hash indexes, by name.
    pub indexes: DashMap<String, Arc<HashIndex>>,
}

impl ClassStore {
    /// A fresh store for a non-abstract class.
    pub fn concrete(descriptor: ClassDescriptor) -> Self {
        let indexes = DashMap::new();
        for idx in &descriptor.indexes {
            indexes.insert(
                idx.name.clone(),
                Arc::new(HashIndex::new(idx.name.clone(), idx.unique, idx.pending_refill)),
            );
        }
        Self { records: Some(Arc::new(ClassRecordStore::new(descriptor))), indexes }
    }

    /// A placeholder for an abstract class: no record container, no
    /// indexes of its own (indexes on an abstract class are inherited by
    /// concrete descendants, each instantiated in its own `ClassStore`).
    pub fn abstract_placeholder() -> Self {
        Self { records: None, indexes: DashMap::new() }
    }
}

/// Database-wide registry of every class's storage, keyed by stable class
/// id (§3: "class ids are stable across restarts").
pub struct ClassRegistry {
    classes: DashMap<ClassId, Arc<ClassStore>>,
}

impl ClassRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { classes: DashMap::new() }
    }

    /// Register (or replace) a class's storage. Used both when a model
    /// update adds a class and when a compatible-evolution update swaps in
    /// a promoted `ClassStore` carrying new indexes (§4.9).
    pub fn register(&self, class_id: ClassId, store: ClassStore) {
        self.classes.insert(class_id, Arc::new(store));
    }

    /// The storage for `class_id`, if registered.
    pub fn get(&self, class_id: ClassId) -> Option<Arc<ClassStore>> {
        self.classes.get(&class_id).map(|entry| entry.clone())
    }

    /// Every registered class id, for schema introspection and recovery
    /// replay ordering.
    pub fn class_ids(&self) -> Vec<ClassId> {
        self.classes.iter().map(|e| *e.key()).collect()
    }

    /// Remove a class's storage entirely. Only valid once the model-update
    /// protocol has confirmed the class has no instances (§4.9 "delete
    /// class if empty of instances").
    pub fn remove(&self, class_id: ClassId) {
        self.classes.remove(&class_id);
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velox_core::descriptor::{HashIndexDescriptor, PropertyDescriptor, PropertyType};

    fn customer() -> ClassDescriptor {
        ClassDescriptor {
            class_id: ClassId::new(1),
            name: "Customer".into(),
            parent: None,
            abstract_class: false,
            properties: vec![PropertyDescriptor {
                field_id: 0,
                name: "userName".into(),
                property_type: PropertyType::String,
                delete_policy: None,
                tracked: false,
                required: true,
            }],
            indexes: vec![HashIndexDescriptor {
                name: "Customer.userName".into(),
                key_fields: vec![0],
                unique: true,
                pending_refill: false,
            }],
        }
    }

    #[test]
    fn registering_a_concrete_class_materializes_its_declared_indexes() {
        let registry = ClassRegistry::new();
        registry.register(ClassId::new(1), ClassStore::concrete(customer()));
        let store = registry.get(ClassId::new(1)).unwrap();
        assert!(store.records.is_some());
        assert!(store.indexes.contains_key("Customer.userName"));
    }

    #[test]
    fn abstract_class_has_no_record_container() {
        let store = ClassStore::abstract_placeholder();
        assert!(store.records.is_none());
    }

    #[test]
    fn removing_a_class_drops_it_from_the_registry() {
        let registry = ClassRegistry::new();
        registry.register(ClassId::new(1), ClassStore::concrete(customer()));
        registry.remove(ClassId::new(1));
        assert!(registry.get(ClassId::new(1)).is_none());
    }
}
