//! Model & schema: the class/property/index catalog and the model-update
//! protocol that evolves it without readers ever observing a
//! half-updated descriptor (§4.9).
//!
//! Narrowing changes (shrinking an integer width, changing a property's
//! kind) are rejected outright with `SchemaIncompatible`; everything else
//! — widening a numeric type, adding a property, adding or removing a
//! hash index, flipping whether a reference is tracked — goes through the
//! seven-step protocol below: validate, drain the collector, promote the
//! storage container to the new layout, stage new indexes as refilling,
//! swap the descriptor table atomically, let the workload continue, then
//! resume the refill workers.

use crate::gc::GarbageCollector;
use std::sync::Arc;
use velox_core::descriptor::{ClassDescriptor, HashIndexDescriptor, PropertyDescriptor};
use velox_core::ids::{ClassId, Version};
use velox_core::{VeloxError, VeloxResult};
use velox_storage::{encode_key, ClassRegistry, ClassStore, HashIndex};

/// Owns the model's descriptor catalog, independent of `ClassRegistry`'s
/// storage containers — an abstract class has no `ClassStore::records` to
/// recover a descriptor from, so the catalog is kept here instead (§3, §9).
pub struct ModelManager {
    descriptors: dashmap::DashMap<ClassId, Arc<ClassDescriptor>>,
}

impl ModelManager {
    /// An empty catalog.
    pub fn new() -> Self {
        Self { descriptors: dashmap::DashMap::new() }
    }

    /// Seed the catalog from a restored descriptor list (§4.8 restore).
    pub fn from_descriptors(descriptors: Vec<ClassDescriptor>) -> Self {
        let manager = Self::new();
        for d in descriptors {
            manager.descriptors.insert(d.class_id, Arc::new(d));
        }
        manager
    }

    /// The current descriptor for `class_id`, if declared.
    pub fn descriptor(&self, class_id: ClassId) -> Option<Arc<ClassDescriptor>> {
        self.descriptors.get(&class_id).map(|e| e.clone())
    }

    /// Every currently declared descriptor, in unspecified order.
    pub fn all_descriptors(&self) -> Vec<ClassDescriptor> {
        self.descriptors.iter().map(|e| (*e.value()).clone()).collect()
    }

    /// Declare a brand new class. Rejects a class id already in use.
    pub fn add_class(&self, registry: &ClassRegistry, descriptor: ClassDescriptor) -> VeloxResult<()> {
        if self.descriptors.contains_key(&descriptor.class_id) {
            return Err(VeloxError::schema_incompatible(format!(
                "class {:?} is already declared",
                descriptor.class_id
            )));
        }
        let class_id = descriptor.class_id;
        let store = if descriptor.abstract_class {
            ClassStore::abstract_placeholder()
        } else {
            ClassStore::concrete(descriptor.clone())
        };
        registry.register(class_id, store);
        self.descriptors.insert(class_id, Arc::new(descriptor));
        Ok(())
    }

    /// Delete a class, provided it currently holds no live instances.
    /// Abstract classes (no record container) are always deletable.
    pub fn delete_class(&self, registry: &ClassRegistry, class_id: ClassId) -> VeloxResult<()> {
        let Some(store) = registry.get(class_id) else {
            return Err(VeloxError::schema_incompatible(format!("class {class_id:?} is not declared")));
        };
        if let Some(records) = &store.records {
            if !records.all_ids().is_empty() {
                return Err(VeloxError::schema_incompatible(format!(
                    "class {class_id:?} still has live instances; delete them or cascade first"
                )));
            }
        }
        registry.remove(class_id);
        self.descriptors.remove(&class_id);
        Ok(())
    }

    /// Add a property. Always a compatible evolution by construction — the
    /// new field is simply absent (read as null) on every existing row
    /// until written.
    pub fn add_property(
        &self,
        registry: &ClassRegistry,
        class_id: ClassId,
        property: PropertyDescriptor,
    ) -> VeloxResult<()> {
        let current = self.require_descriptor(class_id)?;
        if current.property(property.field_id).is_some() {
            return Err(VeloxError::schema_incompatible(format!(
                "class {class_id:?} already declares field {}",
                property.field_id
            )));
        }
        let mut next = (*current).clone();
        next.properties.push(property);
        self.promote(registry, class_id, next)
    }

    /// Remove a property by field id. The stored values at that field
    /// position simply become unread; they are reclaimed the next time
    /// the row is rewritten.
    pub fn remove_property(&self, registry: &ClassRegistry, class_id: ClassId, field_id: u16) -> VeloxResult<()> {
        let current = self.require_descriptor(class_id)?;
        if current.property(field_id).is_none() {
            return Err(VeloxError::schema_incompatible(format!(
                "class {class_id:?} has no field {field_id}"
            )));
        }
        let mut next = (*current).clone();
        next.properties.retain(|p| p.field_id != field_id);
        self.promote(registry, class_id, next)
    }

    /// Flip whether a reference property is tracked by the inverse-
    /// reference map. A no-op swap of the descriptor table; the caller is
    /// responsible for backfilling or draining the inverse map to match
    /// (§4.3).
    pub fn set_reference_tracked(
        &self,
        registry: &ClassRegistry,
        class_id: ClassId,
        field_id: u16,
        tracked: bool,
    ) -> VeloxResult<()> {
        let current = self.require_descriptor(class_id)?;
        let prop = current.property(field_id).ok_or_else(|| {
            VeloxError::schema_incompatible(format!("class {class_id:?} has no field {field_id}"))
        })?;
        if !prop.property_type.is_reference() {
            return Err(VeloxError::schema_incompatible(format!(
                "field {field_id} on class {class_id:?} is not a reference"
            )));
        }
        let mut next = (*current).clone();
        if let Some(p) = next.properties.iter_mut().find(|p| p.field_id == field_id) {
            p.tracked = tracked;
        }
        self.promote(registry, class_id, next)
    }

    /// Add a hash index, refilling it in the background if the class
    /// already holds rows (§4.2, §4.9 steps 4-7).
    pub fn add_hash_index(
        &self,
        registry: &ClassRegistry,
        gc: &GarbageCollector,
        class_id: ClassId,
        current_visible: Version,
        mut index: HashIndexDescriptor,
    ) -> VeloxResult<()> {
        let current = self.require_descriptor(class_id)?;
        if current.indexes.iter().any(|i| i.name == index.name) {
            return Err(VeloxError::schema_incompatible(format!(
                "class {class_id:?} already declares index {}",
                index.name
            )));
        }
        let store = registry
            .get(class_id)
            .ok_or_else(|| VeloxError::schema_incompatible(format!("class {class_id:?} has no storage")))?;
        let records = store
            .records
            .as_ref()
            .ok_or_else(|| VeloxError::schema_incompatible(format!("class {class_id:?} is abstract")))?;

        // Step 2: drain the collector so refill walks a stable set of ids.
        gc.drain(registry, current_visible);

        let needs_refill = !records.all_ids().is_empty();
        index.pending_refill = needs_refill;

        // Step 4: stage the new index in refilling state before it is
        // visible in the descriptor.
        let hash_index = Arc::new(HashIndex::new(index.name.clone(), index.unique, needs_refill));
        store.indexes.insert(index.name.clone(), hash_index.clone());

        // Step 5: swap the descriptor table atomically.
        let mut next = (*current).clone();
        next.indexes.push(index.clone());
        self.promote(registry, class_id, next)?;

        // Step 7: resume (start) the refill worker.
        if needs_refill {
            refill_index(records.as_ref(), &hash_index, &index.key_fields);
            hash_index.mark_refilled();
        }
        Ok(())
    }

    /// Remove a hash index.
    pub fn remove_hash_index(&self, registry: &ClassRegistry, class_id: ClassId, name: &str) -> VeloxResult<()> {
        let current = self.require_descriptor(class_id)?;
        if !current.indexes.iter().any(|i| i.name == name) {
            return Err(VeloxError::schema_incompatible(format!(
                "class {class_id:?} has no index named {name}"
            )));
        }
        let store = registry
            .get(class_id)
            .ok_or_else(|| VeloxError::schema_incompatible(format!("class {class_id:?} has no storage")))?;
        store.indexes.remove(name);

        let mut next = (*current).clone();
        next.indexes.retain(|i| i.name != name);
        self.promote(registry, class_id, next)
    }

    /// Evolve `class_id`'s descriptor to `proposed`, rejecting anything
    /// that is not a type-compatible widening of the existing fields
    /// (§4.9 "type-narrowing changes are rejected"). Use the dedicated
    /// `add_property`/`remove_property`/index methods for structural
    /// changes instead; this is for a pure type-widening update.
    pub fn widen_class(&self, registry: &ClassRegistry, class_id: ClassId, proposed: ClassDescriptor) -> VeloxResult<()> {
        let current = self.require_descriptor(class_id)?;
        if !proposed.is_compatible_evolution_of(&current) {
            return Err(VeloxError::schema_incompatible(format!(
                "proposed descriptor for class {class_id:?} is not a type-compatible evolution"
            )));
        }
        self.promote(registry, class_id, proposed)
    }

    fn require_descriptor(&self, class_id: ClassId) -> VeloxResult<Arc<ClassDescriptor>> {
        self.descriptor(class_id)
            .ok_or_else(|| VeloxError::schema_incompatible(format!("class {class_id:?} is not declared")))
    }

    /// Steps 3 and 5: promote the storage container to the new layout
    /// (a no-op beyond handing it the new descriptor, since rows are
    /// read lazily and padded on access) and swap the descriptor table.
    fn promote(&self, registry: &ClassRegistry, class_id: ClassId, next: ClassDescriptor) -> VeloxResult<()> {
        if !next.abstract_class {
            let store = registry
                .get(class_id)
                .ok_or_else(|| VeloxError::schema_incompatible(format!("class {class_id:?} has no storage")))?;
            if let Some(records) = &store.records {
                records.swap_descriptor(next.clone());
            }
        }
        self.descriptors.insert(class_id, Arc::new(next));
        Ok(())
    }
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk every existing row and populate `index` from the declared key
/// fields, skipping rows too short to have all of them set (they read as
/// absent until written, per lazy padding).
fn refill_index(records: &velox_storage::ClassRecordStore, index: &HashIndex, key_fields: &[u16]) {
    for object_id in records.all_ids() {
        let Some(row) = records.read_head(object_id) else { continue };
        if let Some(key) = key_tuple(&row, key_fields) {
            index.insert(encode_key(&key), object_id);
        }
    }
}

fn key_tuple(row: &[velox_core::value::FieldValue], key_fields: &[u16]) -> Option<Vec<velox_core::value::FieldValue>> {
    key_fields
        .iter()
        .map(|field_id| row.get(*field_id as usize).cloned())
        .collect::<Option<Vec<_>>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use velox_core::descriptor::PropertyType;
    use velox_core::traits::RecordStore;
    use velox_core::value::FieldValue;

    fn widget() -> ClassDescriptor {
        ClassDescriptor {
            class_id: ClassId::new(1),
            name: "Widget".into(),
            parent: None,
            abstract_class: false,
            properties: vec![PropertyDescriptor {
                field_id: 0,
                name: "n".into(),
                property_type: PropertyType::Int(32),
                delete_policy: None,
                tracked: false,
                required: true,
            }],
            indexes: vec![],
        }
    }

    #[test]
    fn add_class_then_lookup_descriptor() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        assert!(model.descriptor(ClassId::new(1)).is_some());
        assert!(registry.get(ClassId::new(1)).is_some());
    }

    #[test]
    fn add_class_twice_is_rejected() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        assert!(model.add_class(&registry, widget()).is_err());
    }

    #[test]
    fn delete_class_with_live_instances_is_rejected() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        let records = registry.get(ClassId::new(1)).unwrap().records.clone().unwrap();
        records.create(ClassId::new(1), ObjectId::new(1), Version::new(1), vec![FieldValue::Int(1)]).unwrap();

        assert!(model.delete_class(&registry, ClassId::new(1)).is_err());
    }

    #[test]
    fn delete_empty_class_succeeds() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        model.delete_class(&registry, ClassId::new(1)).unwrap();
        assert!(model.descriptor(ClassId::new(1)).is_none());
        assert!(registry.get(ClassId::new(1)).is_none());
    }

    #[test]
    fn add_property_is_visible_on_the_promoted_descriptor() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        model
            .add_property(
                &registry,
                ClassId::new(1),
                PropertyDescriptor {
                    field_id: 1,
                    name: "label".into(),
                    property_type: PropertyType::String,
                    delete_policy: None,
                    tracked: false,
                    required: false,
                },
            )
            .unwrap();

        let descriptor = model.descriptor(ClassId::new(1)).unwrap();
        assert!(descriptor.property(1).is_some());
        let store_descriptor = registry.get(ClassId::new(1)).unwrap().records.as_ref().unwrap().descriptor_arc();
        assert!(store_descriptor.property(1).is_some());
    }

    #[test]
    fn add_duplicate_field_id_is_rejected() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        let dup = PropertyDescriptor {
            field_id: 0,
            name: "dup".into(),
            property_type: PropertyType::Bool,
            delete_policy: None,
            tracked: false,
            required: false,
        };
        assert!(model.add_property(&registry, ClassId::new(1), dup).is_err());
    }

    #[test]
    fn remove_property_drops_it_from_the_descriptor() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        model.remove_property(&registry, ClassId::new(1), 0).unwrap();
        assert!(model.descriptor(ClassId::new(1)).unwrap().property(0).is_none());
    }

    #[test]
    fn widen_class_rejects_narrowing() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        let mut narrowed = widget();
        narrowed.properties[0].property_type = PropertyType::Int(8);
        assert!(model.widen_class(&registry, ClassId::new(1), narrowed).is_err());
    }

    #[test]
    fn widen_class_accepts_widening() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        let mut widened = widget();
        widened.properties[0].property_type = PropertyType::Int(64);
        model.widen_class(&registry, ClassId::new(1), widened).unwrap();
        assert_eq!(model.descriptor(ClassId::new(1)).unwrap().properties[0].property_type, PropertyType::Int(64));
    }

    #[test]
    fn add_hash_index_over_populated_class_refills_then_becomes_authoritative() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        let records = registry.get(ClassId::new(1)).unwrap().records.clone().unwrap();
        records.create(ClassId::new(1), ObjectId::new(1), Version::new(1), vec![FieldValue::Int(7)]).unwrap();

        let gc = GarbageCollector::new();
        model
            .add_hash_index(
                &registry,
                &gc,
                ClassId::new(1),
                Version::new(1),
                HashIndexDescriptor { name: "Widget.n".into(), key_fields: vec![0], unique: false, pending_refill: false },
            )
            .unwrap();

        let store = registry.get(ClassId::new(1)).unwrap();
        let index = store.indexes.get("Widget.n").unwrap().clone();
        assert!(!index.is_refilling());
        let key = encode_key(&[FieldValue::Int(7)]);
        assert_eq!(index.lookup(&key), vec![ObjectId::new(1)]);
    }

    #[test]
    fn add_hash_index_over_empty_class_skips_refill() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        let gc = GarbageCollector::new();
        model
            .add_hash_index(
                &registry,
                &gc,
                ClassId::new(1),
                Version::NONE,
                HashIndexDescriptor { name: "Widget.n".into(), key_fields: vec![0], unique: false, pending_refill: false },
            )
            .unwrap();
        let descriptor = model.descriptor(ClassId::new(1)).unwrap();
        assert!(!descriptor.indexes[0].pending_refill);
    }

    #[test]
    fn remove_hash_index_drops_it_from_storage_and_descriptor() {
        let registry = ClassRegistry::new();
        let model = ModelManager::new();
        model.add_class(&registry, widget()).unwrap();
        let gc = GarbageCollector::new();
        model
            .add_hash_index(
                &registry,
                &gc,
                ClassId::new(1),
                Version::NONE,
                HashIndexDescriptor { name: "Widget.n".into(), key_fields: vec![0], unique: false, pending_refill: false },
            )
            .unwrap();
        model.remove_hash_index(&registry, ClassId::new(1), "Widget.n").unwrap();
        assert!(registry.get(ClassId::new(1)).unwrap().indexes.get("Widget.n").is_none());
        assert!(model.descriptor(ClassId::new(1)).unwrap().indexes.is_empty());
    }
}
