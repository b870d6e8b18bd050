//! A thin facade around [`Database`] for callers that do not want to carry
//! an explicit context parameter through their own call stack (§9).

use std::path::Path;
use velox_concurrency::Transaction;
use velox_core::changeset::RefArrayEdit;
use velox_core::descriptor::ClassDescriptor;
use velox_core::ids::{ClassId, ObjectId, Version};
use velox_core::value::FieldValue;
use velox_core::VeloxResult;
use velox_engine::Database;

/// Owns one [`Database`] and forwards the transaction lifecycle to it.
///
/// Nothing here does more than `Database` already does — it exists so a
/// caller can hold one `EngineHandle` and call `handle.begin()`,
/// `handle.commit(txn)`, and so on, without naming `Database` at every call
/// site. Reach for `Database` directly when that indirection isn't wanted.
pub struct EngineHandle {
    db: Database,
}

impl EngineHandle {
    /// Open (or create) a database rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> VeloxResult<Self> {
        Ok(Self { db: Database::open(dir)? })
    }

    /// The wrapped database, for anything this facade does not forward.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The wrapped database, mutably — needed to attach a replicator.
    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Begin a transaction with the default deadline.
    pub fn begin(&self) -> Transaction {
        self.db.begin()
    }

    /// Create a new object of `class_id`.
    pub fn create(&self, txn: &mut Transaction, class_id: ClassId, fields: Vec<FieldValue>) -> VeloxResult<ObjectId> {
        self.db.create(txn, class_id, fields)
    }

    /// Update a subset of an existing object's fields.
    pub fn update(
        &self,
        txn: &mut Transaction,
        class_id: ClassId,
        object_id: ObjectId,
        changes: Vec<(u16, FieldValue)>,
    ) -> VeloxResult<()> {
        self.db.update(txn, class_id, object_id, changes)
    }

    /// Apply structural edits to a reference-array field.
    pub fn edit_ref_array(
        &self,
        txn: &mut Transaction,
        class_id: ClassId,
        object_id: ObjectId,
        field_id: u16,
        edits: Vec<RefArrayEdit>,
    ) -> VeloxResult<()> {
        self.db.edit_ref_array(txn, class_id, object_id, field_id, edits)
    }

    /// Delete an object, honoring every tracked reference's delete policy.
    pub fn delete(&self, txn: &mut Transaction, class_id: ClassId, object_id: ObjectId) -> VeloxResult<()> {
        self.db.delete(txn, class_id, object_id)
    }

    /// Read one object's fields by (class-id, object-id), typed get per §9.
    pub fn get(&self, txn: &Transaction, class_id: ClassId, object_id: ObjectId) -> VeloxResult<Option<Vec<FieldValue>>> {
        self.db.get(txn, class_id, object_id)
    }

    /// Every live id in `class_id` at the transaction's snapshot version.
    pub fn scan(&self, txn: &Transaction, class_id: ClassId) -> VeloxResult<Vec<ObjectId>> {
        self.db.scan(txn, class_id)
    }

    /// Validate, append, and publish a transaction's changeset.
    pub fn commit(&self, txn: Transaction) -> VeloxResult<Version> {
        self.db.commit(txn)
    }

    /// Abandon a transaction without applying anything it recorded.
    pub fn rollback(&self, txn: Transaction) {
        self.db.rollback(txn)
    }

    /// Declare a new class.
    pub fn add_class(&self, descriptor: ClassDescriptor) -> VeloxResult<()> {
        self.db.add_class(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use velox_core::descriptor::PropertyDescriptor;
    use velox_core::descriptor::PropertyType;

    fn customer_descriptor() -> ClassDescriptor {
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
            indexes: vec![],
        }
    }

    #[test]
    fn create_then_commit_then_read_back_through_the_handle() {
        let dir = TempDir::new().unwrap();
        let handle = EngineHandle::open(dir.path()).unwrap();
        handle.add_class(customer_descriptor()).unwrap();

        let mut txn = handle.begin();
        let id = handle.create(&mut txn, ClassId::new(1), vec![FieldValue::String("bob".into())]).unwrap();
        handle.commit(txn).unwrap();

        let read = handle.begin();
        let row = handle.get(&read, ClassId::new(1), id).unwrap().unwrap();
        assert_eq!(row[0], FieldValue::String("bob".into()));
    }
}
