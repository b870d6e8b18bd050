//! Unique hash index enforcement and lookup.

use tempfile::TempDir;
use veloxdb::ids::ClassId;
use veloxdb::{ClassDescriptor, Database, FieldValue, HashIndexDescriptor, PropertyDescriptor, PropertyType};

const CUSTOMER: ClassId = ClassId::new(1);

fn customer_descriptor() -> ClassDescriptor {
    ClassDescriptor {
        class_id: CUSTOMER,
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
fn a_unique_index_rejects_a_second_live_record_sharing_the_same_key() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.add_class(customer_descriptor()).unwrap();

    let mut txn = db.begin();
    let bob = db.create(&mut txn, CUSTOMER, vec![FieldValue::String("bob".into())]).unwrap();
    db.commit(txn).unwrap();

    let mut conflicting = db.begin();
    db.create(&mut conflicting, CUSTOMER, vec![FieldValue::String("bob".into())]).unwrap();
    let result = db.commit(conflicting);
    assert!(result.is_err(), "a second live record with the same unique key must be rejected at commit");

    let read_txn = db.begin();
    let hits = db.lookup(&read_txn, CUSTOMER, "Customer.userName", &[FieldValue::String("bob".into())]).unwrap();
    assert_eq!(hits, vec![bob]);
}

#[test]
fn a_unique_index_admits_the_key_again_once_the_prior_holder_is_deleted() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.add_class(customer_descriptor()).unwrap();

    let mut txn = db.begin();
    let bob = db.create(&mut txn, CUSTOMER, vec![FieldValue::String("bob".into())]).unwrap();
    db.commit(txn).unwrap();

    let mut delete_txn = db.begin();
    db.delete(&mut delete_txn, CUSTOMER, bob).unwrap();
    db.commit(delete_txn).unwrap();

    let mut replacement = db.begin();
    let new_bob = db.create(&mut replacement, CUSTOMER, vec![FieldValue::String("bob".into())]).unwrap();
    db.commit(replacement).unwrap();

    let read_txn = db.begin();
    let hits = db.lookup(&read_txn, CUSTOMER, "Customer.userName", &[FieldValue::String("bob".into())]).unwrap();
    assert_eq!(hits, vec![new_bob]);
}

#[test]
fn lookup_on_a_key_with_no_live_record_returns_empty() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.add_class(customer_descriptor()).unwrap();

    let read_txn = db.begin();
    let hits = db.lookup(&read_txn, CUSTOMER, "Customer.userName", &[FieldValue::String("nobody".into())]).unwrap();
    assert!(hits.is_empty());
}
