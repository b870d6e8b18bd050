//! Insert/read and write-write conflict scenarios against the public
//! `veloxdb` surface.

use tempfile::TempDir;
use veloxdb::ids::ClassId;
use veloxdb::{ClassDescriptor, Database, FieldValue, PropertyDescriptor, PropertyType};

fn customer_descriptor() -> ClassDescriptor {
    ClassDescriptor {
        class_id: ClassId::new(1),
        name: "Customer".into(),
        parent: None,
        abstract_class: false,
        properties: vec![
            PropertyDescriptor {
                field_id: 0,
                name: "userName".into(),
                property_type: PropertyType::String,
                delete_policy: None,
                tracked: false,
                required: true,
            },
            PropertyDescriptor {
                field_id: 1,
                name: "balance".into(),
                property_type: PropertyType::Int(64),
                delete_policy: None,
                tracked: false,
                required: true,
            },
        ],
        indexes: vec![],
    }
}

fn open_with_customers() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.add_class(customer_descriptor()).unwrap();
    (dir, db)
}

#[test]
fn insert_then_read_back_in_a_fresh_transaction() {
    let (_dir, db) = open_with_customers();

    let mut write_txn = db.begin();
    let bob = db
        .create(
            &mut write_txn,
            ClassId::new(1),
            vec![FieldValue::String("bob".into()), FieldValue::Int(100)],
        )
        .unwrap();
    let committed = db.commit(write_txn).unwrap();
    assert!(committed.get() > 0);

    let read_txn = db.begin();
    let fields = db.get(&read_txn, ClassId::new(1), bob).unwrap().unwrap();
    assert_eq!(fields[0], FieldValue::String("bob".into()));
    assert_eq!(fields[1], FieldValue::Int(100));

    let ids = db.scan(&read_txn, ClassId::new(1)).unwrap();
    assert_eq!(ids, vec![bob]);
}

#[test]
fn a_read_only_transaction_never_observes_a_concurrent_writers_uncommitted_change() {
    let (_dir, db) = open_with_customers();

    let mut setup = db.begin();
    let bob = db
        .create(
            &mut setup,
            ClassId::new(1),
            vec![FieldValue::String("bob".into()), FieldValue::Int(100)],
        )
        .unwrap();
    db.commit(setup).unwrap();

    let reader = db.begin();
    let mut writer = db.begin();
    db.update(&mut writer, ClassId::new(1), bob, vec![(1, FieldValue::Int(999))]).unwrap();
    db.commit(writer).unwrap();

    let fields = db.get(&reader, ClassId::new(1), bob).unwrap().unwrap();
    assert_eq!(fields[1], FieldValue::Int(100), "snapshot reader must not see the later commit");
}

#[test]
fn two_concurrent_writers_racing_on_the_same_object_one_wins_one_is_told_immediately() {
    let (_dir, db) = open_with_customers();

    let mut setup = db.begin();
    let bob = db
        .create(
            &mut setup,
            ClassId::new(1),
            vec![FieldValue::String("bob".into()), FieldValue::Int(100)],
        )
        .unwrap();
    db.commit(setup).unwrap();

    let mut txn_a = db.begin();
    let mut txn_b = db.begin();

    db.update(&mut txn_a, ClassId::new(1), bob, vec![(1, FieldValue::Int(200))]).unwrap();

    let second_writer_result = db.update(&mut txn_b, ClassId::new(1), bob, vec![(1, FieldValue::Int(300))]);
    assert!(
        second_writer_result.is_err(),
        "fail-fast locking must reject the second writer immediately, not queue it"
    );

    db.commit(txn_a).unwrap();
    db.rollback(txn_b);

    let read_txn = db.begin();
    let fields = db.get(&read_txn, ClassId::new(1), bob).unwrap().unwrap();
    assert_eq!(fields[1], FieldValue::Int(200));
}

#[test]
fn a_writer_that_pinned_a_stale_read_version_loses_the_race_to_a_later_committer() {
    let (_dir, db) = open_with_customers();

    let mut setup = db.begin();
    let bob = db
        .create(
            &mut setup,
            ClassId::new(1),
            vec![FieldValue::String("bob".into()), FieldValue::Int(100)],
        )
        .unwrap();
    db.commit(setup).unwrap();

    let mut stale = db.begin();
    let _ = db.get(&stale, ClassId::new(1), bob).unwrap();

    let mut fresh = db.begin();
    db.update(&mut fresh, ClassId::new(1), bob, vec![(1, FieldValue::Int(500))]).unwrap();
    db.commit(fresh).unwrap();

    let result = db.update(&mut stale, ClassId::new(1), bob, vec![(1, FieldValue::Int(999))]);
    assert!(result.is_err(), "a writer racing against an already-committed newer version must be told it lost");
}
