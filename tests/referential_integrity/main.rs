//! Delete-policy enforcement: `PreventDelete` blocks, `CascadeDelete`
//! chains transitively.

use tempfile::TempDir;
use veloxdb::ids::ClassId;
use veloxdb::{ClassDescriptor, DeletePolicy, Database, FieldValue, PropertyDescriptor, PropertyType};

const CUSTOMER: ClassId = ClassId::new(1);
const ORDER: ClassId = ClassId::new(2);
const LINE_ITEM: ClassId = ClassId::new(3);

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
        indexes: vec![],
    }
}

fn order_descriptor(policy: DeletePolicy) -> ClassDescriptor {
    ClassDescriptor {
        class_id: ORDER,
        name: "Order".into(),
        parent: None,
        abstract_class: false,
        properties: vec![PropertyDescriptor {
            field_id: 0,
            name: "customer".into(),
            property_type: PropertyType::Reference { target: CUSTOMER },
            delete_policy: Some(policy),
            tracked: true,
            required: true,
        }],
        indexes: vec![],
    }
}

fn line_item_descriptor() -> ClassDescriptor {
    ClassDescriptor {
        class_id: LINE_ITEM,
        name: "LineItem".into(),
        parent: None,
        abstract_class: false,
        properties: vec![PropertyDescriptor {
            field_id: 0,
            name: "order".into(),
            property_type: PropertyType::Reference { target: ORDER },
            delete_policy: Some(DeletePolicy::CascadeDelete),
            tracked: true,
            required: true,
        }],
        indexes: vec![],
    }
}

#[test]
fn prevent_delete_blocks_deleting_a_customer_with_a_live_order() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.add_class(customer_descriptor()).unwrap();
    db.add_class(order_descriptor(DeletePolicy::PreventDelete)).unwrap();

    let mut txn = db.begin();
    let bob = db.create(&mut txn, CUSTOMER, vec![FieldValue::String("bob".into())]).unwrap();
    let _order = db.create(&mut txn, ORDER, vec![FieldValue::Reference(Some(bob))]).unwrap();
    db.commit(txn).unwrap();

    let mut delete_txn = db.begin();
    let result = db.delete(&mut delete_txn, CUSTOMER, bob);
    assert!(result.is_err(), "a live PreventDelete reference must block the delete");

    let read_txn = db.begin();
    assert!(db.get(&read_txn, CUSTOMER, bob).unwrap().is_some(), "the customer must survive the rejected delete");
}

#[test]
fn cascade_delete_removes_a_customer_its_order_and_the_orders_line_items_transitively() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.add_class(customer_descriptor()).unwrap();
    db.add_class(order_descriptor(DeletePolicy::CascadeDelete)).unwrap();
    db.add_class(line_item_descriptor()).unwrap();

    let mut txn = db.begin();
    let bob = db.create(&mut txn, CUSTOMER, vec![FieldValue::String("bob".into())]).unwrap();
    let order = db.create(&mut txn, ORDER, vec![FieldValue::Reference(Some(bob))]).unwrap();
    let line_item = db.create(&mut txn, LINE_ITEM, vec![FieldValue::Reference(Some(order))]).unwrap();
    db.commit(txn).unwrap();

    let mut delete_txn = db.begin();
    db.delete(&mut delete_txn, CUSTOMER, bob).unwrap();
    db.commit(delete_txn).unwrap();

    let read_txn = db.begin();
    assert!(db.get(&read_txn, CUSTOMER, bob).unwrap().is_none());
    assert!(db.get(&read_txn, ORDER, order).unwrap().is_none(), "cascade must remove the dependent order");
    assert!(db.get(&read_txn, LINE_ITEM, line_item).unwrap().is_none(), "cascade must chain transitively through the order");
}

#[test]
fn set_to_null_clears_an_optional_reference_instead_of_deleting_the_source() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.add_class(customer_descriptor()).unwrap();

    let mut referrer_descriptor = order_descriptor(DeletePolicy::SetToNull);
    referrer_descriptor.properties[0].required = false;
    db.add_class(referrer_descriptor).unwrap();

    let mut txn = db.begin();
    let bob = db.create(&mut txn, CUSTOMER, vec![FieldValue::String("bob".into())]).unwrap();
    let order = db.create(&mut txn, ORDER, vec![FieldValue::Reference(Some(bob))]).unwrap();
    db.commit(txn).unwrap();

    let mut delete_txn = db.begin();
    db.delete(&mut delete_txn, CUSTOMER, bob).unwrap();
    db.commit(delete_txn).unwrap();

    let read_txn = db.begin();
    assert!(db.get(&read_txn, CUSTOMER, bob).unwrap().is_none());
    let order_fields = db.get(&read_txn, ORDER, order).unwrap().unwrap();
    assert_eq!(order_fields[0], FieldValue::Reference(None), "the order must survive with its reference cleared");
}
