//! Record store throughput: sharded create/read/update against a single
//! class container, independent of locking or WAL (§10.6).

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use velox_core::traits::RecordStore;
use veloxdb::ids::{ClassId, ObjectId, Version};
use veloxdb::{ClassDescriptor, FieldValue, PropertyDescriptor, PropertyType};
use velox_storage::ClassRecordStore;

fn descriptor() -> ClassDescriptor {
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

fn bench_create(c: &mut Criterion) {
    let store = ClassRecordStore::new(descriptor());
    let mut group = c.benchmark_group("record_store");
    group.throughput(Throughput::Elements(1));

    let counter = AtomicU64::new(0);
    group.bench_function("create", |b| {
        b.iter(|| {
            let i = counter.fetch_add(1, Ordering::SeqCst);
            store
                .create(ClassId::new(1), ObjectId::new(i + 1), Version::new(i + 1), vec![FieldValue::String("bob".into())])
                .unwrap();
        })
    });
    group.finish();
}

fn bench_read_head(c: &mut Criterion) {
    let store = ClassRecordStore::new(descriptor());
    for i in 0..10_000u64 {
        store
            .create(ClassId::new(1), ObjectId::new(i + 1), Version::new(i + 1), vec![FieldValue::String("bob".into())])
            .unwrap();
    }

    let mut group = c.benchmark_group("record_store");
    group.throughput(Throughput::Elements(1));

    let counter = AtomicU64::new(0);
    group.bench_function("read_head", |b| {
        b.iter(|| {
            let i = counter.fetch_add(1, Ordering::SeqCst) % 10_000;
            store.read_head(ObjectId::new(i + 1))
        })
    });
    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let store = ClassRecordStore::new(descriptor());
    for i in 0..10_000u64 {
        store
            .create(ClassId::new(1), ObjectId::new(i + 1), Version::new(i + 1), vec![FieldValue::String("bob".into())])
            .unwrap();
    }

    let mut group = c.benchmark_group("record_store");
    group.throughput(Throughput::Elements(1));

    let version_counter = AtomicU64::new(10_001);
    let target_counter = AtomicU64::new(0);
    group.bench_function("update", |b| {
        b.iter(|| {
            let version = version_counter.fetch_add(1, Ordering::SeqCst);
            let target = target_counter.fetch_add(1, Ordering::SeqCst) % 10_000;
            store
                .update(ClassId::new(1), ObjectId::new(target + 1), Version::new(version), vec![FieldValue::String("alice".into())])
                .unwrap();
        })
    });
    group.finish();
}

criterion_group!(benches, bench_create, bench_read_head, bench_update);
criterion_main!(benches);
