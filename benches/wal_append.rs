//! Write-ahead log append and group-commit throughput (§4.8, §10.6).

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;
use velox_core::changeset::{ChangeSet, Operation};
use velox_core::ids::{ClassId, ObjectId, Version};
use velox_core::value::FieldValue;
use velox_durability::WalWriter;

fn changeset() -> ChangeSet {
    let mut cs = ChangeSet::new();
    cs.push(Operation::Create {
        class_id: ClassId::new(1),
        object_id: ObjectId::new(1),
        fields: vec![FieldValue::String("bob".into())],
    });
    cs
}

fn bench_append_unsynced(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let (mut wal, _frames, _torn) = WalWriter::open(dir.path(), "log").unwrap();

    let mut group = c.benchmark_group("wal");
    group.throughput(Throughput::Elements(1));

    let counter = AtomicU64::new(1);
    group.bench_function("append_unsynced", |b| {
        b.iter(|| {
            let version = counter.fetch_add(1, Ordering::SeqCst);
            wal.append(Version::new(version), changeset()).unwrap();
        })
    });
    group.finish();
}

fn bench_append_then_fsync(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let (mut wal, _frames, _torn) = WalWriter::open(dir.path(), "log").unwrap();

    let mut group = c.benchmark_group("wal");
    group.throughput(Throughput::Elements(1));

    let counter = AtomicU64::new(1);
    group.bench_function("append_then_fsync", |b| {
        b.iter(|| {
            let version = counter.fetch_add(1, Ordering::SeqCst);
            wal.append(Version::new(version), changeset()).unwrap();
            wal.flush().unwrap();
        })
    });
    group.finish();
}

criterion_group!(benches, bench_append_unsynced, bench_append_then_fsync);
criterion_main!(benches);
