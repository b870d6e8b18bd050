//! Hash index: multi-key equality index with unique/non-unique modes
//! (§4.2).
//!
//! The table is partitioned the same way [`crate::record_store`] partitions
//! records — fixed shards, each independently lockable — so concurrent
//! writers touching disjoint keys proceed without contending on a single
//! global lock. A key is the canonical byte encoding of the 1-4 indexed
//! properties, built from [`velox_core::value::FieldValue::canonical_bytes`].

use dashmap::DashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use velox_core::ids::ObjectId;
use velox_core::value::FieldValue;

const SHARD_COUNT: usize = 16;

/// The canonical byte encoding of a key tuple (§4.2).
pub type IndexKey = Vec<u8>;

/// Build the canonical key for a tuple of field values, in declared
/// key-field order. Distinct fields are separated by a length prefix so a
/// string ending in bytes that look like the next field's tag can never
/// collide with a different tuple.
pub fn encode_key(values: &[FieldValue]) -> IndexKey {
    let mut buf = Vec::new();
    for v in values {
        let bytes = v.canonical_bytes();
        buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(&bytes);
    }
    buf
}

fn shard_of(key: &IndexKey) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in key {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash as usize) % SHARD_COUNT
}

/// A single hash index over one or more classes sharing the index
/// definition.
pub struct HashIndex {
    name: String,
    unique: bool,
    shards: Vec<DashMap<IndexKey, RwLock<SmallVec<[ObjectId; 1]>>>>,
    /// Set while a newly added index is being populated over an
    /// already-populated class (§4.2 "pending refill").
    refilling: AtomicBool,
}

impl HashIndex {
    /// A new, empty index. `refilling` starts true when the index is added
    /// over an already-populated class; false for an index created
    /// alongside a brand new, empty class.
    pub fn new(name: impl Into<String>, unique: bool, refilling: bool) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| DashMap::new()).collect();
        Self { name: name.into(), unique, shards, refilling: AtomicBool::new(refilling) }
    }

    /// The index's declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this index enforces uniqueness.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether the index is still in its pending-refill state (§4.2).
    /// Lookups during refill must fall back to a class scan.
    pub fn is_refilling(&self) -> bool {
        self.refilling.load(Ordering::Acquire)
    }

    /// Mark the index fully authoritative once the background refill job
    /// completes (§4.2: "becomes fully authoritative when refill completes").
    pub fn mark_refilled(&self) {
        self.refilling.store(false, Ordering::Release);
    }

    /// Ids currently associated with `key`, live or staged. Empty if the
    /// key is absent.
    pub fn lookup(&self, key: &IndexKey) -> Vec<ObjectId> {
        let shard = &self.shards[shard_of(key)];
        shard.get(key).map(|ids| ids.read().to_vec()).unwrap_or_default()
    }

    /// Insert `id` under `key`. Does not itself enforce uniqueness — that
    /// check happens at commit under the key's lock (§4.2, §4.4), since a
    /// non-conflicting staged insert from a losing transaction must not
    /// corrupt the table before its writer even reaches validation.
    pub fn insert(&self, key: IndexKey, id: ObjectId) {
        let shard = &self.shards[shard_of(&key)];
        let slot = shard.entry(key).or_default();
        let mut ids = slot.write();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Remove `id` from `key`'s bucket, dropping the bucket entirely once
    /// empty.
    pub fn remove(&self, key: &IndexKey, id: ObjectId) {
        let shard = &self.shards[shard_of(key)];
        let mut drop_entry = false;
        if let Some(slot) = shard.get(key) {
            let mut ids = slot.write();
            ids.retain(|existing| *existing != id);
            drop_entry = ids.is_empty();
        }
        if drop_entry {
            shard.remove(key);
        }
    }

    /// Whether `key` currently maps to any id other than `excluding`
    /// (§4.2: "validated at commit by rechecking inserted/updated keys").
    pub fn has_other_occupant(&self, key: &IndexKey, excluding: ObjectId) -> bool {
        self.lookup(key).iter().any(|id| *id != excluding)
    }

    /// Every occupied key and its ids, for a snapshot dump (§4.8: "per-index
    /// states"). Order is unspecified.
    pub fn snapshot_entries(&self) -> Vec<(IndexKey, Vec<ObjectId>)> {
        let mut entries = Vec::new();
        for shard in &self.shards {
            for item in shard.iter() {
                entries.push((item.key().clone(), item.value().read().to_vec()));
            }
        }
        entries
    }

    /// Drop every key and id, e.g. before repopulating from a rewound
    /// record set (§4.6). Does not touch `refilling`.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.clear();
        }
    }

    /// Rebuild an index from a snapshot dump, restoring it already
    /// authoritative (a snapshot only ever captures committed, fully
    /// populated indexes — one mid-refill would not yet be durable).
    pub fn from_snapshot_entries(
        name: impl Into<String>,
        unique: bool,
        entries: Vec<(IndexKey, Vec<ObjectId>)>,
    ) -> Self {
        let index = Self::new(name, unique, false);
        for (key, ids) in entries {
            let shard = &index.shards[shard_of(&key)];
            shard.insert(key, RwLock::new(SmallVec::from_vec(ids)));
        }
        index
    }
}
