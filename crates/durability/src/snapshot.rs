//! Snapshot files: a full, versioned dump of every class's records and
//! indexes, written to the currently-inactive snapshot letter and pointed
//! to by the header only once it is entirely durable (§4.8, §6).
//!
//! The on-disk shape is `[magic b"VLXS"][u32 format version][msgpack
//! SnapshotData][u32 crc32c]`. Every descriptor type already derives
//! `Serialize`/`Deserialize`, so the body is one `rmp_serde` call rather
//! than a hand-rolled per-section binary layout.

use crate::header::Letter;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use velox_core::descriptor::ClassDescriptor;
use velox_core::ids::{ClassId, ObjectId, Version};
use velox_core::value::FieldValue;
use velox_core::{VeloxError, VeloxResult};
use velox_storage::hash_index::IndexKey;
use velox_storage::{ClassRegistry, ClassStore};

const MAGIC: &[u8; 4] = b"VLXS";
const FORMAT_VERSION: u32 = 1;

/// One class's record and index state as of the snapshot's version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSnapshot {
    /// The class this section belongs to.
    pub class_id: ClassId,
    /// Every id visible at the snapshot version, with its field values.
    pub records: Vec<(ObjectId, Vec<FieldValue>)>,
    /// Every declared index's full key -> ids table.
    pub indexes: Vec<IndexSnapshot>,
}

/// One hash index's dumped contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// The index's declared name.
    pub name: String,
    /// Whether it enforces uniqueness.
    pub unique: bool,
    /// Every occupied key and the ids it maps to.
    pub entries: Vec<(IndexKey, Vec<ObjectId>)>,
}

/// The full contents of one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotData {
    /// The commit version this snapshot represents: every record reflects
    /// state as of exactly this version, and restore only needs to replay
    /// log frames with a strictly greater commit version (§4.8).
    pub version: Version,
    /// Every declared class, abstract or concrete, so the model survives
    /// a restore even though abstract classes own no record container
    /// (§3, §9).
    pub descriptors: Vec<ClassDescriptor>,
    /// Concrete classes' record and index state.
    pub classes: Vec<ClassSnapshot>,
    /// The highest object id allocated as of this snapshot, so the id
    /// generator resumes from the right place (§3, §4.1).
    pub last_allocated_id: u64,
}

fn snapshot_path(dir: &Path, stem: &str, letter: Letter) -> PathBuf {
    dir.join(format!("{stem}.{}", letter.suffix()))
}

/// Writes a full snapshot to the given letter, atomically (write-temp,
/// fsync, rename, fsync dir) so a crash mid-write never leaves a partial
/// file at the final path.
pub struct SnapshotWriter;

impl SnapshotWriter {
    /// Build the in-memory [`SnapshotData`] for everything currently
    /// registered, as of `version`.
    pub fn collect(
        version: Version,
        descriptors: Vec<ClassDescriptor>,
        registry: &ClassRegistry,
        last_allocated_id: u64,
    ) -> SnapshotData {
        let mut classes = Vec::new();
        for class_id in registry.class_ids() {
            let Some(store) = registry.get(class_id) else { continue };
            let Some(records) = &store.records else { continue };
            let dump = records.snapshot_dump(version);
            let indexes = collect_indexes(&store);
            classes.push(ClassSnapshot { class_id, records: dump, indexes });
        }
        SnapshotData { version, descriptors, classes, last_allocated_id }
    }

    /// Encode and durably write `data` to `dir/stem.<letter>`.
    pub fn write(dir: &Path, stem: &str, letter: Letter, data: &SnapshotData) -> VeloxResult<()> {
        std::fs::create_dir_all(dir)?;
        let body = rmp_serde::to_vec(data)?;
        let crc = crc32fast::hash(&body);

        let mut buf = Vec::with_capacity(4 + 4 + body.len() + 4);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&crc.to_le_bytes());

        let final_path = snapshot_path(dir, stem, letter);
        let temp_path = dir.join(format!(".{stem}.{}.tmp", letter.suffix()));
        {
            let mut f = std::fs::File::create(&temp_path)?;
            f.write_all(&buf)?;
            f.sync_all()?;
        }
        std::fs::rename(&temp_path, &final_path)?;
        let d = std::fs::File::open(dir)?;
        d.sync_all()?;
        Ok(())
    }
}

fn collect_indexes(store: &ClassStore) -> Vec<IndexSnapshot> {
    store
        .indexes
        .iter()
        .map(|entry| {
            let idx = entry.value();
            IndexSnapshot { name: idx.name().to_string(), unique: idx.is_unique(), entries: idx.snapshot_entries() }
        })
        .collect()
}

/// Reads and validates a snapshot file.
pub struct SnapshotReader;

impl SnapshotReader {
    /// Read and validate the snapshot at `dir/stem.<letter>`. Returns
    /// `Ok(None)` if the file does not exist (an empty, never-snapshotted
    /// database); any other error (bad magic, checksum mismatch,
    /// truncation) is `VeloxError::LogCorrupted` since a torn snapshot is
    /// exactly as recoverable-by-falling-back as a torn WAL frame would be
    /// (§4.8, §7: the other letter's snapshot, or a from-scratch replay,
    /// covers for it).
    pub fn read(dir: &Path, stem: &str, letter: Letter) -> VeloxResult<Option<SnapshotData>> {
        let path = snapshot_path(dir, stem, letter);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < 4 + 4 + 4 {
            return Err(VeloxError::log_corrupted("snapshot shorter than its fixed header/footer"));
        }
        if &bytes[0..4] != MAGIC {
            return Err(VeloxError::log_corrupted("snapshot magic mismatch"));
        }
        let format_version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if format_version != FORMAT_VERSION {
            return Err(VeloxError::log_corrupted(format!("unsupported snapshot format version {format_version}")));
        }

        let body = &bytes[8..bytes.len() - 4];
        let stored_crc = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        let computed_crc = crc32fast::hash(body);
        if computed_crc != stored_crc {
            return Err(VeloxError::log_corrupted("snapshot checksum mismatch"));
        }

        let data: SnapshotData = rmp_serde::from_slice(body)?;
        Ok(Some(data))
    }
}

/// Rebuild a [`ClassRegistry`] from a validated snapshot.
pub fn restore_registry(data: &SnapshotData) -> ClassRegistry {
    use std::collections::HashMap;
    use velox_storage::HashIndex;

    let registry = ClassRegistry::new();
    let dumped: HashMap<ClassId, &ClassSnapshot> = data.classes.iter().map(|c| (c.class_id, c)).collect();

    for descriptor in &data.descriptors {
        if descriptor.abstract_class {
            registry.register(descriptor.class_id, ClassStore::abstract_placeholder());
            continue;
        }
        let store = ClassStore::concrete(descriptor.clone());
        if let Some(dump) = dumped.get(&descriptor.class_id) {
            if let Some(records) = &store.records {
                for (object_id, fields) in &dump.records {
                    records.restore_row(*object_id, data.version, fields.clone());
                }
            }
            for index_dump in &dump.indexes {
                store.indexes.insert(
                    index_dump.name.clone(),
                    std::sync::Arc::new(HashIndex::from_snapshot_entries(
                        index_dump.name.clone(),
                        index_dump.unique,
                        index_dump.entries.clone(),
                    )),
                );
            }
        }
        registry.register(descriptor.class_id, store);
    }
    registry
}
