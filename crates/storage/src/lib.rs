//! In-memory data structures for the VeloxDB record store (§4.1), hash
//! index (§4.2), and inverse-reference map (§4.3).
//!
//! This crate owns no files and no network sockets: durability and
//! replication are handled by `velox-durability` and `velox-replication`.
//! What lives here is the MVCC-versioned, id-partitioned data structures
//! that `velox-concurrency` mutates under lock and `velox-engine` wires
//! into a database handle.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod class_store;
pub mod hash_index;
pub mod id_gen;
pub mod inverse_ref;
pub mod record_store;

pub use class_store::{ClassRegistry, ClassStore};
pub use hash_index::{encode_key, HashIndex, IndexKey};
pub use id_gen::IdGenerator;
pub use inverse_ref::{InverseRefMap, RefSlot};
pub use record_store::ClassRecordStore;
