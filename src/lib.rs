//! # VeloxDB
//!
//! An in-memory, object-oriented, strictly-serializable database engine.
//!
//! VeloxDB stores typed, versioned records organized into classes with
//! declared properties, references, and hash indexes. Transactions are
//! optimistic and fail-fast: a conflicting writer is told immediately
//! rather than queued, and every committed transaction is ordered,
//! durable, and (optionally) replicated before it returns.
//!
//! # Quick start
//!
//! ```no_run
//! use veloxdb::{ClassDescriptor, Database, FieldValue, PropertyDescriptor, PropertyType};
//! use veloxdb::ids::ClassId;
//!
//! fn main() -> veloxdb::Result<()> {
//!     let db = Database::open("./data")?;
//!     db.add_class(ClassDescriptor {
//!         class_id: ClassId::new(1),
//!         name: "Customer".into(),
//!         parent: None,
//!         abstract_class: false,
//!         properties: vec![PropertyDescriptor {
//!             field_id: 0,
//!             name: "userName".into(),
//!             property_type: PropertyType::String,
//!             delete_policy: None,
//!             tracked: false,
//!             required: true,
//!         }],
//!         indexes: vec![],
//!     })?;
//!
//!     let mut txn = db.begin();
//!     let id = db.create(&mut txn, ClassId::new(1), vec![FieldValue::String("bob".into())])?;
//!     db.commit(txn)?;
//!
//!     let read = db.begin();
//!     assert!(db.get(&read, ClassId::new(1), id)?.is_some());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The [`Database`] handle in `velox-engine` is the one type that spans
//! every layer: record storage and indexing (`velox-storage`), lock
//! acquisition and transaction lifecycle (`velox-concurrency`), the WAL and
//! snapshots (`velox-durability`), and cluster replication
//! (`velox-replication`). This crate re-exports the stable surface of all
//! of them; `velox-api` builds the engine control surface (create-log,
//! update-assemblies, status, create-snapshot, rewind, fail-over) on top.
//!
//! The wire protocol, connection pooling, the administrative CLI, and the
//! DTO-to-record mapping generator are collaborators outside this core and
//! are not part of this crate.

#![warn(missing_docs)]

pub use velox_core::changeset::{ChangeSet, Operation, RefArrayEdit};
pub use velox_core::descriptor::{
    ClassDescriptor, DeletePolicy, HashIndexDescriptor, PropertyDescriptor, PropertyType,
};
pub use velox_core::value::FieldValue;
pub use velox_core::{VeloxError, VeloxResult as Result};

/// Newtypes for object, class, and transaction identity (§3).
pub mod ids {
    pub use velox_core::ids::{ClassId, ObjectId, TxnId, Version};
}

pub use velox_concurrency::{Transaction, TransactionStatus};
pub use velox_engine::{Database, DurabilityMode, VeloxConfig};
pub use velox_replication::{AckMode, ClusterConfig, WriterRole};

pub use velox_api::{control, EngineHandle};
