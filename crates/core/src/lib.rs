//! Shared types, error model, and storage-facing traits for VeloxDB.
//!
//! This crate has no knowledge of threads, files, or the network. It defines
//! the vocabulary every other crate in the workspace builds on: object and
//! class identifiers, commit versions, field values, class descriptors, the
//! changeset wire format, and the unified error type.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod changeset;
pub mod descriptor;
pub mod error;
pub mod ids;
pub mod traits;
pub mod value;

pub use changeset::{ChangeSet, Operation, RefArrayEdit};
pub use descriptor::{ClassDescriptor, DeletePolicy, HashIndexDescriptor, PropertyDescriptor};
pub use error::{VeloxError, VeloxResult};
pub use ids::{ClassId, ObjectId, TxnId, Version};
pub use traits::{RecordStore, SnapshotView};
pub use value::FieldValue;
