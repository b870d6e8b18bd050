//! The changeset wire format: an ordered, self-describing sequence of
//! per-object operations produced by a committing transaction and consumed
//! by the WAL persister and the replicator (§3, §6).

use crate::descriptor::DeletePolicy;
use crate::error::VeloxError;
use crate::ids::{ClassId, ObjectId};
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};

/// A structural edit to a reference-array field (§4.1: "reference-array
/// mutations are recorded as structural edits ... so the changeset encodes
/// the edit rather than the post-image array").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RefArrayEdit {
    /// Insert `id` at index `at`, shifting later elements right.
    Insert {
        /// Insertion point.
        at: u32,
        /// The reference being inserted.
        id: ObjectId,
    },
    /// Remove the element at index `at`, shifting later elements left.
    RemoveAt {
        /// Index of the element to remove.
        at: u32,
    },
    /// Replace the element at index `at` with `id`.
    Replace {
        /// Index of the element to replace.
        at: u32,
        /// The new reference value.
        id: ObjectId,
    },
    /// Replace the whole array with `ids`.
    SetAll {
        /// The new array contents, in order.
        ids: Vec<ObjectId>,
    },
}

/// One per-object operation inside a changeset (§6: "per-operation records
/// tagged with [u8 op-kind][u16 class-id][u64 object-id] and op-specific
/// payload").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// A new record was created with the given initial field values.
    Create {
        /// The class of the new record.
        class_id: ClassId,
        /// The id assigned to the new record.
        object_id: ObjectId,
        /// Initial values, indexed by field id position.
        fields: Vec<FieldValue>,
    },
    /// An existing record's fields were updated. `field_id`/`value` pairs
    /// name only the fields that changed.
    Update {
        /// The class of the updated record.
        class_id: ClassId,
        /// The id of the updated record.
        object_id: ObjectId,
        /// The changed fields, as (field id, new value) pairs.
        fields: Vec<(u16, FieldValue)>,
    },
    /// A record was tombstoned.
    Delete {
        /// The class of the deleted record.
        class_id: ClassId,
        /// The id of the deleted record.
        object_id: ObjectId,
    },
    /// A reference-array field on an existing record received structural
    /// edits (§4.1), applied in order.
    RefArrayEdit {
        /// The class of the edited record.
        class_id: ClassId,
        /// The id of the edited record.
        object_id: ObjectId,
        /// The field holding the array.
        field_id: u16,
        /// The edits to apply, in order.
        edits: Vec<RefArrayEdit>,
        /// The delete policy in effect for this reference field, carried so
        /// a replica applying the changeset does not need its own
        /// descriptor lookup to enforce it.
        delete_policy: DeletePolicy,
    },
}

impl Operation {
    /// The class this operation touches.
    pub fn class_id(&self) -> ClassId {
        match self {
            Operation::Create { class_id, .. }
            | Operation::Update { class_id, .. }
            | Operation::Delete { class_id, .. }
            | Operation::RefArrayEdit { class_id, .. } => *class_id,
        }
    }

    /// The object this operation touches.
    pub fn object_id(&self) -> ObjectId {
        match self {
            Operation::Create { object_id, .. }
            | Operation::Update { object_id, .. }
            | Operation::Delete { object_id, .. }
            | Operation::RefArrayEdit { object_id, .. } => *object_id,
        }
    }

}

/// An ordered, self-describing sequence of operations produced by one
/// committing transaction (§3). Serves both as a WAL frame payload and as a
/// replication message body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// The operations, in the order the transaction issued them. Order
    /// matters: a `Create` must precede any `Update`/`RefArrayEdit` on the
    /// same object within one changeset.
    pub operations: Vec<Operation>,
}

impl ChangeSet {
    /// An empty changeset.
    pub fn new() -> Self {
        Self { operations: Vec::new() }
    }

    /// Append an operation.
    pub fn push(&mut self, op: Operation) {
        self.operations.push(op);
    }

    /// Whether this changeset carries no operations (a read-only
    /// transaction's commit, for instance).
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Encode this changeset with the header described in §6: a leading
    /// `[u32 frame-count]` followed by msgpack-encoded operations.
    pub fn encode(&self) -> Result<Vec<u8>, VeloxError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.operations.len() as u32).to_le_bytes());
        let body = rmp_serde::to_vec(&self.operations)?;
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a changeset previously produced by [`ChangeSet::encode`].
    /// Fails with `ChangesetCorrupted` if the frame count does not match
    /// the decoded operation count, or if the body fails to decode.
    pub fn decode(bytes: &[u8]) -> Result<Self, VeloxError> {
        if bytes.len() < 4 {
            return Err(VeloxError::changeset_corrupted("frame shorter than header"));
        }
        let declared_count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let operations: Vec<Operation> = rmp_serde::from_slice(&bytes[4..])?;
        if operations.len() != declared_count {
            return Err(VeloxError::changeset_corrupted(format!(
                "frame-count header said {declared_count}, decoded {}",
                operations.len()
            )));
        }
        Ok(ChangeSet { operations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_create() -> Operation {
        Operation::Create {
            class_id: ClassId::new(1),
            object_id: ObjectId::new(42),
            fields: vec![FieldValue::String("a".into()), FieldValue::Int(7)],
        }
    }

    #[test]
    fn changeset_roundtrips_through_encode_decode() {
        let mut cs = ChangeSet::new();
        cs.push(sample_create());
        cs.push(Operation::Delete { class_id: ClassId::new(1), object_id: ObjectId::new(1) });

        let bytes = cs.encode().unwrap();
        let decoded = ChangeSet::decode(&bytes).unwrap();
        assert_eq!(decoded.operations.len(), 2);
        assert_eq!(decoded.operations[0].object_id(), ObjectId::new(42));
    }

    #[test]
    fn empty_changeset_is_empty() {
        assert!(ChangeSet::new().is_empty());
    }

    #[test]
    fn decode_rejects_truncated_header() {
        assert!(ChangeSet::decode(&[1, 2]).is_err());
    }

    #[test]
    fn decode_rejects_mismatched_frame_count() {
        let mut cs = ChangeSet::new();
        cs.push(sample_create());
        let mut bytes = cs.encode().unwrap();
        bytes[0..4].copy_from_slice(&99u32.to_le_bytes());
        let err = ChangeSet::decode(&bytes).unwrap_err();
        assert!(matches!(err, VeloxError::ChangesetCorrupted { .. }));
    }

    #[test]
    fn class_id_and_object_id_accessors_cover_every_variant() {
        let ops = vec![
            sample_create(),
            Operation::Update { class_id: ClassId::new(3), object_id: ObjectId::new(5), fields: vec![] },
            Operation::Delete { class_id: ClassId::new(3), object_id: ObjectId::new(5) },
        ];
        for op in ops {
            assert_eq!(op.object_id().get() > 0, true);
        }
    }
}
