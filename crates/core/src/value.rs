//! Runtime field values.
//!
//! [`FieldValue`] is the value every property slot in a record actually
//! holds. It mirrors [`crate::descriptor::PropertyType`] one variant at a
//! time; a record store or changeset decoder checking a value against its
//! class descriptor matches the two side by side.

use crate::ids::ObjectId;
use serde::{Deserialize, Serialize};

/// A value stored in one field of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A signed integer, width implied by the property descriptor.
    Int(i64),
    /// An unsigned integer, width implied by the property descriptor.
    UInt(u64),
    /// A float, width implied by the property descriptor.
    Float(f64),
    /// A boolean.
    Bool(bool),
    /// A UTC timestamp, milliseconds since the epoch.
    Timestamp(i64),
    /// An enumeration member index into the property's declared members.
    Enum(u32),
    /// A UTF-8 string.
    String(String),
    /// An array of simple (non-reference) values.
    Array(Vec<FieldValue>),
    /// A single, possibly-null reference.
    Reference(Option<ObjectId>),
    /// An ordered, possibly-duplicate array of references.
    ReferenceArray(Vec<ObjectId>),
    /// The field was never assigned and has no default (only valid for
    /// non-required properties).
    Null,
}

impl FieldValue {
    /// Whether this value is the null/empty sentinel.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null | FieldValue::Reference(None))
    }

    /// The referenced ids carried by this value, if it is a reference or
    /// reference-array field. Empty for every other variant.
    pub fn referenced_ids(&self) -> Vec<ObjectId> {
        match self {
            FieldValue::Reference(Some(id)) => vec![*id],
            FieldValue::Reference(None) => vec![],
            FieldValue::ReferenceArray(ids) => ids.clone(),
            _ => vec![],
        }
    }

    /// A short tag naming this value's kind, used in error messages and
    /// `IndexKeyTypeMismatch` detail strings.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Int(_) => "int",
            FieldValue::UInt(_) => "uint",
            FieldValue::Float(_) => "float",
            FieldValue::Bool(_) => "bool",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Enum(_) => "enum",
            FieldValue::String(_) => "string",
            FieldValue::Array(_) => "array",
            FieldValue::Reference(_) => "reference",
            FieldValue::ReferenceArray(_) => "reference_array",
            FieldValue::Null => "null",
        }
    }

    /// Canonical byte encoding used as a hash-index key component (§4.2).
    /// Order-preserving only within a single variant; distinct variants
    /// never collide because the kind tag is the first byte.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            FieldValue::Int(v) => {
                buf.push(0);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            FieldValue::UInt(v) => {
                buf.push(1);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            FieldValue::Float(v) => {
                buf.push(2);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            FieldValue::Bool(v) => {
                buf.push(3);
                buf.push(*v as u8);
            }
            FieldValue::Timestamp(v) => {
                buf.push(4);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            FieldValue::Enum(v) => {
                buf.push(5);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            FieldValue::String(s) => {
                buf.push(6);
                buf.extend_from_slice(s.as_bytes());
            }
            FieldValue::Reference(Some(id)) => {
                buf.push(7);
                buf.extend_from_slice(&id.get().to_be_bytes());
            }
            FieldValue::Reference(None) => {
                buf.push(8);
            }
            FieldValue::Array(_) | FieldValue::ReferenceArray(_) | FieldValue::Null => {
                buf.push(9);
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_empty_reference_are_null() {
        assert!(FieldValue::Null.is_null());
        assert!(FieldValue::Reference(None).is_null());
        assert!(!FieldValue::Int(0).is_null());
    }

    #[test]
    fn referenced_ids_extracts_single_and_array_refs() {
        let single = FieldValue::Reference(Some(ObjectId::new(5)));
        assert_eq!(single.referenced_ids(), vec![ObjectId::new(5)]);

        let many = FieldValue::ReferenceArray(vec![ObjectId::new(1), ObjectId::new(2)]);
        assert_eq!(many.referenced_ids(), vec![ObjectId::new(1), ObjectId::new(2)]);

        assert!(FieldValue::String("x".into()).referenced_ids().is_empty());
    }

    #[test]
    fn canonical_bytes_distinguish_variants_with_equal_payload() {
        let as_int = FieldValue::Int(1).canonical_bytes();
        let as_uint = FieldValue::UInt(1).canonical_bytes();
        assert_ne!(as_int, as_uint);
    }

    #[test]
    fn canonical_bytes_are_stable_for_equal_values() {
        assert_eq!(
            FieldValue::String("bob".into()).canonical_bytes(),
            FieldValue::String("bob".into()).canonical_bytes()
        );
    }

    #[test]
    fn kind_name_matches_variant() {
        assert_eq!(FieldValue::Bool(true).kind_name(), "bool");
        assert_eq!(FieldValue::ReferenceArray(vec![]).kind_name(), "reference_array");
    }
}
