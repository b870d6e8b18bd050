//! Class and property descriptors: the model & schema vocabulary (§4.9).
//!
//! A [`ClassDescriptor`] is the one source of truth for a class's layout.
//! Readers never observe a half-updated descriptor: the descriptor table is
//! swapped atomically by the model-update protocol in `velox-engine`, and
//! every descriptor reachable from a live transaction is immutable for the
//! lifetime of that transaction.

use crate::ids::ClassId;
use serde::{Deserialize, Serialize};

/// The declared type of a property (§3: "fixed-width fields ... variable-length
/// strings, arrays of simple types, and reference fields").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    /// Signed integer of the given bit width (8, 16, 32, or 64).
    Int(u8),
    /// Unsigned integer of the given bit width (8, 16, 32, or 64).
    UInt(u8),
    /// IEEE-754 float, 32 or 64 bits wide.
    Float(u8),
    /// A boolean flag.
    Bool,
    /// A UTC timestamp, millisecond resolution.
    Timestamp,
    /// A named enumeration, with its declared member strings.
    Enum(Vec<String>),
    /// A UTF-8 string of unbounded length.
    String,
    /// An ordered array of a simple (non-reference) element type.
    Array(Box<PropertyType>),
    /// A single, possibly-null reference to `target`.
    Reference {
        /// The class a valid reference value must point to (or a subtype).
        target: ClassId,
    },
    /// An ordered, possibly-duplicate array of references to `target`.
    ReferenceArray {
        /// The class every element must point to (or a subtype).
        target: ClassId,
    },
}

impl PropertyType {
    /// Whether this property type is itself a reference or holds references.
    pub fn is_reference(&self) -> bool {
        matches!(self, PropertyType::Reference { .. } | PropertyType::ReferenceArray { .. })
    }

    /// Whether `self` is a type-compatible widening of `other` (§4.9:
    /// "widen integer, widen numeric precision are allowed"). Every type is
    /// trivially compatible with itself.
    pub fn is_widening_of(&self, other: &PropertyType) -> bool {
        match (self, other) {
            (PropertyType::Int(new_w), PropertyType::Int(old_w)) => new_w >= old_w,
            (PropertyType::UInt(new_w), PropertyType::UInt(old_w)) => new_w >= old_w,
            (PropertyType::Float(new_w), PropertyType::Float(old_w)) => new_w >= old_w,
            (a, b) => a == b,
        }
    }
}

/// Delete policy for a reference property (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletePolicy {
    /// Deleting the target is rejected with `ReferentialIntegrityViolation`
    /// while a live source still references it.
    PreventDelete,
    /// Deleting the target recursively deletes every live source.
    CascadeDelete,
    /// Deleting the target clears the reference on every live source.
    /// Invalid on a cardinality-1 reference (fails the same way as
    /// `PreventDelete` in that case).
    SetToNull,
}

/// One property of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Stable numeric id of this property within its class, used on the
    /// wire by the changeset format (§6).
    pub field_id: u16,
    /// Declared name, unique within the class.
    pub name: String,
    /// The value type this property holds.
    pub property_type: PropertyType,
    /// Delete policy, meaningful only when `property_type` is a reference
    /// or reference-array type.
    pub delete_policy: Option<DeletePolicy>,
    /// Whether this reference is tracked by an inverse-reference map
    /// (§4.3). Meaningless for non-reference properties.
    pub tracked: bool,
    /// Whether a null/empty value is forbidden (cardinality-1 references
    /// must be non-null per §3).
    pub required: bool,
}

/// A declared hash index over 1-4 properties of a class (§3, §4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashIndexDescriptor {
    /// Index name, unique within the defining class and its descendants.
    pub name: String,
    /// The properties making up the key tuple, in order. Length 1-4.
    pub key_fields: Vec<u16>,
    /// Whether the index rejects a second live record sharing the same
    /// key tuple, across the defining class and all descendants.
    pub unique: bool,
    /// Whether this index still needs a background refill pass after
    /// being added over an already-populated class (§4.2).
    pub pending_refill: bool,
}

/// A class: a named, possibly-abstract type with a fixed schema (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    /// Stable class id, unchanged across restarts.
    pub class_id: ClassId,
    /// Declared name, unique within the model.
    pub name: String,
    /// The immediate superclass, if this class inherits from one.
    pub parent: Option<ClassId>,
    /// Whether this class is abstract. Abstract classes never own a
    /// record container (§9).
    pub abstract_class: bool,
    /// Declared properties, including inherited ones flattened in.
    pub properties: Vec<PropertyDescriptor>,
    /// Declared hash indexes on this class.
    pub indexes: Vec<HashIndexDescriptor>,
}

impl ClassDescriptor {
    /// Look up a property by its field id.
    pub fn property(&self, field_id: u16) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.field_id == field_id)
    }

    /// Look up a property by name.
    pub fn property_named(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Whether `self` is a type-compatible evolution of `previous`: every
    /// property `previous` declared still exists with a compatible type,
    /// and abstractness did not flip (§4.9).
    pub fn is_compatible_evolution_of(&self, previous: &ClassDescriptor) -> bool {
        if self.class_id != previous.class_id || self.abstract_class != previous.abstract_class {
            return false;
        }
        previous.properties.iter().all(|old_prop| {
            match self.property(old_prop.field_id) {
                Some(new_prop) => new_prop.property_type.is_widening_of(&old_prop.property_type),
                None => false,
            }
        })
    }
}
