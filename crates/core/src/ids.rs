//! Identifiers and version counters.
//!
//! Object ids, class ids, transaction ids, and commit versions are all plain
//! `u64`s at the wire level, but are kept as distinct newtypes here so a
//! class id can never be passed where an object id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The highest bit of an object id space is reserved; ids above this bound
/// signal [`VeloxError::fatal`](crate::VeloxError::fatal) `IdExhaustion` per
/// record-store §4.1.
pub const MAX_OBJECT_ID: u64 = (1u64 << 63) - 1;

/// Transaction ids live in a high reserved space, disjoint from object ids
/// and from commit versions, per §4.5.
pub const TXN_ID_BASE: u64 = 1u64 << 62;

macro_rules! newtype_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Wrap a raw integer value.
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// The raw integer value.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

newtype_id!(ObjectId, "A 64-bit unique object id assigned by the engine, never recycled (§3).");
newtype_id!(ClassId, "A stable class id, unchanged across restarts (§3).");
newtype_id!(TxnId, "A transaction id in the reserved high-id space (§4.5).");
newtype_id!(Version, "A monotonic commit version or read version (§3, §4.6).");

impl Version {
    /// The version sentinel meaning "this key has never been written".
    pub const NONE: Version = Version(0);

    /// Whether this is the "never written" sentinel.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl TxnId {
    /// Whether `raw` lies in the reserved transaction-id space.
    pub fn is_txn_space(raw: u64) -> bool {
        raw >= TXN_ID_BASE
    }
}

impl ObjectId {
    /// Whether the next id to be allocated after this one would overflow the
    /// 63-bit object-id space (§4.1's `IdExhaustion`).
    pub fn next_would_exhaust(self) -> bool {
        self.0 >= MAX_OBJECT_ID
    }
}
