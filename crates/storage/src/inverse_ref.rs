//! Inverse-reference map: reverse adjacency for every tracked reference
//! field (§4.3).
//!
//! Keyed by `(owning class id, field id, target id)` rather than by target
//! id alone, because the same target can be referenced by the same field
//! from many sources, and a delete-policy check always starts from a
//! specific reference slot ("for this property on this class, who points
//! at me").

use dashmap::DashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use velox_core::ids::{ClassId, ObjectId};

/// Identifies one tracked reference slot: a `(class, field)` pair on the
/// *source* side whose target is the map's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefSlot {
    /// The class declaring the reference property.
    pub class_id: ClassId,
    /// The reference property's field id.
    pub field_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    slot: RefSlot,
    target: ObjectId,
}

const SHARD_COUNT: usize = 16;

fn shard_of(key: &Key) -> usize {
    (key.target.get() as usize ^ key.slot.field_id as usize) % SHARD_COUNT
}

/// Reverse adjacency: `(target id, slot) -> multiset of source ids`
/// currently referencing it (§3, §4.3).
pub struct InverseRefMap {
    shards: Vec<DashMap<Key, RwLock<SmallVec<[ObjectId; 4]>>>>,
}

impl InverseRefMap {
    /// A new, empty map.
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| DashMap::new()).collect();
        Self { shards }
    }

    /// Record that `source` now references `target` through `slot`.
    pub fn add_edge(&self, slot: RefSlot, target: ObjectId, source: ObjectId) {
        let key = Key { slot, target };
        let shard = &self.shards[shard_of(&key)];
        shard.entry(key).or_default().write().push(source);
    }

    /// Remove one occurrence of the `source -> target` edge through `slot`
    /// (duplicates preserved: removing one does not remove all, matching
    /// reference arrays that may legitimately repeat an id).
    pub fn remove_edge(&self, slot: RefSlot, target: ObjectId, source: ObjectId) {
        let key = Key { slot, target };
        let shard = &self.shards[shard_of(&key)];
        let mut drop_entry = false;
        if let Some(sources) = shard.get(&key) {
            let mut guard = sources.write();
            if let Some(pos) = guard.iter().position(|id| *id == source) {
                guard.remove(pos);
            }
            drop_entry = guard.is_empty();
        }
        if drop_entry {
            shard.remove(&key);
        }
    }

    /// Every source id currently referencing `target` through `slot`,
    /// duplicates preserved (§4.3 public contract).
    pub fn sources_of(&self, slot: RefSlot, target: ObjectId) -> Vec<ObjectId> {
        let key = Key { slot, target };
        let shard = &self.shards[shard_of(&key)];
        shard.get(&key).map(|sources| sources.read().to_vec()).unwrap_or_default()
    }

    /// Whether any live source currently references `target` through
    /// `slot`, used by `PreventDelete`/`SetToNull` checks (§4.3) without
    /// paying for a full vector copy.
    pub fn has_any_source(&self, slot: RefSlot, target: ObjectId) -> bool {
        let key = Key { slot, target };
        let shard = &self.shards[shard_of(&key)];
        shard.get(&key).map(|sources| !sources.read().is_empty()).unwrap_or(false)
    }

    /// Drop every recorded edge, e.g. before rebuilding adjacency from a
    /// rewound record set (§4.6).
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.clear();
        }
    }
}

impl Default for InverseRefMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> RefSlot {
        RefSlot { class_id: ClassId::new(2), field_id: 3 }
    }

    #[test]
    fn add_then_query_finds_source() {
        let map = InverseRefMap::new();
        map.add_edge(slot(), ObjectId::new(10), ObjectId::new(20));
        assert_eq!(map.sources_of(slot(), ObjectId::new(10)), vec![ObjectId::new(20)]);
    }

    #[test]
    fn remove_one_duplicate_keeps_the_other() {
        let map = InverseRefMap::new();
        map.add_edge(slot(), ObjectId::new(10), ObjectId::new(20));
        map.add_edge(slot(), ObjectId::new(10), ObjectId::new(20));
        map.remove_edge(slot(), ObjectId::new(10), ObjectId::new(20));
        assert_eq!(map.sources_of(slot(), ObjectId::new(10)), vec![ObjectId::new(20)]);
    }

    #[test]
    fn removing_last_edge_clears_has_any_source() {
        let map = InverseRefMap::new();
        map.add_edge(slot(), ObjectId::new(10), ObjectId::new(20));
        map.remove_edge(slot(), ObjectId::new(10), ObjectId::new(20));
        assert!(!map.has_any_source(slot(), ObjectId::new(10)));
    }

    #[test]
    fn distinct_slots_on_same_target_do_not_interfere() {
        let map = InverseRefMap::new();
        let other_slot = RefSlot { class_id: ClassId::new(5), field_id: 1 };
        map.add_edge(slot(), ObjectId::new(10), ObjectId::new(20));
        assert!(!map.has_any_source(other_slot, ObjectId::new(10)));
    }
}
