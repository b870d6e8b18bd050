//! Standby catch-up (§4.10's "Alignment (catch-up)").
//!
//! When a standby connects with an older version, the primary and standby
//! compare per-class version watermarks; ids present on the standby but
//! deleted while it was absent are closed with synthetic "alignment
//! delete" operations before the missing log range ships.

use velox_core::changeset::{ChangeSet, Operation};
use velox_core::ids::{ClassId, ObjectId};
use std::collections::HashMap;

/// Per-class high-water mark a replica has durably applied.
pub type ClassWatermarks = HashMap<ClassId, u64>;

/// A standby's alignment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentState {
    /// The standby is behind and exchanging watermarks with the primary.
    Comparing,
    /// The standby is replaying the missing log range.
    CatchingUp,
    /// The standby is current and receiving new frames as they commit.
    Streaming,
}

/// Compute the set of ids that exist on the standby (per its own record
/// store) but were deleted on the primary while the standby was absent, so
/// the primary can emit synthetic alignment-delete operations for them
/// before shipping the missing range.
///
/// `standby_live_ids` and `primary_live_ids` are each a snapshot of ids
/// currently live in one class on the respective node.
pub fn compute_alignment_deletes(
    class_id: ClassId,
    standby_live_ids: &[ObjectId],
    primary_live_ids: &[ObjectId],
) -> ChangeSet {
    let primary_set: std::collections::HashSet<_> = primary_live_ids.iter().copied().collect();
    let mut changeset = ChangeSet::new();
    for &id in standby_live_ids {
        if !primary_set.contains(&id) {
            changeset.push(Operation::Delete { class_id, object_id: id });
        }
    }
    changeset
}

/// Drives one standby's alignment state machine.
pub struct AlignmentSession {
    state: AlignmentState,
    standby_watermarks: ClassWatermarks,
    primary_watermarks: ClassWatermarks,
}

impl AlignmentSession {
    /// Begin a session comparing the standby's watermarks to the primary's.
    pub fn new(standby_watermarks: ClassWatermarks, primary_watermarks: ClassWatermarks) -> Self {
        Self { state: AlignmentState::Comparing, standby_watermarks, primary_watermarks }
    }

    /// The current alignment state.
    pub fn state(&self) -> AlignmentState {
        self.state
    }

    /// Classes where the standby's watermark trails the primary's, and by
    /// how many commit versions.
    pub fn behind_classes(&self) -> Vec<(ClassId, u64)> {
        self.primary_watermarks
            .iter()
            .filter_map(|(class_id, primary_wm)| {
                let standby_wm = self.standby_watermarks.get(class_id).copied().unwrap_or(0);
                if standby_wm < *primary_wm {
                    Some((*class_id, primary_wm - standby_wm))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Transition out of `Comparing` once the primary has generated any
    /// needed alignment-delete changesets.
    pub fn begin_catch_up(&mut self) {
        if self.state == AlignmentState::Comparing {
            self.state = AlignmentState::CatchingUp;
        }
    }

    /// Transition to `Streaming` once the missing log range has been fully
    /// replayed (no class remains behind).
    pub fn try_finish(&mut self) -> bool {
        if self.state == AlignmentState::CatchingUp && self.behind_classes().is_empty() {
            self.state = AlignmentState::Streaming;
            true
        } else {
            false
        }
    }

    /// Record that `class_id` has caught up to `new_watermark` on the
    /// standby.
    pub fn record_progress(&mut self, class_id: ClassId, new_watermark: u64) {
        self.standby_watermarks.insert(class_id, new_watermark);
    }
}
