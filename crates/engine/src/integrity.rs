//! Referential-integrity enforcement at delete time (§4.3).
//!
//! A property declares its delete policy on the *source* side — "when the
//! record I point at is deleted, do X" — so checking a delete starts from
//! the target id and asks the model which declared reference properties
//! could possibly point at this class, then asks the inverse-reference map
//! whether any live source currently does.

use crate::model::ModelManager;
use velox_core::descriptor::DeletePolicy;
use velox_core::ids::{ClassId, ObjectId};
use velox_core::{VeloxError, VeloxResult};
use velox_storage::{InverseRefMap, RefSlot};

/// What deleting one object requires of the rest of the model.
#[derive(Debug, Default)]
pub struct DeletePlan {
    /// Other objects that must also be deleted (`CascadeDelete`).
    pub cascade: Vec<(ClassId, ObjectId)>,
    /// Reference fields that must be cleared on a source record, rather
    /// than deleting the source itself (`SetToNull`).
    pub clear: Vec<(RefSlot, ObjectId)>,
}

/// Every declared `(slot, policy)` whose reference target type is
/// `target_class`, restricted to tracked references — an untracked
/// reference is not enforced here; its existence is only checked forward
/// (§4.3 "untracked references fall back to a class scan" applies to
/// existence checks, not delete policy, since there is no edge to find).
fn referencing_slots(model: &ModelManager, target_class: ClassId) -> Vec<(RefSlot, DeletePolicy)> {
    let mut slots = Vec::new();
    for descriptor in model.all_descriptors() {
        for property in &descriptor.properties {
            if !property.tracked {
                continue;
            }
            let target = match &property.property_type {
                velox_core::descriptor::PropertyType::Reference { target } => Some(*target),
                velox_core::descriptor::PropertyType::ReferenceArray { target } => Some(*target),
                _ => None,
            };
            if target == Some(target_class) {
                if let Some(policy) = property.delete_policy {
                    slots.push((RefSlot { class_id: descriptor.class_id, field_id: property.field_id }, policy));
                }
            }
        }
    }
    slots
}

/// Work out what deleting `(class_id, object_id)` requires: a
/// `PreventDelete` violation fails immediately; `CascadeDelete` and
/// `SetToNull` sources are collected for the caller to apply.
pub fn plan_delete(
    model: &ModelManager,
    inverse_refs: &InverseRefMap,
    class_id: ClassId,
    object_id: ObjectId,
) -> VeloxResult<DeletePlan> {
    let mut plan = DeletePlan::default();
    for (slot, policy) in referencing_slots(model, class_id) {
        let sources = inverse_refs.sources_of(slot, object_id);
        if sources.is_empty() {
            continue;
        }
        match policy {
            DeletePolicy::PreventDelete => {
                return Err(VeloxError::referential_integrity_violation(
                    class_id,
                    object_id,
                    format!(
                        "{} live reference(s) from {:?}.{} prevent delete",
                        sources.len(),
                        slot.class_id,
                        slot.field_id
                    ),
                ));
            }
            DeletePolicy::CascadeDelete => {
                plan.cascade.extend(sources.into_iter().map(|src| (slot.class_id, src)));
            }
            DeletePolicy::SetToNull => {
                plan.clear.extend(sources.into_iter().map(|src| (slot, src)));
            }
        }
    }
    Ok(plan)
}
