//! Batching: grouping activities that share a resource time-slot and setup.
//!
//! A batch is created when the first activity places into an empty slot and
//! joined when a compatible activity places into the same slot. Joining is
//! legal only when the operations share a batch code, have equivalent
//! resource-requirement shape, and the batch's percent/volume limit still
//! has room. Composition from the previous run is remembered so incremental
//! re-simulation does not re-merge or re-split batches an edit never
//! touched.

use std::collections::BTreeMap;

use tracing::debug;

use crate::fixed::{Qty, Ticks};
use crate::id::{ActivityId, BatchCode, BatchId, OperationId, ResourceId};
use crate::model::PlantModel;
use crate::order::Operation;

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// A committed grouping of activities sharing one resource time-slot.
#[derive(Debug, Clone)]
pub struct Batch {
    pub resource: ResourceId,
    pub code: BatchCode,
    pub slot_start: Ticks,
    pub activities: Vec<ActivityId>,
    /// Sum of member quantities, checked against the resource batch limit.
    pub fill: Qty,
}

/// Why a join request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRefusal {
    /// The operations carry different (or no) batch codes.
    CodeMismatch,
    /// Requirement shapes differ; the setup cannot be shared.
    ShapeMismatch,
    /// The batch's percent/volume limit has no room for the candidate.
    CapacityExceeded,
    /// No batch occupies the slot and policy forbids opening a new one.
    NewBatchForbidden,
}

/// Result of asking the manager to place an activity into a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(BatchId),
    Created(BatchId),
    Refused(JoinRefusal),
}

// ---------------------------------------------------------------------------
// BatchManager
// ---------------------------------------------------------------------------

/// Per-engine batch bookkeeping plus prior-run composition memory.
#[derive(Debug, Default)]
pub struct BatchManager {
    /// Batches currently open per (resource, slot start).
    open: BTreeMap<(ResourceId, Ticks), BatchId>,
    /// Prior-run composition: operations that shared a slot last run.
    memory: BTreeMap<(ResourceId, Ticks), Vec<OperationId>>,
}

impl BatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The batch currently occupying a slot, if any.
    pub fn batch_at(&self, resource: ResourceId, slot_start: Ticks) -> Option<BatchId> {
        self.open.get(&(resource, slot_start)).copied()
    }

    /// Pre-check a join/open without mutating anything. Mirrors [`place`].
    ///
    /// [`place`]: BatchManager::place
    pub fn can_place(
        &self,
        model: &PlantModel,
        resource: ResourceId,
        activity: ActivityId,
        slot_start: Ticks,
        allow_new_batch: bool,
    ) -> Result<(), JoinRefusal> {
        let op = &model.operations[model.activities[activity].operation];
        let Some(code) = op.batch_code else {
            return if self.open.contains_key(&(resource, slot_start)) {
                Err(JoinRefusal::CodeMismatch)
            } else {
                Ok(())
            };
        };
        match self.batch_at(resource, slot_start) {
            Some(batch_id) => self.check_join(model, batch_id, activity, code),
            None if allow_new_batch => Ok(()),
            None => Err(JoinRefusal::NewBatchForbidden),
        }
    }

    /// The earliest open slot on `resource` at or after `from` that the
    /// activity could legally join, with the anchor member's span reused.
    pub fn joinable_slot(
        &self,
        model: &PlantModel,
        resource: ResourceId,
        activity: ActivityId,
        from: Ticks,
    ) -> Option<(Ticks, BatchId)> {
        let op = &model.operations[model.activities[activity].operation];
        let code = op.batch_code?;
        self.open
            .range((resource, from)..=(resource, Ticks::MAX))
            .find(|&(_, &batch_id)| self.check_join(model, batch_id, activity, code).is_ok())
            .map(|(&(_, slot), &batch_id)| (slot, batch_id))
    }

    /// Place `activity` into the slot at `slot_start` on `resource`:
    /// join the open batch when legal, otherwise open a new one when
    /// `allow_new_batch` permits.
    pub fn place(
        &mut self,
        model: &mut PlantModel,
        resource: ResourceId,
        activity: ActivityId,
        slot_start: Ticks,
        allow_new_batch: bool,
    ) -> JoinOutcome {
        let act = &model.activities[activity];
        let op = &model.operations[act.operation];
        let Some(code) = op.batch_code else {
            // Uncoded operations never batch; they get a slot to themselves.
            return if self.open.contains_key(&(resource, slot_start)) {
                JoinOutcome::Refused(JoinRefusal::CodeMismatch)
            } else {
                self.create(model, resource, activity, slot_start, BatchCode(0))
            };
        };

        if let Some(batch_id) = self.batch_at(resource, slot_start) {
            match self.check_join(model, batch_id, activity, code) {
                Ok(()) => {
                    let qty = model.activities[activity].required_qty;
                    let batch = &mut model.batches[batch_id];
                    batch.activities.push(activity);
                    batch.fill += qty;
                    model.activities[activity].batches[0] = Some(batch_id);
                    debug!(?batch_id, ?activity, "joined batch");
                    JoinOutcome::Joined(batch_id)
                }
                Err(refusal) => JoinOutcome::Refused(refusal),
            }
        } else if allow_new_batch {
            self.create(model, resource, activity, slot_start, code)
        } else {
            JoinOutcome::Refused(JoinRefusal::NewBatchForbidden)
        }
    }

    fn create(
        &mut self,
        model: &mut PlantModel,
        resource: ResourceId,
        activity: ActivityId,
        slot_start: Ticks,
        code: BatchCode,
    ) -> JoinOutcome {
        let fill = model.activities[activity].required_qty;
        let batch_id = model.batches.insert(Batch {
            resource,
            code,
            slot_start,
            activities: vec![activity],
            fill,
        });
        model.activities[activity].batches[0] = Some(batch_id);
        self.open.insert((resource, slot_start), batch_id);
        debug!(?batch_id, ?activity, slot_start, "created batch");
        JoinOutcome::Created(batch_id)
    }

    fn check_join(
        &self,
        model: &PlantModel,
        batch_id: BatchId,
        activity: ActivityId,
        code: BatchCode,
    ) -> Result<(), JoinRefusal> {
        let batch = &model.batches[batch_id];
        if batch.code != code {
            return Err(JoinRefusal::CodeMismatch);
        }
        let candidate_op = &model.operations[model.activities[activity].operation];
        let anchor = batch.activities.first().copied();
        if let Some(anchor) = anchor {
            let anchor_op = &model.operations[model.activities[anchor].operation];
            if !same_requirement_shape(anchor_op, candidate_op) {
                return Err(JoinRefusal::ShapeMismatch);
            }
        }
        let qty = model.activities[activity].required_qty;
        if !fits_limit(model, batch, qty) {
            return Err(JoinRefusal::CapacityExceeded);
        }
        Ok(())
    }

    /// Remove an activity from its batch (unschedule, split rejoin, move).
    /// Deletes the batch once empty.
    pub fn remove(&mut self, model: &mut PlantModel, activity: ActivityId) {
        let Some(batch_id) = model.activities[activity].batches[0].take() else {
            return;
        };
        let Some(batch) = model.batches.get_mut(batch_id) else {
            return;
        };
        batch.activities.retain(|&a| a != activity);
        batch.fill -= model.activities[activity].required_qty;
        if batch.activities.is_empty() {
            let key = (batch.resource, batch.slot_start);
            model.batches.remove(batch_id);
            self.open.remove(&key);
        }
    }

    // -----------------------------------------------------------------------
    // Prior-run memory
    // -----------------------------------------------------------------------

    /// Snapshot current composition so the next incremental run can keep
    /// unrelated batches stable.
    pub fn remember_run(&mut self, model: &PlantModel) {
        self.memory.clear();
        for (_, batch) in &model.batches {
            let ops: Vec<OperationId> = batch
                .activities
                .iter()
                .map(|&a| model.activities[a].operation)
                .collect();
            self.memory
                .insert((batch.resource, batch.slot_start), ops);
        }
    }

    /// True when these operations shared this slot in the previous run;
    /// such joins bypass the allow-new-batch policy so untouched regions
    /// re-form identically.
    pub fn were_together(
        &self,
        resource: ResourceId,
        slot_start: Ticks,
        op: OperationId,
    ) -> bool {
        self.memory
            .get(&(resource, slot_start))
            .is_some_and(|ops| ops.contains(&op))
    }

    /// Drop all open slots (run end / reset). Memory survives.
    pub fn reset_open(&mut self) {
        self.open.clear();
    }
}

/// Shape equivalence: same requirement count, and per index the same role
/// and usage spans, so one setup genuinely covers all members.
fn same_requirement_shape(a: &Operation, b: &Operation) -> bool {
    a.requirements.len() == b.requirements.len()
        && a.requirements.iter().zip(&b.requirements).all(|(x, y)| {
            x.role == y.role
                && x.setup_span == y.setup_span
                && x.run_per_unit == y.run_per_unit
                && x.post_process_span == y.post_process_span
                && x.storage_span == y.storage_span
        })
}

/// Check the candidate quantity against the resource's batch limit.
fn fits_limit(model: &PlantModel, batch: &Batch, qty: Qty) -> bool {
    use crate::resource::BatchLimit;
    let resource = &model.resources[batch.resource];
    let after = batch.fill + qty;
    match resource.batch_limit {
        Some(BatchLimit::Volume { max }) => after <= max,
        Some(BatchLimit::Percent { max_fill }) => match resource.max_volume {
            Some(volume) => {
                let cap = volume * Qty::from_num(max_fill.min(100)) / Qty::from_num(100);
                after <= cap
            }
            None => true,
        },
        None => match resource.max_volume {
            Some(volume) => after <= volume,
            None => true,
        },
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;
    use crate::test_utils::*;

    // -----------------------------------------------------------------------
    // Test 1: first placement opens a batch
    // -----------------------------------------------------------------------
    #[test]
    fn first_placement_creates() {
        let mut fixture = batch_fixture();
        let mut mgr = BatchManager::new();
        let a = fixture.activities[0];
        match mgr.place(&mut fixture.model, fixture.resource, a, 0, true) {
            JoinOutcome::Created(id) => {
                assert_eq!(fixture.model.batches[id].activities, vec![a]);
                assert_eq!(fixture.model.activities[a].batches[0], Some(id));
            }
            other => panic!("expected creation, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Test 2: compatible activity joins, fill accumulates
    // -----------------------------------------------------------------------
    #[test]
    fn compatible_activity_joins() {
        let mut fixture = batch_fixture();
        let mut mgr = BatchManager::new();
        let (a, b) = (fixture.activities[0], fixture.activities[1]);
        mgr.place(&mut fixture.model, fixture.resource, a, 0, true);
        match mgr.place(&mut fixture.model, fixture.resource, b, 0, false) {
            JoinOutcome::Joined(id) => {
                assert_eq!(fixture.model.batches[id].activities.len(), 2);
                assert_eq!(fixture.model.batches[id].fill, qty(8.0));
            }
            other => panic!("expected join, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Test 3: code mismatch refuses
    // -----------------------------------------------------------------------
    #[test]
    fn code_mismatch_refuses() {
        let mut fixture = batch_fixture();
        let mut mgr = BatchManager::new();
        let (a, b) = (fixture.activities[0], fixture.activities[1]);
        let op_b = fixture.model.activities[b].operation;
        fixture.model.operations[op_b].batch_code = Some(BatchCode(99));
        mgr.place(&mut fixture.model, fixture.resource, a, 0, true);
        assert_eq!(
            mgr.place(&mut fixture.model, fixture.resource, b, 0, true),
            JoinOutcome::Refused(JoinRefusal::CodeMismatch)
        );
    }

    // -----------------------------------------------------------------------
    // Test 4: volume limit refuses overfill
    // -----------------------------------------------------------------------
    #[test]
    fn volume_limit_refuses() {
        let mut fixture = batch_fixture();
        fixture.model.resources[fixture.resource].batch_limit =
            Some(crate::resource::BatchLimit::Volume { max: qty(5.0) });
        let mut mgr = BatchManager::new();
        let (a, b) = (fixture.activities[0], fixture.activities[1]);
        mgr.place(&mut fixture.model, fixture.resource, a, 0, true);
        assert_eq!(
            mgr.place(&mut fixture.model, fixture.resource, b, 0, true),
            JoinOutcome::Refused(JoinRefusal::CapacityExceeded)
        );
    }

    // -----------------------------------------------------------------------
    // Test 5: new batch forbidden when policy says so
    // -----------------------------------------------------------------------
    #[test]
    fn new_batch_forbidden() {
        let mut fixture = batch_fixture();
        let mut mgr = BatchManager::new();
        let a = fixture.activities[0];
        assert_eq!(
            mgr.place(&mut fixture.model, fixture.resource, a, 0, false),
            JoinOutcome::Refused(JoinRefusal::NewBatchForbidden)
        );
    }

    // -----------------------------------------------------------------------
    // Test 6: removing the last member deletes the batch
    // -----------------------------------------------------------------------
    #[test]
    fn remove_last_member_deletes() {
        let mut fixture = batch_fixture();
        let mut mgr = BatchManager::new();
        let a = fixture.activities[0];
        let JoinOutcome::Created(id) =
            mgr.place(&mut fixture.model, fixture.resource, a, 0, true)
        else {
            panic!("expected creation");
        };
        mgr.remove(&mut fixture.model, a);
        assert!(!fixture.model.batches.contains_key(id));
        assert_eq!(mgr.batch_at(fixture.resource, 0), None);
        assert_eq!(fixture.model.activities[a].batches[0], None);
    }

    // -----------------------------------------------------------------------
    // Test 7: prior-run memory survives
    // -----------------------------------------------------------------------
    #[test]
    fn memory_remembers_composition() {
        let mut fixture = batch_fixture();
        let mut mgr = BatchManager::new();
        let (a, b) = (fixture.activities[0], fixture.activities[1]);
        mgr.place(&mut fixture.model, fixture.resource, a, 0, true);
        mgr.place(&mut fixture.model, fixture.resource, b, 0, false);
        mgr.remember_run(&fixture.model);
        let op = fixture.model.activities[a].operation;
        assert!(mgr.were_together(fixture.resource, 0, op));
        assert!(!mgr.were_together(fixture.resource, 99, op));
    }
}
