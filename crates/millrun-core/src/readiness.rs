//! Readiness propagation: turning satisfied constraints into dispatchable
//! work.
//!
//! An operation releases only when every one of its gating constraints has
//! individually passed: hold expiry, all predecessors available under their
//! association's overlap rule, MO release, and path validity. Until then we
//! track the single latest binding constraint so a planner can ask "why is
//! this late".

use tracing::debug;

use crate::fixed::{Qty, Ticks, span_for};
use crate::id::{CompatCode, ConnectorId, ItemId, OperationId, WarehouseId};
use crate::model::PlantModel;
use crate::order::{OperationPhase, OverlapKind};

// ---------------------------------------------------------------------------
// Latest constraint
// ---------------------------------------------------------------------------

/// What is (or was, at release time) holding an operation back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Waiting for the simulation clock to reach the release time.
    Clock,
    /// An explicit hold-until date on the operation.
    Hold,
    /// A predecessor operation has not made the work available yet.
    Predecessor(OperationId),
    /// A material requirement is short.
    Material(ItemId),
    /// The operation's path is not (or no longer) the MO's committed path.
    Path,
    /// Waiting for a connector between resources to free.
    Connector(ConnectorId),
    /// Waiting for warehouse storage to free.
    Storage(WarehouseId),
    /// Blocked by a compatibility group on every eligible resource.
    Compatibility(CompatCode),
}

/// The most recent binding reason an operation has not released, kept for
/// diagnostics after the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestConstraint {
    pub kind: ConstraintKind,
    pub at: Ticks,
}

/// Record a binding constraint on an operation, keeping only the latest one.
/// Equal times prefer the newer observation: it reflects the check that
/// actually deferred the release.
pub fn note_constraint(model: &mut PlantModel, op: OperationId, kind: ConstraintKind, at: Ticks) {
    let state = &mut model.operation_states[op];
    match state.latest_constraint {
        Some(existing) if existing.at > at => {}
        _ => {
            debug!(?kind, at, "operation constraint");
            state.latest_constraint = Some(LatestConstraint { kind, at });
        }
    }
}

// ---------------------------------------------------------------------------
// Overlap timing
// ---------------------------------------------------------------------------

/// Progress of a placed predecessor, as much as the overlap rules need.
#[derive(Debug, Clone, Copy)]
pub struct PredecessorProgress {
    pub start: Ticks,
    pub run_start: Ticks,
    pub run_end: Ticks,
    pub end: Ticks,
    pub quantity: Qty,
    pub run_per_unit: Ticks,
}

/// The earliest time a successor may release given its association's
/// overlap rule and the predecessor's committed spans. `OverlapKind::None`
/// waits for the full predecessor end; every other variant computes an
/// earlier release from the predecessor's progress.
pub fn overlap_release_time(overlap: OverlapKind, pred: PredecessorProgress) -> Ticks {
    match overlap {
        OverlapKind::None => pred.end,
        OverlapKind::TransferQuantity { qty } => {
            let transferred = span_for(qty, pred.run_per_unit);
            (pred.run_start + transferred).min(pred.end)
        }
        OverlapKind::TransferSpan { span } => (pred.run_start + span).min(pred.end),
        OverlapKind::PercentComplete { percent } => {
            let run = pred.run_end - pred.run_start;
            // Keep the tick math in u64: percent as integer hundredths.
            let pct = percent.clamp(Qty::ZERO, Qty::from_num(100));
            let hundredths: u64 = (pct * Qty::from_num(100)).to_num();
            let done = run.saturating_mul(hundredths) / 10_000;
            pred.run_start + done
        }
        OverlapKind::AtFirstTransfer => {
            // First full cycle out of the predecessor.
            (pred.run_start + pred.run_per_unit).min(pred.run_end)
        }
        OverlapKind::BeforePredecessorStart { offset } => pred.start.saturating_sub(offset),
    }
}

// ---------------------------------------------------------------------------
// Release gate
// ---------------------------------------------------------------------------

/// Outcome of evaluating an operation's release gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// All constraints satisfied; the operation may release now.
    Ready,
    /// Blocked; the binding constraint has been recorded on the operation.
    Deferred(LatestConstraint),
    /// The operation's path lost the race to another path of its MO.
    Omitted,
}

/// Evaluate whether `op` can release at `clock`. Does not mutate phase; the
/// caller releases (creates activities, populates dispatchers) on `Ready`.
pub fn evaluate_release(model: &mut PlantModel, op: OperationId, clock: Ticks) -> ReleaseOutcome {
    let operation = &model.operations[op];
    let mo_id = operation.mo;
    let path = operation.path;
    let hold_until = operation.hold_until;

    // Path validity: once any activity of the MO commits, only the committed
    // path's operations may progress.
    if let Some(committed) = model.mo_states[mo_id].committed_path
        && committed != path
    {
        return ReleaseOutcome::Omitted;
    }

    if !model.mo_states[mo_id].released {
        let at = model.mos[mo_id].release_after.max(clock);
        let constraint = LatestConstraint {
            kind: ConstraintKind::Clock,
            at,
        };
        note_constraint(model, op, constraint.kind, constraint.at);
        return ReleaseOutcome::Deferred(constraint);
    }

    if let Some(hold) = hold_until
        && hold > clock
    {
        let constraint = LatestConstraint {
            kind: ConstraintKind::Hold,
            at: hold,
        };
        note_constraint(model, op, constraint.kind, constraint.at);
        return ReleaseOutcome::Deferred(constraint);
    }

    // Multi-predecessor join: every predecessor must have fired its
    // availability event. If any has not, defer to that predecessor's own
    // completion rather than guessing a time.
    for assoc in model.predecessors_of(op) {
        let ready = model.operation_states[op]
            .predecessors_ready
            .contains(&assoc.predecessor);
        if !ready {
            let pred_state = &model.operation_states[assoc.predecessor];
            let at = if pred_state.placed > 0 {
                pred_state.last_end
            } else {
                clock
            };
            let constraint = LatestConstraint {
                kind: ConstraintKind::Predecessor(assoc.predecessor),
                at,
            };
            note_constraint(model, op, constraint.kind, constraint.at);
            return ReleaseOutcome::Deferred(constraint);
        }
    }

    ReleaseOutcome::Ready
}

/// True when every predecessor of `op` has signalled availability.
pub fn predecessors_satisfied(model: &PlantModel, op: OperationId) -> bool {
    model
        .predecessors_of(op)
        .iter()
        .all(|a| model.operation_states[op].predecessors_ready.contains(&a.predecessor))
}

/// Record a predecessor-available signal. Returns true if this was the last
/// outstanding predecessor, i.e. the join is now complete.
pub fn mark_predecessor_available(
    model: &mut PlantModel,
    op: OperationId,
    predecessor: OperationId,
) -> bool {
    let ready = &mut model.operation_states[op].predecessors_ready;
    if !ready.contains(&predecessor) {
        ready.push(predecessor);
    }
    predecessors_satisfied(model, op)
}

/// Operations of a path with no predecessor association: the entry points
/// released directly by the MO release event.
pub fn root_operations(model: &PlantModel, path: crate::id::PathId) -> Vec<OperationId> {
    let p = &model.paths[path];
    p.operations
        .iter()
        .copied()
        .filter(|&op| !p.associations.iter().any(|a| a.successor == op))
        .collect()
}

/// Register an operation on the per-item retry list so a supply change
/// re-triggers material resolution.
pub fn watch_material(model: &mut PlantModel, item: ItemId, op: OperationId) {
    let watchers = model.supply_watch.entry(item).or_default();
    if !watchers.contains(&op) {
        watchers.push(op);
    }
}

/// Drain the operations watching `item`. The caller re-evaluates each.
pub fn take_material_watchers(model: &mut PlantModel, item: ItemId) -> Vec<OperationId> {
    model.supply_watch.remove(&item).unwrap_or_default()
}

/// Mark an operation's phase transition, asserting the legal lifecycle.
pub fn advance_phase(model: &mut PlantModel, op: OperationId, next: OperationPhase) {
    let state = &mut model.operation_states[op];
    debug_assert!(
        phase_transition_legal(state.phase, next),
        "illegal phase transition {:?} -> {:?}",
        state.phase,
        next
    );
    state.phase = next;
}

fn phase_transition_legal(from: OperationPhase, to: OperationPhase) -> bool {
    use OperationPhase::*;
    matches!(
        (from, to),
        (Unreleased, Released)
            | (Unreleased, Omitted)
            | (Released, Scheduled)
            | (Released, Omitted)
            | (Scheduled, Finished)
            | (Scheduled, Omitted)
    )
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;
    use crate::test_utils::*;

    fn progress() -> PredecessorProgress {
        PredecessorProgress {
            start: 100,
            run_start: 110,
            run_end: 210,
            end: 230,
            quantity: qty(10.0),
            run_per_unit: 10,
        }
    }

    // -----------------------------------------------------------------------
    // Test 1: overlap math per variant
    // -----------------------------------------------------------------------
    #[test]
    fn overlap_none_waits_for_end() {
        assert_eq!(overlap_release_time(OverlapKind::None, progress()), 230);
    }

    #[test]
    fn overlap_transfer_quantity() {
        let t = overlap_release_time(
            OverlapKind::TransferQuantity { qty: qty(3.0) },
            progress(),
        );
        assert_eq!(t, 140); // run_start + 3 cycles
    }

    #[test]
    fn overlap_transfer_span_clamps_to_end() {
        let t = overlap_release_time(OverlapKind::TransferSpan { span: 500 }, progress());
        assert_eq!(t, 230);
    }

    #[test]
    fn overlap_percent_complete() {
        let t = overlap_release_time(
            OverlapKind::PercentComplete { percent: qty(50.0) },
            progress(),
        );
        assert_eq!(t, 160);
    }

    #[test]
    fn overlap_percent_clamps_out_of_range() {
        let over = overlap_release_time(
            OverlapKind::PercentComplete { percent: qty(150.0) },
            progress(),
        );
        assert_eq!(over, 210);
        let under = overlap_release_time(
            OverlapKind::PercentComplete { percent: qty(-10.0) },
            progress(),
        );
        assert_eq!(under, 110);
    }

    #[test]
    fn overlap_first_transfer() {
        let t = overlap_release_time(OverlapKind::AtFirstTransfer, progress());
        assert_eq!(t, 120);
    }

    #[test]
    fn overlap_before_start_saturates() {
        let t = overlap_release_time(
            OverlapKind::BeforePredecessorStart { offset: 500 },
            progress(),
        );
        assert_eq!(t, 0);
    }

    // -----------------------------------------------------------------------
    // Test 2: unreleased MO defers with a Clock constraint
    // -----------------------------------------------------------------------
    #[test]
    fn unreleased_mo_defers() {
        let mut fixture = chain_fixture();
        let first = fixture.ops[0];
        match evaluate_release(&mut fixture.model, first, 0) {
            ReleaseOutcome::Deferred(c) => assert_eq!(c.kind, ConstraintKind::Clock),
            other => panic!("expected deferral, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Test 3: join requires all predecessors
    // -----------------------------------------------------------------------
    #[test]
    fn join_waits_for_all_predecessors() {
        let mut fixture = chain_fixture();
        fixture.model.mo_states[fixture.mo].released = true;
        let (first, second) = (fixture.ops[0], fixture.ops[1]);
        match evaluate_release(&mut fixture.model, second, 0) {
            ReleaseOutcome::Deferred(c) => {
                assert_eq!(c.kind, ConstraintKind::Predecessor(first));
            }
            other => panic!("expected deferral, got {other:?}"),
        }
        assert!(mark_predecessor_available(&mut fixture.model, second, first));
        assert_eq!(
            evaluate_release(&mut fixture.model, second, 0),
            ReleaseOutcome::Ready
        );
    }

    // -----------------------------------------------------------------------
    // Test 4: committed path omits other paths' operations
    // -----------------------------------------------------------------------
    #[test]
    fn losing_path_is_omitted() {
        let mut fixture = two_path_fixture();
        fixture.model.mo_states[fixture.mo].released = true;
        fixture.model.mo_states[fixture.mo].committed_path = Some(fixture.paths[0]);
        let on_loser = fixture.ops_by_path[1][0];
        assert_eq!(
            evaluate_release(&mut fixture.model, on_loser, 0),
            ReleaseOutcome::Omitted
        );
    }

    // -----------------------------------------------------------------------
    // Test 5: latest constraint keeps the max time
    // -----------------------------------------------------------------------
    #[test]
    fn latest_constraint_keeps_max() {
        let mut fixture = chain_fixture();
        let op = fixture.ops[0];
        note_constraint(&mut fixture.model, op, ConstraintKind::Hold, 50);
        note_constraint(&mut fixture.model, op, ConstraintKind::Clock, 20);
        let c = fixture.model.operation_states[op].latest_constraint.unwrap();
        assert_eq!(c.kind, ConstraintKind::Hold);
        assert_eq!(c.at, 50);
    }

    // -----------------------------------------------------------------------
    // Test 6: root operations of a chain
    // -----------------------------------------------------------------------
    #[test]
    fn roots_of_chain() {
        let fixture = chain_fixture();
        let roots = root_operations(&fixture.model, fixture.path);
        assert_eq!(roots, vec![fixture.ops[0]]);
    }
}
