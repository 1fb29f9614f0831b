//! Auto-split: partitioning an activity's quantity so some of it can place
//! now.
//!
//! Triggered when an activity cannot fully place because of a resource
//! volume/quantity cap, a limited capacity window, a predecessor-quantity
//! ratio, or a pending cleanout boundary. The kept quantity is bounded by
//! policy min/max and by the resource's own min/max so the remainder stays
//! placeable. A failed placement of the reduced activity rejoins the split;
//! the undo is idempotent so no orphaned fragment can remain.

use tracing::debug;

use crate::dispatch::DispatcherSet;
use crate::fixed::{Qty, Ticks};
use crate::id::{ActivityId, ResourceId};
use crate::model::PlantModel;
use crate::policy::SchedulingPolicy;

// ---------------------------------------------------------------------------
// Triggers and decisions
// ---------------------------------------------------------------------------

/// Why a split is being considered.
#[derive(Debug, Clone, Copy)]
pub enum SplitTrigger {
    /// The resource caps quantity per placement.
    QuantityCap { max: Qty },
    /// Only `available` ticks of capacity exist before the next block or
    /// offline interval.
    CapacityWindow { available: Ticks },
    /// Only `available` quantity has transferred from the predecessor.
    PredecessorRatio { available: Qty },
    /// A cleanout boundary truncates the run; `run_left` ticks may still
    /// run and `clean_span` must follow the truncated run.
    Cleanout { run_left: Ticks, clean_span: Ticks },
}

/// What the evaluation decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitDecision {
    /// The activity fits as-is.
    NotNeeded,
    /// Keep `keep` on the original, move `rest` to a new sibling. For
    /// cleanout splits, `clean_after` is the span that must follow the
    /// truncated run.
    Split {
        keep: Qty,
        rest: Qty,
        clean_after: Option<Ticks>,
    },
    /// Splitting is disabled by policy.
    Disabled,
    /// No legal partition exists within the configured bounds.
    Infeasible,
}

/// Evaluate whether `activity` must split to place on `resource`, and if
/// so how much to keep.
pub fn evaluate(
    model: &PlantModel,
    policy: &SchedulingPolicy,
    activity: ActivityId,
    resource: ResourceId,
    trigger: SplitTrigger,
) -> SplitDecision {
    let act = &model.activities[activity];
    let required = act.required_qty;
    let op = &model.operations[act.operation];
    let run_per_unit = op.primary().run_per_unit;

    let (cap, clean_after) = match trigger {
        SplitTrigger::QuantityCap { max } => (max, None),
        SplitTrigger::PredecessorRatio { available } => (available, None),
        SplitTrigger::CapacityWindow { available } => {
            (qty_fitting(available, run_per_unit), None)
        }
        SplitTrigger::Cleanout {
            run_left,
            clean_span,
        } => (qty_fitting(run_left, run_per_unit), Some(clean_span)),
    };

    if required <= cap {
        return SplitDecision::NotNeeded;
    }
    if !policy.auto_split {
        return SplitDecision::Disabled;
    }

    let res = &model.resources[resource];
    let min_keep = policy.min_split_qty.max(res.min_qty);
    let max_keep = match (policy.max_split_qty, res.max_qty) {
        (Some(p), Some(r)) => p.min(r),
        (Some(p), None) => p,
        (None, Some(r)) => r,
        (None, None) => required,
    };

    let mut keep = cap.min(max_keep);
    // The remainder must itself stay placeable.
    let rest = required - keep;
    if rest < min_keep {
        keep = required - min_keep;
    }
    if keep < min_keep || keep <= Qty::from_num(0) || keep >= required {
        return SplitDecision::Infeasible;
    }
    SplitDecision::Split {
        keep,
        rest: required - keep,
        clean_after,
    }
}

/// Largest whole quantity whose run fits in `window` ticks.
pub(crate) fn qty_fitting(window: Ticks, run_per_unit: Ticks) -> Qty {
    if run_per_unit == 0 {
        return Qty::MAX;
    }
    Qty::from_num(window / run_per_unit)
}

// ---------------------------------------------------------------------------
// Perform / rejoin
// ---------------------------------------------------------------------------

/// Everything needed to undo a split exactly.
#[derive(Debug)]
pub struct SplitUndo {
    pub original: ActivityId,
    pub sibling: ActivityId,
    original_qty: Qty,
    original_clean_after: Option<Ticks>,
    done: bool,
}

/// Split `activity`, keeping `keep` on the original (its id is reused) and
/// creating a sibling carrying the remainder. The sibling inherits release
/// time, arrival connector, and ordinal position, and is re-initialized as
/// queued work.
pub fn perform(
    model: &mut PlantModel,
    activity: ActivityId,
    keep: Qty,
    clean_after: Option<Ticks>,
) -> SplitUndo {
    let act = &model.activities[activity];
    let original_qty = act.required_qty;
    let original_clean_after = act.clean_after;
    let rest = original_qty - keep;
    let operation = act.operation;
    let release_time = act.release_time;
    let arrived_via = act.arrived_via;
    debug_assert!(rest > Qty::from_num(0) && keep > Qty::from_num(0));

    let sibling = model.new_activity(operation, rest, release_time);
    {
        let s = &mut model.activities[sibling];
        s.split_parent = Some(activity);
        s.arrived_via = arrived_via;
    }
    {
        let a = &mut model.activities[activity];
        a.required_qty = keep;
        a.clean_after = clean_after;
    }
    debug!(?activity, ?sibling, %keep, %rest, "split activity");

    SplitUndo {
        original: activity,
        sibling,
        original_qty,
        original_clean_after,
        done: false,
    }
}

/// Undo a split after the reduced original failed to place: the sibling is
/// destroyed and the original's quantity, clean-after span, and dispatcher
/// membership are restored exactly. Safe to call twice.
pub fn rejoin(model: &mut PlantModel, dispatchers: &mut DispatcherSet, undo: &mut SplitUndo) {
    if undo.done {
        return;
    }
    undo.done = true;

    dispatchers.remove_everywhere(model, undo.sibling);
    let operation = model.activities[undo.sibling].operation;
    model.operation_states[operation]
        .activities
        .retain(|&a| a != undo.sibling);
    model.activities.remove(undo.sibling);

    let a = &mut model.activities[undo.original];
    a.required_qty = undo.original_qty;
    a.clean_after = undo.original_clean_after;
    debug!(original = ?undo.original, "rejoined split");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;
    use crate::policy::SchedulingPolicy;
    use crate::test_utils::*;

    fn split_policy() -> SchedulingPolicy {
        SchedulingPolicy {
            auto_split: true,
            min_split_qty: qty(1.0),
            max_split_qty: Some(qty(100.0)),
            ..SchedulingPolicy::default()
        }
    }

    // -----------------------------------------------------------------------
    // Test 1: quantity under the cap needs no split
    // -----------------------------------------------------------------------
    #[test]
    fn under_cap_not_needed() {
        let fixture = two_activity_fixture();
        let a = fixture.activities[0];
        let d = evaluate(
            &fixture.model,
            &split_policy(),
            a,
            fixture.resource,
            SplitTrigger::QuantityCap { max: qty(100.0) },
        );
        assert_eq!(d, SplitDecision::NotNeeded);
    }

    // -----------------------------------------------------------------------
    // Test 2: 20% overflow splits into cap + remainder
    // -----------------------------------------------------------------------
    #[test]
    fn overflow_splits_to_cap() {
        let mut fixture = two_activity_fixture();
        let a = fixture.activities[0];
        fixture.model.activities[a].required_qty = qty(12.0);
        let d = evaluate(
            &fixture.model,
            &split_policy(),
            a,
            fixture.resource,
            SplitTrigger::QuantityCap { max: qty(10.0) },
        );
        assert_eq!(
            d,
            SplitDecision::Split {
                keep: qty(10.0),
                rest: qty(2.0),
                clean_after: None,
            }
        );
    }

    // -----------------------------------------------------------------------
    // Test 3: remainder below minimum shrinks the kept part
    // -----------------------------------------------------------------------
    #[test]
    fn small_remainder_shrinks_keep() {
        let mut fixture = two_activity_fixture();
        let a = fixture.activities[0];
        fixture.model.activities[a].required_qty = qty(11.0);
        let mut policy = split_policy();
        policy.min_split_qty = qty(3.0);
        let d = evaluate(
            &fixture.model,
            &policy,
            a,
            fixture.resource,
            SplitTrigger::QuantityCap { max: qty(10.0) },
        );
        assert_eq!(
            d,
            SplitDecision::Split {
                keep: qty(8.0),
                rest: qty(3.0),
                clean_after: None,
            }
        );
    }

    // -----------------------------------------------------------------------
    // Test 4: disabled policy refuses
    // -----------------------------------------------------------------------
    #[test]
    fn disabled_policy_refuses() {
        let mut fixture = two_activity_fixture();
        let a = fixture.activities[0];
        fixture.model.activities[a].required_qty = qty(12.0);
        let mut policy = split_policy();
        policy.auto_split = false;
        let d = evaluate(
            &fixture.model,
            &policy,
            a,
            fixture.resource,
            SplitTrigger::QuantityCap { max: qty(10.0) },
        );
        assert_eq!(d, SplitDecision::Disabled);
    }

    // -----------------------------------------------------------------------
    // Test 5: capacity-window trigger keeps what fits the open stretch
    // -----------------------------------------------------------------------
    #[test]
    fn window_trigger_keeps_what_fits() {
        let mut fixture = two_activity_fixture();
        let a = fixture.activities[0];
        fixture.model.activities[a].required_qty = qty(10.0);
        // 1800 ticks of open window at 600 per unit holds 3 units.
        let d = evaluate(
            &fixture.model,
            &split_policy(),
            a,
            fixture.resource,
            SplitTrigger::CapacityWindow { available: 1800 },
        );
        assert_eq!(
            d,
            SplitDecision::Split {
                keep: qty(3.0),
                rest: qty(7.0),
                clean_after: None,
            }
        );
    }

    // -----------------------------------------------------------------------
    // Test 6: predecessor-ratio trigger keeps the transferred quantity
    // -----------------------------------------------------------------------
    #[test]
    fn ratio_trigger_keeps_transferred() {
        let mut fixture = two_activity_fixture();
        let a = fixture.activities[0];
        fixture.model.activities[a].required_qty = qty(10.0);
        let d = evaluate(
            &fixture.model,
            &split_policy(),
            a,
            fixture.resource,
            SplitTrigger::PredecessorRatio {
                available: qty(4.0),
            },
        );
        assert_eq!(
            d,
            SplitDecision::Split {
                keep: qty(4.0),
                rest: qty(6.0),
                clean_after: None,
            }
        );
    }

    // -----------------------------------------------------------------------
    // Test 7: perform then rejoin restores the original exactly
    // -----------------------------------------------------------------------
    #[test]
    fn rejoin_restores_original() {
        let mut fixture = two_activity_fixture();
        let a = fixture.activities[0];
        fixture.model.activities[a].required_qty = qty(12.0);
        let n_before = fixture.model.activities.len();
        let mut dispatchers = DispatcherSet::new();

        let mut undo = perform(&mut fixture.model, a, qty(10.0), Some(30));
        assert_eq!(fixture.model.activities[a].required_qty, qty(10.0));
        assert_eq!(fixture.model.activities[a].clean_after, Some(30));
        assert_eq!(fixture.model.activities.len(), n_before + 1);
        assert_eq!(
            fixture.model.activities[undo.sibling].split_parent,
            Some(a)
        );

        rejoin(&mut fixture.model, &mut dispatchers, &mut undo);
        assert_eq!(fixture.model.activities[a].required_qty, qty(12.0));
        assert_eq!(fixture.model.activities[a].clean_after, None);
        assert_eq!(fixture.model.activities.len(), n_before);

        // Idempotent.
        rejoin(&mut fixture.model, &mut dispatchers, &mut undo);
        assert_eq!(fixture.model.activities.len(), n_before);
    }

    // -----------------------------------------------------------------------
    // Test 8: cleanout trigger carries the clean-after span
    // -----------------------------------------------------------------------
    #[test]
    fn cleanout_carries_clean_span() {
        let mut fixture = two_activity_fixture();
        let a = fixture.activities[0];
        fixture.model.activities[a].required_qty = qty(10.0);
        // run_per_unit is 600 in the fixture: 3000 ticks leaves room for 5.
        let d = evaluate(
            &fixture.model,
            &split_policy(),
            a,
            fixture.resource,
            SplitTrigger::Cleanout {
                run_left: 3000,
                clean_span: 120,
            },
        );
        assert_eq!(
            d,
            SplitDecision::Split {
                keep: qty(5.0),
                rest: qty(5.0),
                clean_after: Some(120),
            }
        );
    }
}
