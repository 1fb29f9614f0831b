//! Integration tests for the millrun scheduling engine.
//!
//! These tests exercise end-to-end behavior across the full run pipeline:
//! release, dispatch, placement, material resolution, auto-split, batching,
//! and the notification cascade.

use millrun_core::engine::{CommittedBlock, Engine, RunKind};
use millrun_core::fixed::qty;
use millrun_core::order::OverlapKind;
use millrun_core::policy::SchedulingPolicy;
use millrun_core::resource::BlockKind;
use millrun_core::test_utils::*;

fn run_blocks(blocks: &[CommittedBlock]) -> Vec<&CommittedBlock> {
    blocks.iter().filter(|b| b.kind == BlockKind::Run).collect()
}

// ===========================================================================
// Test 1: equal-score tie at clock zero
// ===========================================================================
//
// Two MOs with identical due dates, each with one four-unit operation on the
// same single-tasking resource at 600 ticks per unit. The scores tie, so the
// earlier-created activity must win: it commits at [0, 2400] and the loser
// retries into [2400, 4800].

#[test]
fn equal_score_tie_resolves_by_creation_order() {
    let fixture = two_mo_fixture(50_000, 50_000);
    let first_mo = fixture.mo;
    let mut engine = Engine::new(fixture.model, SchedulingPolicy::default()).unwrap();
    let result = engine.run(0, RunKind::Forward).unwrap();

    assert_eq!(result.scheduled, 2);
    let runs = run_blocks(&result.blocks);
    assert_eq!(runs.len(), 2);
    assert_eq!((runs[0].start, runs[0].end), (0, 2400));
    assert_eq!((runs[1].start, runs[1].end), (2400, 4800));

    // The first-created MO owns the first slot.
    let winner_op = engine.model.activities[runs[0].activity].operation;
    assert_eq!(engine.model.operations[winner_op].mo, first_mo);
    assert_eq!(engine.model.mo_states[first_mo].last_end, 2400);
}

// ===========================================================================
// Test 2: material arriving at t=10 gates the commit
// ===========================================================================
//
// One operation needs ten units of an item whose only supply lands at t=10.
// Nothing may commit before then; the material-available event at t=10
// triggers a successful retry, and capacity is free so the run starts at 10.

#[test]
fn late_material_defers_then_places() {
    let fixture = material_fixture(qty(10.0), 10);
    let mut engine = Engine::new(fixture.model, SchedulingPolicy::default()).unwrap();
    let result = engine.run(0, RunKind::Forward).unwrap();

    assert_eq!(result.scheduled, 1);
    assert!(result.unplaced.is_empty());
    let runs = run_blocks(&result.blocks);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].start, 10);
    assert!(result.blocks.iter().all(|b| b.start >= 10));
}

// ===========================================================================
// Test 3: over-volume activity auto-splits
// ===========================================================================
//
// A twelve-unit activity on a resource capped at ten units, 20% over. With
// auto-split enabled and the minimum split amount below the overflow, two
// activities result, their quantities sum to the original, and both place.

#[test]
fn over_volume_activity_splits_and_places() {
    let (mut model, resource) = single_op_plant(qty(12.0));
    model.resources[resource].max_qty = Some(qty(10.0));
    let policy = SchedulingPolicy {
        auto_split: true,
        min_split_qty: qty(1.0),
        ..SchedulingPolicy::default()
    };
    let mut engine = Engine::new(model, policy).unwrap();
    let result = engine.run(0, RunKind::Forward).unwrap();

    assert_eq!(result.scheduled, 2);
    assert!(result.unplaced.is_empty());
    assert_eq!(engine.model.activities.len(), 2);

    let total: f64 = engine
        .model
        .activities
        .values()
        .map(|a| millrun_core::fixed::qty_to_f64(a.required_qty))
        .sum();
    assert_eq!(total, 12.0);
    for act in engine.model.activities.values() {
        assert!(act.is_placed());
        assert!(act.required_qty <= qty(10.0));
    }

    // The sibling points back at the activity that kept the original id.
    let sibling = engine
        .model
        .activities
        .values()
        .find(|a| a.split_parent.is_some())
        .expect("one split sibling");
    let parent = sibling.split_parent.unwrap();
    assert!(engine.model.activities.contains_key(parent));
    assert!(engine.model.activities[parent].split_parent.is_none());
}

// ===========================================================================
// Test 4: batch-coded work shares a slot
// ===========================================================================
//
// Two activities with the same batch code and requirement shape on one
// batching resource. The second joins the first's slot instead of queueing
// behind it: one set of shared blocks, two placed activities with the same
// span.

#[test]
fn batch_coded_work_joins_one_slot() {
    let fixture = batch_fixture();
    let mut engine = Engine::new(fixture.model, SchedulingPolicy::default()).unwrap();
    let result = engine.run(0, RunKind::Forward).unwrap();

    assert_eq!(result.scheduled, 2);
    assert_eq!(run_blocks(&result.blocks).len(), 1, "members share blocks");
    assert_eq!(engine.model.batches.len(), 1);

    let spans: Vec<_> = engine
        .model
        .activities
        .values()
        .map(|a| a.scheduled.expect("both placed"))
        .collect();
    assert_eq!(spans.len(), 2);
    assert_eq!(spans[0], spans[1]);
    let batch = engine.model.batches.values().next().unwrap();
    assert_eq!(batch.activities.len(), 2);
    // Each operation runs the full MO quantity.
    assert_eq!(batch.fill, qty(16.0));
}

// ===========================================================================
// Test 5: chained operations respect the overlap promise
// ===========================================================================
//
// first -> second with no overlap: the successor may not start before the
// predecessor ends, even though both are dispatchable on the same resource.

#[test]
fn chain_waits_for_predecessor_end() {
    let fixture = chain_fixture();
    let ops = fixture.ops.clone();
    let mut engine = Engine::new(fixture.model, SchedulingPolicy::default()).unwrap();
    let result = engine.run(0, RunKind::Forward).unwrap();

    assert_eq!(result.scheduled, 2);
    let span_of = |op| {
        engine
            .model
            .activities
            .values()
            .find(|a| a.operation == op)
            .and_then(|a| a.scheduled)
            .expect("placed")
    };
    assert!(span_of(ops[1]).start >= span_of(ops[0]).end);
}

// ===========================================================================
// Test 6: MO successors wait for the full predecessor schedule
// ===========================================================================

#[test]
fn successor_mo_releases_after_predecessor_completes() {
    let fixture = two_mo_fixture(50_000, 50_000);
    let first_mo = fixture.mo;
    let mut model = fixture.model;
    let second_mo = model
        .mos
        .keys()
        .find(|&id| id != first_mo)
        .expect("two MOs");
    model.mos[first_mo].successors.push(second_mo);

    let mut engine = Engine::new(model, SchedulingPolicy::default()).unwrap();
    let result = engine.run(0, RunKind::Forward).unwrap();

    assert_eq!(result.scheduled, 2);
    let first_end = engine.model.mo_states[first_mo].last_end;
    let second_start = engine
        .model
        .activities
        .values()
        .filter_map(|a| {
            let mo = engine.model.operations[a.operation].mo;
            (mo == second_mo).then(|| a.scheduled.map(|s| s.start)).flatten()
        })
        .min()
        .expect("successor placed");
    assert!(second_start >= first_end);
}

// ===========================================================================
// Test 7: committed blocks never overlap on a single-tasking resource
// ===========================================================================

#[test]
fn no_overlap_in_mixed_plant() {
    let fixture = two_mo_fixture(10_000, 20_000);
    let mut engine = Engine::new(fixture.model, SchedulingPolicy::default()).unwrap();
    let result = engine.run(0, RunKind::Forward).unwrap();

    let mut runs: Vec<_> = run_blocks(&result.blocks)
        .into_iter()
        .map(|b| (b.start, b.end))
        .collect();
    runs.sort();
    for pair in runs.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlapping runs: {pair:?}");
    }
}

// ===========================================================================
// Test 8: each overlap kind releases the successor at its promised time
// ===========================================================================
//
// Four-unit predecessor at 600 ticks per unit runs [0, 2400] on its own
// resource; the successor sits on a second, idle resource, so its placed
// start equals its release time.

#[test]
fn overlap_kinds_release_at_their_times() {
    let cases = [
        (OverlapKind::TransferQuantity { qty: qty(1.0) }, 600),
        (OverlapKind::TransferSpan { span: 300 }, 300),
        (OverlapKind::PercentComplete { percent: qty(50.0) }, 1200),
        (OverlapKind::AtFirstTransfer, 600),
        (OverlapKind::BeforePredecessorStart { offset: 0 }, 0),
    ];
    for (overlap, expected) in cases {
        let fixture = overlap_chain_fixture(overlap.clone(), 600);
        let ops = fixture.ops.clone();
        let mut engine = Engine::new(fixture.model, SchedulingPolicy::default()).unwrap();
        let result = engine.run(0, RunKind::Forward).unwrap();

        assert_eq!(result.scheduled, 2, "{overlap:?}");
        let second_start = engine
            .model
            .activities
            .values()
            .filter(|a| a.operation == ops[1])
            .filter_map(|a| a.scheduled.map(|s| s.run_start))
            .min()
            .expect("successor placed");
        assert_eq!(second_start, expected, "{overlap:?}");
    }
}

// ===========================================================================
// Test 9: a fast successor splits on the transferred quantity
// ===========================================================================
//
// The predecessor produces one unit every 600 ticks; the successor consumes
// one every 60. Released after the first unit at 600, the successor would
// outrun the transfer, so it splits: a first piece covering what will have
// been produced, and a remainder that waits for the predecessor to finish
// at 2400.

#[test]
fn fast_successor_splits_on_transferred_quantity() {
    let fixture = overlap_chain_fixture(OverlapKind::TransferQuantity { qty: qty(1.0) }, 60);
    let ops = fixture.ops.clone();
    let policy = SchedulingPolicy {
        auto_split: true,
        min_split_qty: qty(0.5),
        ..SchedulingPolicy::default()
    };
    let mut engine = Engine::new(fixture.model, policy).unwrap();
    let result = engine.run(0, RunKind::Forward).unwrap();

    assert_eq!(result.scheduled, 3);
    assert!(result.unplaced.is_empty());

    let mut pieces: Vec<_> = engine
        .model
        .activities
        .values()
        .filter(|a| a.operation == ops[1])
        .map(|a| (a.scheduled.expect("placed").run_start, a.required_qty))
        .collect();
    pieces.sort();
    assert_eq!(pieces.len(), 2);
    assert_eq!(pieces[0].0, 600);
    assert!(pieces[1].0 >= 2400, "remainder waits for the full transfer");
    assert_eq!(pieces[0].1 + pieces[1].1, qty(4.0));
}
