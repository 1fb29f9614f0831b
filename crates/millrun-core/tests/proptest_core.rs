//! Property-based tests for the millrun scheduling engine.
//!
//! Uses proptest to generate random plants and run them end to end, then
//! verify the structural invariants the engine promises: no double-booking,
//! one committed path per MO, material conservation, split/rejoin symmetry,
//! and bit-for-bit determinism.

use millrun_core::autosplit;
use millrun_core::dispatch::DispatcherSet;
use millrun_core::engine::{CommittedBlock, Engine, RunKind};
use millrun_core::fixed::{Qty, qty};
use millrun_core::id::BatchCode;
use millrun_core::model::PlantModel;
use millrun_core::order::ReqRole;
use millrun_core::policy::SchedulingPolicy;
use millrun_core::resource::BlockKind;
use millrun_core::test_utils::*;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

/// Shape of one generated MO: quantity, due date, operation count, and
/// whether its operations carry a shared batch code.
#[derive(Debug, Clone)]
struct MoShape {
    quantity: f64,
    due: u64,
    ops: usize,
    batched: bool,
    two_paths: bool,
}

fn arb_mo_shape() -> impl Strategy<Value = MoShape> {
    (
        1..=12u32,
        1_000..=500_000u64,
        1..=3usize,
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(quantity, due, ops, batched, two_paths)| MoShape {
            quantity: quantity as f64,
            due,
            ops,
            batched,
            two_paths,
        })
}

/// Build a plant with `n` single-tasking resources and the given MO shapes.
/// Operations rotate across resources; batched shapes share BatchCode(1).
fn build_plant(resources: usize, shapes: &[MoShape]) -> PlantModel {
    let mut model = PlantModel::new();
    let resource_ids: Vec<_> = (0..resources)
        .map(|i| model.add_resource(always_on_resource(&format!("res-{i}"))))
        .collect();

    for (mi, shape) in shapes.iter().enumerate() {
        let mo = model.add_mo(millrun_core::order::ManufacturingOrder {
            name: format!("MO-{mi}"),
            quantity: qty(shape.quantity),
            due: shape.due,
            priority: 0,
            release_after: 0,
            paths: Vec::new(),
            successors: Vec::new(),
        });
        let n_paths = if shape.two_paths { 2 } else { 1 };
        for pi in 0..n_paths {
            let path = model.add_path(mo);
            for oi in 0..shape.ops {
                let resource = resource_ids[(mi + pi + oi) % resource_ids.len()];
                let op = millrun_core::order::Operation {
                    mo,
                    path,
                    name: format!("op-{mi}-{pi}-{oi}"),
                    requirements: vec![millrun_core::order::ResourceRequirement {
                        role: ReqRole::Primary,
                        eligible: vec![resource],
                        locked: None,
                        default: None,
                        reservation: None,
                        setup_span: 0,
                        run_per_unit: 60,
                        post_process_span: 0,
                        storage_span: 0,
                    }],
                    materials: Vec::new(),
                    products: Vec::new(),
                    batch_code: shape.batched.then_some(BatchCode(1)),
                    compat_code: None,
                    hold_until: None,
                    transfer_by_connector: false,
                };
                model.add_operation(path, op);
            }
        }
    }
    model
}

fn arb_plant() -> impl Strategy<Value = PlantModel> {
    (1..=3usize, proptest::collection::vec(arb_mo_shape(), 1..=5))
        .prop_map(|(resources, shapes)| build_plant(resources, &shapes))
}

fn run_plant(model: &PlantModel) -> Engine {
    let mut engine =
        Engine::new(model.clone(), SchedulingPolicy::default()).expect("valid policy");
    engine.run(0, RunKind::Forward).expect("run succeeds");
    engine
}

fn flat_blocks(engine: &Engine) -> Vec<CommittedBlock> {
    millrun_core::engine::collect_blocks(&engine.model)
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    // ---- Property 1: single-tasking resources are never double-booked ----
    #[test]
    fn no_overlap_on_single_tasking(model in arb_plant()) {
        let engine = run_plant(&model);
        for (_, state) in &engine.model.resource_states {
            let mut spans: Vec<(u64, u64)> = state
                .blocks
                .iter()
                .filter(|b| b.kind == BlockKind::Run)
                .map(|b| (b.start, b.end))
                .collect();
            spans.sort();
            for pair in spans.windows(2) {
                prop_assert!(pair[0].1 <= pair[1].0, "overlap: {pair:?}");
            }
        }
    }

    // ---- Property 2: at most one path commits per MO ----
    #[test]
    fn at_most_one_path_per_mo(model in arb_plant()) {
        let engine = run_plant(&model);
        for (mo_id, mo) in &engine.model.mos {
            let committed = engine.model.mo_states[mo_id].committed_path;
            for &path in &mo.paths {
                if Some(path) == committed {
                    continue;
                }
                for &op in &engine.model.paths[path].operations {
                    let placed = engine.model.operation_states[op]
                        .activities
                        .iter()
                        .any(|&a| engine.model.activities[a].is_placed());
                    prop_assert!(
                        committed.is_none() || !placed,
                        "activity placed on a losing path"
                    );
                }
            }
        }
    }

    // ---- Property 3: committed block sequences are deterministic ----
    #[test]
    fn reruns_are_identical(model in arb_plant()) {
        let a = run_plant(&model);
        let b = run_plant(&model);
        prop_assert_eq!(flat_blocks(&a), flat_blocks(&b));

        let ordinals = |e: &Engine| {
            let mut v: Vec<(u64, u64)> = e
                .model
                .activities
                .values()
                .filter_map(|act| act.ordinal.map(|o| (o, act.seq)))
                .collect();
            v.sort();
            v
        };
        prop_assert_eq!(ordinals(&a), ordinals(&b));
    }

    // ---- Property 4: supply consumption never exceeds supply ----
    #[test]
    fn material_is_conserved(
        supply in 1..=30u32,
        demand in 1..=30u32,
        arrive in 0..=100u64,
    ) {
        let mut fixture = material_fixture(qty(supply as f64), arrive);
        // Demand per unit is 1.0, so MO quantity is the total demand.
        for (_, mo) in fixture.model.mos.iter_mut() {
            mo.quantity = qty(demand as f64);
        }
        let engine = run_plant(&fixture.model);
        for (_, node) in &engine.model.supplies {
            prop_assert!(node.consumed <= node.qty);
            prop_assert_eq!(node.staged, Qty::from_num(0), "no staging survives a run");
        }
    }

    // ---- Property 5: split then rejoin restores the activity exactly ----
    #[test]
    fn split_rejoin_roundtrips(total in 2..=100u32, keep in 1..=99u32) {
        prop_assume!(keep < total);
        let fixture = two_activity_fixture();
        let mut model = fixture.model;
        let activity = fixture.activities[0];
        model.activities[activity].required_qty = qty(total as f64);
        let before = model.activities[activity].clone();
        let count = model.activities.len();

        let mut dispatchers = DispatcherSet::new();
        let mut undo = autosplit::perform(&mut model, activity, qty(keep as f64), None);
        prop_assert_eq!(model.activities.len(), count + 1);

        autosplit::rejoin(&mut model, &mut dispatchers, &mut undo);
        prop_assert_eq!(model.activities.len(), count);
        let after = &model.activities[activity];
        prop_assert_eq!(after.required_qty, before.required_qty);
        prop_assert_eq!(after.scheduled, before.scheduled);
        prop_assert_eq!(after.clean_after, before.clean_after);
        prop_assert_eq!(&after.in_dispatchers, &before.in_dispatchers);
    }
}
