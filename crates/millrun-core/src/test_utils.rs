//! Shared fixtures for unit and integration tests.
//!
//! Everything here builds small plants by hand: one or two single-tasking
//! resources online around the clock, a manufacturing order or two, and
//! operations with a single primary requirement unless a test says
//! otherwise. Times are plain ticks; quantities use the fixed-point type.

use crate::fixed::{Qty, Ticks, qty};
use crate::id::{ActivityId, BatchCode, ItemId, MoId, OperationId, PathId, ResourceId, WarehouseId};
use crate::material::{SupplyNode, SupplySource};
use crate::model::PlantModel;
use crate::order::{
    Association, ManufacturingOrder, MaterialConstraint, MaterialRequirement, Operation,
    OverlapKind, ReqRole, ResourceRequirement,
};
use crate::resource::{CapacityInterval, CapacityKind, Resource};

pub const FAR_FUTURE: Ticks = 1_000_000_000;

/// A single-tasking resource online from 0 to [`FAR_FUTURE`].
pub fn always_on_resource(name: &str) -> Resource {
    Resource {
        name: name.to_string(),
        capacity: CapacityKind::SingleTasking,
        online: vec![CapacityInterval {
            start: 0,
            end: FAR_FUTURE,
        }],
        max_volume: None,
        min_qty: Qty::from_num(0),
        max_qty: None,
        batch_limit: None,
        cleanout: None,
        compat: Vec::new(),
    }
}

/// A primary requirement on one eligible resource, 600 ticks per unit,
/// no setup or post-processing.
pub fn primary_req(resource: ResourceId) -> ResourceRequirement {
    ResourceRequirement {
        role: ReqRole::Primary,
        eligible: vec![resource],
        locked: None,
        default: None,
        reservation: None,
        setup_span: 0,
        run_per_unit: 600,
        post_process_span: 0,
        storage_span: 0,
    }
}

fn plain_mo(name: &str, quantity: Qty, due: Ticks) -> ManufacturingOrder {
    ManufacturingOrder {
        name: name.to_string(),
        quantity,
        due,
        priority: 0,
        release_after: 0,
        paths: Vec::new(),
        successors: Vec::new(),
    }
}

fn plain_op(mo: MoId, path: PathId, name: &str, resource: ResourceId) -> Operation {
    Operation {
        mo,
        path,
        name: name.to_string(),
        requirements: vec![primary_req(resource)],
        materials: Vec::new(),
        products: Vec::new(),
        batch_code: None,
        compat_code: None,
        hold_until: None,
        transfer_by_connector: false,
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// One resource, one MO, two independent operations with one ready activity
/// each.
pub struct PlantFixture {
    pub model: PlantModel,
    pub resource: ResourceId,
    pub mo: MoId,
    pub activities: Vec<ActivityId>,
}

pub fn two_activity_fixture() -> PlantFixture {
    let mut model = PlantModel::new();
    let resource = model.add_resource(always_on_resource("mill"));
    let mo = model.add_mo(plain_mo("MO-1", qty(4.0), 100_000));
    let path = model.add_path(mo);
    let op_a = {
        let op = plain_op(mo, path, "rough", resource);
        model.add_operation(path, op)
    };
    let op_b = {
        let op = plain_op(mo, path, "finish", resource);
        model.add_operation(path, op)
    };
    let a = model.new_activity(op_a, qty(4.0), 0);
    let b = model.new_activity(op_b, qty(4.0), 0);
    PlantFixture {
        model,
        resource,
        mo,
        activities: vec![a, b],
    }
}

/// Two MOs with the given due dates, one operation and one ready activity
/// each, sharing a resource.
pub fn two_mo_fixture(due_a: Ticks, due_b: Ticks) -> PlantFixture {
    let mut model = PlantModel::new();
    let resource = model.add_resource(always_on_resource("mill"));
    let mut activities = Vec::new();
    let mut first_mo = None;
    for (i, due) in [due_a, due_b].into_iter().enumerate() {
        let mo = model.add_mo(plain_mo(&format!("MO-{i}"), qty(4.0), due));
        first_mo.get_or_insert(mo);
        let path = model.add_path(mo);
        let op = plain_op(mo, path, "step", resource);
        let op = model.add_operation(path, op);
        activities.push(model.new_activity(op, qty(4.0), 0));
    }
    PlantFixture {
        model,
        resource,
        mo: first_mo.unwrap_or_default(),
        activities,
    }
}

/// Two activities whose operations share a batch code and requirement
/// shape; quantities 3 and 5.
pub fn batch_fixture() -> PlantFixture {
    let mut model = PlantModel::new();
    let resource = model.add_resource(always_on_resource("oven"));
    let mo = model.add_mo(plain_mo("MO-1", qty(8.0), 100_000));
    let path = model.add_path(mo);
    let mut activities = Vec::new();
    for (name, q) in [("bake-a", qty(3.0)), ("bake-b", qty(5.0))] {
        let mut op = plain_op(mo, path, name, resource);
        op.batch_code = Some(BatchCode(1));
        let op = model.add_operation(path, op);
        activities.push(model.new_activity(op, q, 0));
    }
    PlantFixture {
        model,
        resource,
        mo,
        activities,
    }
}

/// One MO, one path, two operations chained first -> second with no
/// overlap. No activities are pre-created; release does that.
pub struct ChainFixture {
    pub model: PlantModel,
    pub resource: ResourceId,
    pub mo: MoId,
    pub path: PathId,
    pub ops: Vec<OperationId>,
}

pub fn chain_fixture() -> ChainFixture {
    let mut model = PlantModel::new();
    let resource = model.add_resource(always_on_resource("mill"));
    let mo = model.add_mo(plain_mo("MO-1", qty(1.0), 100_000));
    let path = model.add_path(mo);
    let first = {
        let op = plain_op(mo, path, "rough", resource);
        model.add_operation(path, op)
    };
    let second = {
        let op = plain_op(mo, path, "finish", resource);
        model.add_operation(path, op)
    };
    model.add_association(
        path,
        Association {
            predecessor: first,
            successor: second,
            overlap: OverlapKind::None,
        },
    );
    ChainFixture {
        model,
        resource,
        mo,
        path,
        ops: vec![first, second],
    }
}

/// Chain of two four-unit operations on separate resources, linked by the
/// given overlap. The successor's per-unit run time is `succ_run_per_unit`;
/// the predecessor keeps the default 600. `resource` is the predecessor's.
pub fn overlap_chain_fixture(overlap: OverlapKind, succ_run_per_unit: Ticks) -> ChainFixture {
    let mut model = PlantModel::new();
    let first_res = model.add_resource(always_on_resource("mill"));
    let second_res = model.add_resource(always_on_resource("lathe"));
    let mo = model.add_mo(plain_mo("MO-1", qty(4.0), 100_000));
    let path = model.add_path(mo);
    let first = {
        let op = plain_op(mo, path, "rough", first_res);
        model.add_operation(path, op)
    };
    let second = {
        let mut op = plain_op(mo, path, "finish", second_res);
        op.requirements[0].run_per_unit = succ_run_per_unit;
        model.add_operation(path, op)
    };
    model.add_association(
        path,
        Association {
            predecessor: first,
            successor: second,
            overlap,
        },
    );
    ChainFixture {
        model,
        resource: first_res,
        mo,
        path,
        ops: vec![first, second],
    }
}

/// Two independent operations, each needing a primary on `primary` and a
/// secondary on `helper`. No activities are pre-created.
pub struct SecondaryFixture {
    pub model: PlantModel,
    pub primary: ResourceId,
    pub helper: ResourceId,
    pub mo: MoId,
    pub ops: Vec<OperationId>,
}

pub fn secondary_fixture() -> SecondaryFixture {
    let mut model = PlantModel::new();
    let primary = model.add_resource(always_on_resource("mill"));
    let helper = model.add_resource(always_on_resource("jig"));
    let mo = model.add_mo(plain_mo("MO-1", qty(2.0), 100_000));
    let path = model.add_path(mo);
    let mut ops = Vec::new();
    for name in ["rough", "finish"] {
        let mut op = plain_op(mo, path, name, primary);
        op.requirements.push(ResourceRequirement {
            role: ReqRole::Secondary,
            eligible: vec![helper],
            locked: None,
            default: None,
            reservation: None,
            setup_span: 0,
            run_per_unit: 0,
            post_process_span: 0,
            storage_span: 0,
        });
        ops.push(model.add_operation(path, op));
    }
    SecondaryFixture {
        model,
        primary,
        helper,
        mo,
        ops,
    }
}

/// One MO with two alternate single-operation paths on one resource.
pub struct TwoPathFixture {
    pub model: PlantModel,
    pub resource: ResourceId,
    pub mo: MoId,
    pub paths: Vec<PathId>,
    pub ops_by_path: Vec<Vec<OperationId>>,
}

pub fn two_path_fixture() -> TwoPathFixture {
    let mut model = PlantModel::new();
    let resource = model.add_resource(always_on_resource("mill"));
    let mo = model.add_mo(plain_mo("MO-1", qty(1.0), 100_000));
    let mut paths = Vec::new();
    let mut ops_by_path = Vec::new();
    for name in ["fast", "slow"] {
        let path = model.add_path(mo);
        let op = plain_op(mo, path, name, resource);
        let op = model.add_operation(path, op);
        paths.push(path);
        ops_by_path.push(vec![op]);
    }
    TwoPathFixture {
        model,
        resource,
        mo,
        paths,
        ops_by_path,
    }
}

/// A complete one-operation plant ready for an engine run.
pub fn single_op_plant(quantity: Qty) -> (PlantModel, ResourceId) {
    let mut model = PlantModel::new();
    let resource = model.add_resource(always_on_resource("mill"));
    let mo = model.add_mo(plain_mo("MO-1", quantity, 100_000));
    let path = model.add_path(mo);
    let op = plain_op(mo, path, "step", resource);
    model.add_operation(path, op);
    (model, resource)
}

// ---------------------------------------------------------------------------
// Material fixtures
// ---------------------------------------------------------------------------

/// One operation requiring one unit of material per unit produced, with a
/// single supply node.
pub struct MaterialFixture {
    pub model: PlantModel,
    pub op: OperationId,
    pub item: ItemId,
    pub warehouse: WarehouseId,
}

pub fn material_fixture(supply_qty: Qty, available_at: Ticks) -> MaterialFixture {
    let item = ItemId(7);
    let warehouse = WarehouseId(1);
    let mut model = PlantModel::new();
    let resource = model.add_resource(always_on_resource("mill"));
    model.add_warehouse(warehouse, "raw", None);
    let mo = model.add_mo(plain_mo("MO-1", qty(10.0), 100_000));
    let path = model.add_path(mo);
    let mut op = plain_op(mo, path, "step", resource);
    op.materials.push(MaterialRequirement {
        item,
        warehouse,
        qty_per_unit: qty(1.0),
        constraint: MaterialConstraint::AvailableDate,
    });
    let op = model.add_operation(path, op);

    let mut fixture = MaterialFixture {
        model,
        op,
        item,
        warehouse,
    };
    add_supply_at(&mut fixture, supply_qty, available_at);
    fixture
}

/// Add another supply node for the fixture's item and warehouse. Nodes at
/// time zero count as on-hand stock; later ones as incoming.
pub fn add_supply_at(fixture: &mut MaterialFixture, quantity: Qty, available_at: Ticks) {
    let source = if available_at == 0 {
        SupplySource::OnHand
    } else {
        SupplySource::Incoming
    };
    fixture.model.add_supply(SupplyNode {
        item: fixture.item,
        warehouse: fixture.warehouse,
        source,
        available_at,
        qty: quantity,
        consumed: Qty::from_num(0),
        staged: Qty::from_num(0),
    });
}
