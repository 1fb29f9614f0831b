//! Data-driven scenario loading from JSON.
//!
//! Feature-gated behind `scenario-loader`. Provides JSON deserialization
//! into a [`PlantModel`] plus [`SchedulingPolicy`] for scenarios defined in
//! data files. Quantities are plain floats in the JSON and converted to
//! fixed-point on load; entities reference each other by name.

use std::collections::HashMap;

use crate::error::ValidationError;
use crate::fixed::{Qty, Ticks, qty};
use crate::id::{BatchCode, CompatCode, ItemId, MoId, OperationId, ResourceId, WarehouseId};
use crate::material::{SupplyNode, SupplySource};
use crate::model::PlantModel;
use crate::order::{
    Association, ManufacturingOrder, MaterialConstraint, MaterialRequirement, Operation,
    OverlapKind, Product, ProductTiming, ReqRole, ResourceRequirement,
};
use crate::policy::{DispatchRuleKind, SchedulingPolicy, SetupCorrection};
use crate::resource::{
    BatchLimit, CapacityInterval, CapacityKind, CleanoutRule, Connector, Resource,
};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during scenario loading.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioLoadError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("policy rejected: {0}")]
    Policy(#[from] ValidationError),
    #[error("unknown resource reference: {0}")]
    UnknownResourceRef(String),
    #[error("unknown warehouse reference: {0}")]
    UnknownWarehouseRef(String),
    #[error("unknown item reference: {0}")]
    UnknownItemRef(String),
    #[error("unknown operation reference: {0}")]
    UnknownOperationRef(String),
    #[error("unknown order reference: {0}")]
    UnknownOrderRef(String),
    #[error("duplicate name: {0}")]
    DuplicateName(String),
}

// ---------------------------------------------------------------------------
// JSON data structures
// ---------------------------------------------------------------------------

/// Top-level scenario structure for JSON deserialization.
#[derive(Debug, serde::Deserialize)]
pub struct ScenarioData {
    #[serde(default)]
    pub resources: Vec<ResourceData>,
    #[serde(default)]
    pub connectors: Vec<ConnectorData>,
    #[serde(default)]
    pub warehouses: Vec<WarehouseData>,
    /// Item names; an item's position is its ID.
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub supplies: Vec<SupplyData>,
    #[serde(default)]
    pub orders: Vec<OrderData>,
    #[serde(default)]
    pub policy: Option<PolicyData>,
}

/// JSON representation of a resource.
#[derive(Debug, serde::Deserialize)]
pub struct ResourceData {
    pub name: String,
    #[serde(default)]
    pub capacity: CapacityData,
    /// Online intervals. Empty means always online.
    #[serde(default)]
    pub online: Vec<IntervalData>,
    #[serde(default)]
    pub max_volume: Option<f64>,
    #[serde(default)]
    pub min_qty: f64,
    #[serde(default)]
    pub max_qty: Option<f64>,
    #[serde(default)]
    pub batch_limit: Option<BatchLimitData>,
    #[serde(default)]
    pub cleanout: Option<CleanoutData>,
    #[serde(default)]
    pub compat: Vec<u32>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityData {
    #[default]
    Single,
    Multi {
        attention: u32,
    },
    Infinite,
}

#[derive(Debug, serde::Deserialize)]
pub struct IntervalData {
    pub start: Ticks,
    pub end: Ticks,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchLimitData {
    Percent { max_fill: u32 },
    Volume { max: f64 },
}

#[derive(Debug, serde::Deserialize)]
pub struct CleanoutData {
    pub max_run: Ticks,
    pub clean_span: Ticks,
}

/// JSON representation of a connector between two resources.
#[derive(Debug, serde::Deserialize)]
pub struct ConnectorData {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub transit: Ticks,
    #[serde(default = "one")]
    pub concurrency: u32,
}

fn one() -> u32 {
    1
}

/// JSON representation of a warehouse.
#[derive(Debug, serde::Deserialize)]
pub struct WarehouseData {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub capacity: Option<f64>,
}

/// JSON representation of a projected supply.
#[derive(Debug, serde::Deserialize)]
pub struct SupplyData {
    pub item: String,
    pub warehouse: String,
    #[serde(default)]
    pub source: SourceData,
    #[serde(default)]
    pub available_at: Ticks,
    pub qty: f64,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceData {
    #[default]
    OnHand,
    Incoming,
}

/// JSON representation of a manufacturing order.
#[derive(Debug, serde::Deserialize)]
pub struct OrderData {
    pub name: String,
    pub quantity: f64,
    pub due: Ticks,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub release_after: Ticks,
    pub paths: Vec<PathData>,
    /// Names of orders released when this one is fully scheduled.
    #[serde(default)]
    pub successors: Vec<String>,
}

/// JSON representation of one alternate path.
#[derive(Debug, serde::Deserialize)]
pub struct PathData {
    pub operations: Vec<OperationData>,
    #[serde(default)]
    pub associations: Vec<AssociationData>,
}

/// JSON representation of an operation.
#[derive(Debug, serde::Deserialize)]
pub struct OperationData {
    pub name: String,
    pub resources: Vec<RequirementData>,
    #[serde(default)]
    pub materials: Vec<MaterialData>,
    #[serde(default)]
    pub products: Vec<ProductData>,
    #[serde(default)]
    pub batch_code: Option<u32>,
    #[serde(default)]
    pub compat_code: Option<u32>,
    #[serde(default)]
    pub hold_until: Option<Ticks>,
    #[serde(default)]
    pub transfer_by_connector: bool,
}

/// JSON representation of a resource requirement.
#[derive(Debug, serde::Deserialize)]
pub struct RequirementData {
    pub role: ReqRole,
    #[serde(default)]
    pub eligible: Vec<String>,
    #[serde(default)]
    pub locked: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub reservation: Option<String>,
    #[serde(default)]
    pub setup_span: Ticks,
    pub run_per_unit: Ticks,
    #[serde(default)]
    pub post_process_span: Ticks,
    #[serde(default)]
    pub storage_span: Ticks,
}

/// JSON representation of a material requirement.
#[derive(Debug, serde::Deserialize)]
pub struct MaterialData {
    pub item: String,
    pub warehouse: String,
    pub qty_per_unit: f64,
    #[serde(default)]
    pub constraint: Option<MaterialConstraint>,
}

/// JSON representation of a produced item.
#[derive(Debug, serde::Deserialize)]
pub struct ProductData {
    pub item: String,
    pub warehouse: String,
    pub qty_per_unit: f64,
    #[serde(default)]
    pub timing: Option<ProductTiming>,
}

/// JSON representation of a precedence link, by operation name.
#[derive(Debug, serde::Deserialize)]
pub struct AssociationData {
    pub predecessor: String,
    pub successor: String,
    #[serde(default)]
    pub overlap: OverlapData,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapData {
    #[default]
    None,
    TransferQuantity {
        qty: f64,
    },
    TransferSpan {
        span: Ticks,
    },
    PercentComplete {
        percent: f64,
    },
    AtFirstTransfer,
    BeforePredecessorStart {
        offset: Ticks,
    },
}

/// JSON representation of the scheduling policy.
#[derive(Debug, serde::Deserialize)]
pub struct PolicyData {
    #[serde(default)]
    pub rule: Option<DispatchRuleKind>,
    #[serde(default)]
    pub horizon: Option<Ticks>,
    #[serde(default)]
    pub progress_every: Option<u64>,
    #[serde(default)]
    pub auto_split: bool,
    #[serde(default)]
    pub min_split_qty: Option<f64>,
    #[serde(default)]
    pub max_split_qty: Option<f64>,
    #[serde(default = "default_true")]
    pub allow_new_batch: bool,
    #[serde(default)]
    pub setup_correction: Option<SetupCorrection>,
    #[serde(default)]
    pub max_committed_blocks: Option<u64>,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loading functions
// ---------------------------------------------------------------------------

/// A loaded scenario: the plant model plus the policy to run it under.
#[derive(Debug)]
pub struct Scenario {
    pub model: PlantModel,
    pub policy: SchedulingPolicy,
}

/// Load a scenario from a JSON string.
pub fn load_scenario_json(json: &str) -> Result<Scenario, ScenarioLoadError> {
    let data: ScenarioData = serde_json::from_str(json)?;
    build_scenario(data)
}

/// Load a scenario from JSON bytes.
pub fn load_scenario_json_bytes(bytes: &[u8]) -> Result<Scenario, ScenarioLoadError> {
    let data: ScenarioData = serde_json::from_slice(bytes)?;
    build_scenario(data)
}

struct NameMaps {
    resources: HashMap<String, ResourceId>,
    warehouses: HashMap<String, WarehouseId>,
    items: HashMap<String, ItemId>,
}

impl NameMaps {
    fn resource(&self, name: &str) -> Result<ResourceId, ScenarioLoadError> {
        self.resources
            .get(name)
            .copied()
            .ok_or_else(|| ScenarioLoadError::UnknownResourceRef(name.to_string()))
    }

    fn warehouse(&self, name: &str) -> Result<WarehouseId, ScenarioLoadError> {
        self.warehouses
            .get(name)
            .copied()
            .ok_or_else(|| ScenarioLoadError::UnknownWarehouseRef(name.to_string()))
    }

    fn item(&self, name: &str) -> Result<ItemId, ScenarioLoadError> {
        self.items
            .get(name)
            .copied()
            .ok_or_else(|| ScenarioLoadError::UnknownItemRef(name.to_string()))
    }
}

fn build_scenario(data: ScenarioData) -> Result<Scenario, ScenarioLoadError> {
    let mut model = PlantModel::new();
    let mut maps = NameMaps {
        resources: HashMap::new(),
        warehouses: HashMap::new(),
        items: HashMap::new(),
    };

    for res in &data.resources {
        let id = model.add_resource(build_resource(res));
        if maps.resources.insert(res.name.clone(), id).is_some() {
            return Err(ScenarioLoadError::DuplicateName(res.name.clone()));
        }
    }

    for wh in &data.warehouses {
        let id = WarehouseId(wh.id);
        model.add_warehouse(id, &wh.name, wh.capacity.map(qty));
        if maps.warehouses.insert(wh.name.clone(), id).is_some() {
            return Err(ScenarioLoadError::DuplicateName(wh.name.clone()));
        }
    }

    for (index, name) in data.items.iter().enumerate() {
        let id = ItemId(index as u32);
        if maps.items.insert(name.clone(), id).is_some() {
            return Err(ScenarioLoadError::DuplicateName(name.clone()));
        }
    }

    for conn in &data.connectors {
        model.add_connector(Connector {
            from: maps.resource(&conn.from)?,
            to: maps.resource(&conn.to)?,
            transit: conn.transit,
            concurrency: conn.concurrency,
        });
    }

    for supply in &data.supplies {
        model.add_supply(SupplyNode {
            item: maps.item(&supply.item)?,
            warehouse: maps.warehouse(&supply.warehouse)?,
            source: match supply.source {
                SourceData::OnHand => SupplySource::OnHand,
                SourceData::Incoming => SupplySource::Incoming,
            },
            available_at: supply.available_at,
            qty: qty(supply.qty),
            consumed: Qty::from_num(0),
            staged: Qty::from_num(0),
        });
    }

    // Orders in two passes: create them all first so successor references
    // can point forward.
    let mut order_ids: HashMap<String, MoId> = HashMap::new();
    for order in &data.orders {
        let id = model.add_mo(ManufacturingOrder {
            name: order.name.clone(),
            quantity: qty(order.quantity),
            due: order.due,
            priority: order.priority,
            release_after: order.release_after,
            paths: Vec::new(),
            successors: Vec::new(),
        });
        if order_ids.insert(order.name.clone(), id).is_some() {
            return Err(ScenarioLoadError::DuplicateName(order.name.clone()));
        }
    }

    for order in &data.orders {
        let mo = order_ids[&order.name];
        for succ in &order.successors {
            let succ_id = order_ids
                .get(succ)
                .copied()
                .ok_or_else(|| ScenarioLoadError::UnknownOrderRef(succ.clone()))?;
            model.mos[mo].successors.push(succ_id);
        }
        for path_data in &order.paths {
            let path = model.add_path(mo);
            let mut op_ids: HashMap<String, OperationId> = HashMap::new();
            for op_data in &path_data.operations {
                let op = Operation {
                    mo,
                    path,
                    name: op_data.name.clone(),
                    requirements: op_data
                        .resources
                        .iter()
                        .map(|r| build_requirement(&maps, r))
                        .collect::<Result<_, _>>()?,
                    materials: op_data
                        .materials
                        .iter()
                        .map(|m| {
                            Ok(MaterialRequirement {
                                item: maps.item(&m.item)?,
                                warehouse: maps.warehouse(&m.warehouse)?,
                                qty_per_unit: qty(m.qty_per_unit),
                                constraint: m
                                    .constraint
                                    .clone()
                                    .unwrap_or(MaterialConstraint::AvailableDate),
                            })
                        })
                        .collect::<Result<_, ScenarioLoadError>>()?,
                    products: op_data
                        .products
                        .iter()
                        .map(|p| {
                            Ok(Product {
                                item: maps.item(&p.item)?,
                                warehouse: maps.warehouse(&p.warehouse)?,
                                qty_per_unit: qty(p.qty_per_unit),
                                timing: p.timing.clone().unwrap_or(ProductTiming::AtRunEnd),
                            })
                        })
                        .collect::<Result<_, ScenarioLoadError>>()?,
                    batch_code: op_data.batch_code.map(BatchCode),
                    compat_code: op_data.compat_code.map(CompatCode),
                    hold_until: op_data.hold_until,
                    transfer_by_connector: op_data.transfer_by_connector,
                };
                let id = model.add_operation(path, op);
                if op_ids.insert(op_data.name.clone(), id).is_some() {
                    return Err(ScenarioLoadError::DuplicateName(op_data.name.clone()));
                }
            }
            for assoc in &path_data.associations {
                let lookup = |name: &str| {
                    op_ids
                        .get(name)
                        .copied()
                        .ok_or_else(|| ScenarioLoadError::UnknownOperationRef(name.to_string()))
                };
                model.add_association(
                    path,
                    Association {
                        predecessor: lookup(&assoc.predecessor)?,
                        successor: lookup(&assoc.successor)?,
                        overlap: build_overlap(&assoc.overlap),
                    },
                );
            }
        }
    }

    let policy = data.policy.map(build_policy).unwrap_or_default();
    policy.validate()?;

    Ok(Scenario { model, policy })
}

fn build_resource(data: &ResourceData) -> Resource {
    let online = if data.online.is_empty() {
        vec![CapacityInterval {
            start: 0,
            end: Ticks::MAX,
        }]
    } else {
        data.online
            .iter()
            .map(|i| CapacityInterval {
                start: i.start,
                end: i.end,
            })
            .collect()
    };
    Resource {
        name: data.name.clone(),
        capacity: match data.capacity {
            CapacityData::Single => CapacityKind::SingleTasking,
            CapacityData::Multi { attention } => CapacityKind::MultiTasking { attention },
            CapacityData::Infinite => CapacityKind::Infinite,
        },
        online,
        max_volume: data.max_volume.map(qty),
        min_qty: qty(data.min_qty),
        max_qty: data.max_qty.map(qty),
        batch_limit: data.batch_limit.as_ref().map(|b| match b {
            BatchLimitData::Percent { max_fill } => BatchLimit::Percent {
                max_fill: *max_fill,
            },
            BatchLimitData::Volume { max } => BatchLimit::Volume { max: qty(*max) },
        }),
        cleanout: data.cleanout.as_ref().map(|c| CleanoutRule {
            max_run: c.max_run,
            clean_span: c.clean_span,
        }),
        compat: data.compat.iter().copied().map(CompatCode).collect(),
    }
}

fn build_requirement(
    maps: &NameMaps,
    data: &RequirementData,
) -> Result<ResourceRequirement, ScenarioLoadError> {
    let resolve = |opt: &Option<String>| match opt {
        Some(name) => maps.resource(name).map(Some),
        None => Ok(None),
    };
    Ok(ResourceRequirement {
        role: data.role,
        eligible: data
            .eligible
            .iter()
            .map(|name| maps.resource(name))
            .collect::<Result<_, _>>()?,
        locked: resolve(&data.locked)?,
        default: resolve(&data.default)?,
        reservation: resolve(&data.reservation)?,
        setup_span: data.setup_span,
        run_per_unit: data.run_per_unit,
        post_process_span: data.post_process_span,
        storage_span: data.storage_span,
    })
}

fn build_overlap(data: &OverlapData) -> OverlapKind {
    match data {
        OverlapData::None => OverlapKind::None,
        OverlapData::TransferQuantity { qty: q } => OverlapKind::TransferQuantity { qty: qty(*q) },
        OverlapData::TransferSpan { span } => OverlapKind::TransferSpan { span: *span },
        OverlapData::PercentComplete { percent } => OverlapKind::PercentComplete {
            percent: qty(*percent),
        },
        OverlapData::AtFirstTransfer => OverlapKind::AtFirstTransfer,
        OverlapData::BeforePredecessorStart { offset } => {
            OverlapKind::BeforePredecessorStart { offset: *offset }
        }
    }
}

fn build_policy(data: PolicyData) -> SchedulingPolicy {
    let base = SchedulingPolicy::default();
    SchedulingPolicy {
        rule: data.rule.unwrap_or(base.rule),
        horizon: data.horizon.unwrap_or(base.horizon),
        progress_every: data.progress_every.unwrap_or(base.progress_every),
        auto_split: data.auto_split,
        min_split_qty: data.min_split_qty.map(qty).unwrap_or(base.min_split_qty),
        max_split_qty: data.max_split_qty.map(qty),
        allow_new_batch: data.allow_new_batch,
        setup_correction: data.setup_correction.unwrap_or(base.setup_correction),
        max_committed_blocks: data.max_committed_blocks,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
