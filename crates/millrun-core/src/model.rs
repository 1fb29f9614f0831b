//! The plant model: arenas for every cross-referenced entity.
//!
//! The original object graph is cyclic (operation <-> activity <-> batch <->
//! resource, successor/predecessor links, dispatcher back-references). Here
//! every "pointer" is a slotmap key resolved through this owning registry,
//! turning reference cycles into index cycles with no lifetime hazard.
//!
//! Long-lived configuration (resources, MOs, paths, operations, supply)
//! is registered through the builder methods. Per-run state lives in
//! `SecondaryMap`s and in the per-run arenas (activities, batches) and is
//! reset by [`PlantModel::reset_run_state`].

use std::collections::{BTreeMap, HashMap};

use slotmap::{SecondaryMap, SlotMap};

use crate::activity::Activity;
use crate::batch::Batch;
use crate::fixed::{Qty, Ticks};
use crate::id::*;
use crate::material::{SupplyNode, SupplySource};
use crate::order::{
    AlternatePath, Association, ManufacturingOrder, MoState, Operation, OperationState,
};
use crate::resource::{Connector, ConnectorState, Resource, ResourceState};

// ---------------------------------------------------------------------------
// Warehouse
// ---------------------------------------------------------------------------

/// A storage location for material supply and product output.
#[derive(Debug, Clone)]
pub struct Warehouse {
    pub name: String,
    /// Maximum stored quantity. None is unlimited.
    pub capacity: Option<Qty>,
    /// Quantity stored at run start.
    pub base_stored: Qty,
    /// Quantity currently stored (per-run).
    pub stored: Qty,
}

// ---------------------------------------------------------------------------
// PlantModel
// ---------------------------------------------------------------------------

/// Owning registry of all scheduling entities.
#[derive(Debug, Clone, Default)]
pub struct PlantModel {
    // -- Long-lived configuration --
    pub resources: SlotMap<ResourceId, Resource>,
    pub connectors: SlotMap<ConnectorId, Connector>,
    pub mos: SlotMap<MoId, ManufacturingOrder>,
    pub paths: SlotMap<PathId, AlternatePath>,
    pub operations: SlotMap<OperationId, Operation>,
    pub warehouses: BTreeMap<WarehouseId, Warehouse>,

    // -- Supply profiles --
    pub supplies: SlotMap<SupplyNodeId, SupplyNode>,
    /// Supply node ids per (item, warehouse), sorted by available time.
    pub profiles: HashMap<(ItemId, WarehouseId), Vec<SupplyNodeId>>,

    // -- Per-run entities --
    pub activities: SlotMap<ActivityId, Activity>,
    pub batches: SlotMap<BatchId, Batch>,

    // -- Per-run state, keyed by the long-lived arenas --
    pub resource_states: SecondaryMap<ResourceId, ResourceState>,
    pub connector_states: SecondaryMap<ConnectorId, ConnectorState>,
    pub operation_states: SecondaryMap<OperationId, OperationState>,
    pub mo_states: SecondaryMap<MoId, MoState>,

    // -- Retry watch lists --
    /// Operations waiting on supply of an item.
    pub supply_watch: BTreeMap<ItemId, Vec<OperationId>>,
    /// Activities waiting on storage space in a warehouse.
    pub storage_watch: BTreeMap<WarehouseId, Vec<ActivityId>>,

    next_activity_seq: u64,
}

impl PlantModel {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------------

    pub fn add_resource(&mut self, resource: Resource) -> ResourceId {
        let id = self.resources.insert(resource);
        self.resource_states.insert(id, ResourceState::new());
        id
    }

    pub fn add_connector(&mut self, connector: Connector) -> ConnectorId {
        let id = self.connectors.insert(connector);
        self.connector_states.insert(id, ConnectorState::default());
        id
    }

    pub fn add_warehouse(&mut self, id: WarehouseId, name: &str, capacity: Option<Qty>) {
        self.warehouses.insert(
            id,
            Warehouse {
                name: name.to_string(),
                capacity,
                base_stored: Qty::from_num(0),
                stored: Qty::from_num(0),
            },
        );
    }

    pub fn add_mo(&mut self, mo: ManufacturingOrder) -> MoId {
        let id = self.mos.insert(mo);
        self.mo_states.insert(id, MoState::default());
        id
    }

    pub fn add_path(&mut self, mo: MoId) -> PathId {
        let id = self.paths.insert(AlternatePath {
            mo,
            operations: Vec::new(),
            associations: Vec::new(),
        });
        self.mos[mo].paths.push(id);
        id
    }

    pub fn add_operation(&mut self, path: PathId, operation: Operation) -> OperationId {
        let id = self.operations.insert(operation);
        self.paths[path].operations.push(id);
        self.operation_states.insert(id, OperationState::default());
        id
    }

    pub fn add_association(&mut self, path: PathId, association: Association) {
        self.paths[path].associations.push(association);
    }

    /// Register a supply node and keep its profile sorted by available time.
    pub fn add_supply(&mut self, node: SupplyNode) -> SupplyNodeId {
        let key = (node.item, node.warehouse);
        let available_at = node.available_at;
        if node.source == SupplySource::OnHand
            && let Some(w) = self.warehouses.get_mut(&node.warehouse)
        {
            w.base_stored += node.qty;
            w.stored += node.qty;
        }
        let id = self.supplies.insert(node);
        let profile = self.profiles.entry(key).or_default();
        let at = profile.partition_point(|&n| self.supplies[n].available_at <= available_at);
        profile.insert(at, id);
        id
    }

    // -----------------------------------------------------------------------
    // Per-run entity creation
    // -----------------------------------------------------------------------

    /// Create an activity for an operation. `seq` captures creation order.
    pub fn new_activity(
        &mut self,
        operation: OperationId,
        required_qty: Qty,
        release_time: Ticks,
    ) -> ActivityId {
        let n_reqs = self.operations[operation].requirements.len();
        let seq = self.next_activity_seq;
        self.next_activity_seq += 1;
        let mut activity = Activity::new(operation, seq, required_qty, n_reqs);
        activity.release_time = release_time;
        let id = self.activities.insert(activity);
        self.operation_states[operation].activities.push(id);
        id
    }

    // -----------------------------------------------------------------------
    // Graph lookups
    // -----------------------------------------------------------------------

    /// Associations whose successor is `op`.
    pub fn predecessors_of(&self, op: OperationId) -> Vec<Association> {
        let path = self.operations[op].path;
        self.paths[path]
            .associations
            .iter()
            .filter(|a| a.successor == op)
            .cloned()
            .collect()
    }

    /// Associations whose predecessor is `op`.
    pub fn successors_of(&self, op: OperationId) -> Vec<Association> {
        let path = self.operations[op].path;
        self.paths[path]
            .associations
            .iter()
            .filter(|a| a.predecessor == op)
            .cloned()
            .collect()
    }

    /// Connectors from `from` to `to`, in deterministic id order.
    pub fn connectors_between(&self, from: ResourceId, to: ResourceId) -> Vec<ConnectorId> {
        let mut out: Vec<ConnectorId> = self
            .connectors
            .iter()
            .filter(|(_, c)| c.from == from && c.to == to)
            .map(|(id, _)| id)
            .collect();
        out.sort();
        out
    }

    // -----------------------------------------------------------------------
    // Run reset
    // -----------------------------------------------------------------------

    /// Reset every per-run field. With `keep_blocks` (incremental runs),
    /// committed blocks and cleanout accounting survive; everything else
    /// (dispatcher membership, batch links, release flags, supply
    /// consumption) is meaningless outside one run and is cleared.
    pub fn reset_run_state(&mut self, keep_blocks: bool) {
        self.activities.clear();
        if !keep_blocks {
            self.batches.clear();
        }
        self.next_activity_seq = 0;
        self.supply_watch.clear();
        self.storage_watch.clear();

        for (id, _) in &self.resources {
            let stage_enabled = self
                .resource_states
                .get(id)
                .map(|s| s.stage_enabled)
                .unwrap_or(true);
            let mut fresh = ResourceState::new();
            fresh.stage_enabled = stage_enabled;
            if keep_blocks && let Some(prev) = self.resource_states.get(id) {
                fresh.blocks = prev.blocks.clone();
                fresh.run_since_clean = prev.run_since_clean;
            }
            self.resource_states.insert(id, fresh);
        }
        for (id, _) in &self.connectors {
            self.connector_states.insert(id, ConnectorState::default());
        }
        for (id, _) in &self.operations {
            self.operation_states.insert(id, OperationState::default());
        }
        for (id, _) in &self.mos {
            self.mo_states.insert(id, MoState::default());
        }

        // ActivityOutput supply belongs to the producing run; projected
        // consumption is rewound in any case.
        let stale: Vec<SupplyNodeId> = self
            .supplies
            .iter()
            .filter(|(_, n)| n.source == SupplySource::ActivityOutput)
            .map(|(id, _)| id)
            .collect();
        for id in stale {
            let node = self.supplies.remove(id);
            if let Some(node) = node
                && let Some(profile) = self.profiles.get_mut(&(node.item, node.warehouse))
            {
                profile.retain(|&n| n != id);
            }
        }
        for (_, node) in &mut self.supplies {
            node.consumed = Qty::from_num(0);
            node.staged = Qty::from_num(0);
        }
        for w in self.warehouses.values_mut() {
            w.stored = w.base_stored;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
