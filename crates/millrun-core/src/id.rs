use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a capacity-bearing resource (machine, tank, line).
    pub struct ResourceId;

    /// Identifies a connector between two resources.
    pub struct ConnectorId;

    /// Identifies a manufacturing order.
    pub struct MoId;

    /// Identifies an alternate path of a manufacturing order.
    pub struct PathId;

    /// Identifies an operation (one routing step of a path).
    pub struct OperationId;

    /// Identifies an activity (the unit actually placed on resources).
    pub struct ActivityId;

    /// Identifies a committed batch on a resource time slot.
    pub struct BatchId;

    /// Identifies one projected supply node of a supply profile.
    pub struct SupplyNodeId;
}

/// Identifies a material item. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u32);

/// Identifies a warehouse holding material supply and product output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WarehouseId(pub u32);

/// Batch code: activities may share a batch only when codes match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchCode(pub u32);

/// Compatibility-group code limiting which activities a resource accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompatCode(pub u32);
