//! Manufacturing orders, alternate paths, operations and associations.
//!
//! An MO is demand for a quantity of product, decomposed into one or more
//! alternate paths. Each path is a DAG of operations linked by precedence
//! associations whose overlap kind decides how early a successor may start
//! relative to its predecessor's progress. Configuration here is long-lived;
//! the matching per-run state lives in [`OperationState`] / [`MoState`] and
//! is reset at the start of every run.

use crate::fixed::{Qty, Ticks};
use crate::id::*;
use crate::readiness::LatestConstraint;

// ---------------------------------------------------------------------------
// Overlap kinds
// ---------------------------------------------------------------------------

/// How early a successor may release relative to its predecessor.
/// Exactly one kind applies per association, chosen from static metadata.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OverlapKind {
    /// Successor releases when the predecessor activity fully ends.
    None,
    /// Successor releases once the predecessor has produced `qty` units.
    TransferQuantity { qty: Qty },
    /// Successor releases `span` ticks after the predecessor's run starts,
    /// and must itself start no later than `span` ticks after the
    /// predecessor's run ends.
    TransferSpan { span: Ticks },
    /// Successor releases when the predecessor run is `percent` complete
    /// (0..=100 as a fixed-point value).
    PercentComplete { percent: Qty },
    /// Successor releases at the predecessor's first produced unit.
    AtFirstTransfer,
    /// Successor releases `offset` ticks before the predecessor's run start.
    BeforePredecessorStart { offset: Ticks },
}

/// A precedence link between two operations of the same path.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Association {
    pub predecessor: OperationId,
    pub successor: OperationId,
    pub overlap: OverlapKind,
}

// ---------------------------------------------------------------------------
// Paths and MOs
// ---------------------------------------------------------------------------

/// One way to produce an MO: a DAG of operations plus its associations.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AlternatePath {
    pub mo: MoId,
    pub operations: Vec<OperationId>,
    pub associations: Vec<Association>,
}

/// A demand for a quantity of product.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManufacturingOrder {
    pub name: String,
    pub quantity: Qty,
    pub due: Ticks,
    pub priority: u32,
    /// Earliest time any operation of the MO may release.
    pub release_after: Ticks,
    pub paths: Vec<PathId>,
    /// MOs released when this MO is fully scheduled.
    pub successors: Vec<MoId>,
}

/// Per-run MO state, reset at run start.
#[derive(Debug, Clone, Default)]
pub struct MoState {
    pub released: bool,
    /// Set when the first activity of the MO commits; every other path is
    /// then removed from all dispatchers. At most one path progresses per
    /// MO per run.
    pub committed_path: Option<PathId>,
    pub scheduled_ops: usize,
    /// End time of the latest placed activity, used to release successors.
    pub last_end: Ticks,
}

// ---------------------------------------------------------------------------
// Resource requirements
// ---------------------------------------------------------------------------

/// Role of a resource requirement. Index 0 of an operation's requirement
/// list is always the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReqRole {
    Primary,
    Secondary,
}

/// An operation's need for one resource role over some usage span.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResourceRequirement {
    pub role: ReqRole,
    /// Candidate resources, in preference order.
    pub eligible: Vec<ResourceId>,
    /// Hard lock to a single resource (excludes the activity from every
    /// other dispatcher).
    pub locked: Option<ResourceId>,
    /// Default resource tried first for secondary resolution.
    pub default: Option<ResourceId>,
    /// Pre-computed reservation from an earlier pass.
    pub reservation: Option<ResourceId>,
    pub setup_span: Ticks,
    /// Run ticks per unit of quantity.
    pub run_per_unit: Ticks,
    pub post_process_span: Ticks,
    /// Span the output remains on the resource waiting for storage.
    pub storage_span: Ticks,
}

impl ResourceRequirement {
    /// The single resource this requirement is pinned to, if any.
    pub fn pinned(&self) -> Option<ResourceId> {
        self.locked.or(self.reservation)
    }
}

// ---------------------------------------------------------------------------
// Material requirements and products
// ---------------------------------------------------------------------------

/// Constraint type for a material requirement.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MaterialConstraint {
    /// Supply counts from its projected available date.
    AvailableDate,
    /// Supply counts `lead` ticks after its projected available date.
    LeadTime { lead: Ticks },
    /// The requirement is not checked while the clock is inside the frozen
    /// span.
    IgnoredInFrozenSpan { frozen_until: Ticks },
}

/// Demand for an item at a warehouse, per unit of activity quantity.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MaterialRequirement {
    pub item: ItemId,
    pub warehouse: WarehouseId,
    pub qty_per_unit: Qty,
    pub constraint: MaterialConstraint,
}

/// When a product's output becomes available supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProductTiming {
    AtRunStart,
    AtRunEnd,
    AtPostProcessEnd,
    AtStorageEnd,
    /// Output appears in equal slices every `cycle` ticks across the run.
    PerCycle { cycle: Ticks },
}

/// An item produced by an operation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Product {
    pub item: ItemId,
    pub warehouse: WarehouseId,
    pub qty_per_unit: Qty,
    pub timing: ProductTiming,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// One routing step of an alternate path.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Operation {
    pub mo: MoId,
    pub path: PathId,
    pub name: String,
    /// Ordered requirements; index 0 is the primary.
    pub requirements: Vec<ResourceRequirement>,
    pub materials: Vec<MaterialRequirement>,
    pub products: Vec<Product>,
    pub batch_code: Option<BatchCode>,
    pub compat_code: Option<CompatCode>,
    /// The operation may not release before this time.
    pub hold_until: Option<Ticks>,
    /// Work arrives from the predecessor over a resource connector.
    pub transfer_by_connector: bool,
}

impl Operation {
    pub fn primary(&self) -> &ResourceRequirement {
        &self.requirements[0]
    }

    pub fn secondaries(&self) -> &[ResourceRequirement] {
        &self.requirements[1..]
    }
}

/// Operation lifecycle. Unreleased -> Released -> Scheduled, with Finished
/// and Omitted as terminal states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OperationPhase {
    #[default]
    Unreleased,
    Released,
    Scheduled,
    Finished,
    Omitted,
}

/// Per-run operation state, reset at run start.
#[derive(Debug, Clone)]
pub struct OperationState {
    pub phase: OperationPhase,
    /// The single latest binding reason this operation has not released.
    pub latest_constraint: Option<LatestConstraint>,
    /// Predecessors whose availability event has fired.
    pub predecessors_ready: Vec<OperationId>,
    pub activities: Vec<ActivityId>,
    pub placed: usize,
    /// End time of the latest placed activity of this operation.
    pub last_end: Ticks,
    /// Run-end time of the latest placed activity (before post-processing).
    pub last_run_end: Ticks,
    /// Run-start time of the earliest placed activity.
    pub first_run_start: Ticks,
}

impl Default for OperationState {
    fn default() -> Self {
        Self {
            phase: OperationPhase::Unreleased,
            latest_constraint: None,
            predecessors_ready: Vec::new(),
            activities: Vec::new(),
            placed: 0,
            last_end: 0,
            last_run_end: 0,
            first_run_start: Ticks::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;

    fn make_req(role: ReqRole) -> ResourceRequirement {
        ResourceRequirement {
            role,
            eligible: Vec::new(),
            locked: None,
            default: None,
            reservation: None,
            setup_span: 0,
            run_per_unit: 1,
            post_process_span: 0,
            storage_span: 0,
        }
    }

    #[test]
    fn primary_is_first_requirement() {
        let op = Operation {
            mo: MoId::default(),
            path: PathId::default(),
            name: "roll".into(),
            requirements: vec![make_req(ReqRole::Primary), make_req(ReqRole::Secondary)],
            materials: Vec::new(),
            products: Vec::new(),
            batch_code: None,
            compat_code: None,
            hold_until: None,
            transfer_by_connector: false,
        };
        assert_eq!(op.primary().role, ReqRole::Primary);
        assert_eq!(op.secondaries().len(), 1);
    }

    #[test]
    fn pinned_prefers_lock_over_reservation() {
        let mut req = make_req(ReqRole::Primary);
        assert!(req.pinned().is_none());

        let mut arena = slotmap::SlotMap::<ResourceId, ()>::with_key();
        let a = arena.insert(());
        let b = arena.insert(());
        req.reservation = Some(b);
        assert_eq!(req.pinned(), Some(b));
        req.locked = Some(a);
        assert_eq!(req.pinned(), Some(a));
    }

    #[test]
    fn operation_phase_defaults_unreleased() {
        assert_eq!(OperationPhase::default(), OperationPhase::Unreleased);
    }

    #[test]
    fn overlap_kinds_compare() {
        assert_eq!(OverlapKind::None, OverlapKind::None);
        assert_ne!(
            OverlapKind::TransferQuantity { qty: qty(1.0) },
            OverlapKind::AtFirstTransfer
        );
    }
}
