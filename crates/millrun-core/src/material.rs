//! Material availability resolution.
//!
//! Supply profiles are time-ordered sets of quantity nodes (on-hand,
//! incoming, or activity output). Each node is consumed at most once per
//! unit allocated. Consumption is transactional: allocations are staged on
//! the nodes during a placement attempt and only committed after the entire
//! placement has separately succeeded; any later failure in the same
//! attempt rolls the staging back exactly.

use crate::fixed::{Qty, Ticks};
use crate::id::{ItemId, OperationId, SupplyNodeId, WarehouseId};
use crate::model::PlantModel;
use crate::order::MaterialConstraint;

// ---------------------------------------------------------------------------
// Supply nodes
// ---------------------------------------------------------------------------

/// Where a projected supply node comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SupplySource {
    OnHand,
    Incoming,
    /// Output of an activity placed earlier in this run.
    ActivityOutput,
}

/// One projected quantity of an item at a warehouse.
#[derive(Debug, Clone)]
pub struct SupplyNode {
    pub item: ItemId,
    pub warehouse: WarehouseId,
    pub source: SupplySource,
    pub available_at: Ticks,
    pub qty: Qty,
    /// Committed consumption.
    pub consumed: Qty,
    /// Staged consumption of in-flight placement attempts.
    pub staged: Qty,
}

impl SupplyNode {
    /// Quantity still available to allocate.
    pub fn free(&self) -> Qty {
        self.qty - self.consumed - self.staged
    }
}

// ---------------------------------------------------------------------------
// Allocation results
// ---------------------------------------------------------------------------

/// One staged draw against a supply node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub node: SupplyNodeId,
    pub qty: Qty,
}

/// Outcome of resolving one operation's material requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterialOutcome {
    /// Every requirement is staged on the attempt ledger.
    Satisfied,
    /// The first blocking item, and the earliest time projected supply
    /// could cover the shortfall (None when no projected supply ever will).
    Short {
        blocking: ItemId,
        retry_at: Option<Ticks>,
    },
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Staged allocations of a single placement attempt.
///
/// Exactly one of [`commit`](MaterialLedger::commit) or
/// [`rollback`](MaterialLedger::rollback) must be called before the attempt
/// returns; there is no partial-commit state.
#[derive(Debug, Default)]
pub struct MaterialLedger {
    staged: Vec<Allocation>,
}

impl MaterialLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.staged
    }

    fn stage(&mut self, model: &mut PlantModel, node: SupplyNodeId, qty: Qty) {
        model.supplies[node].staged += qty;
        self.staged.push(Allocation { node, qty });
    }

    /// Undo every staged allocation, restoring free quantities exactly.
    pub fn rollback(&mut self, model: &mut PlantModel) {
        for alloc in self.staged.drain(..) {
            model.supplies[alloc.node].staged -= alloc.qty;
        }
    }

    /// Turn staged allocations into committed consumption. Returns the
    /// warehouses whose stored quantity shrank, so the caller can wake
    /// activities waiting on storage space.
    pub fn commit(&mut self, model: &mut PlantModel) -> Vec<WarehouseId> {
        let mut freed = Vec::new();
        for alloc in self.staged.drain(..) {
            let node = &mut model.supplies[alloc.node];
            node.staged -= alloc.qty;
            node.consumed += alloc.qty;
            let warehouse = node.warehouse;
            if let Some(w) = model.warehouses.get_mut(&warehouse) {
                w.stored -= alloc.qty;
                if !freed.contains(&warehouse) {
                    freed.push(warehouse);
                }
            }
        }
        freed
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Effective availability time of a node under a requirement constraint.
fn effective_at(node: &SupplyNode, constraint: &MaterialConstraint) -> Ticks {
    match constraint {
        MaterialConstraint::AvailableDate => node.available_at,
        MaterialConstraint::LeadTime { lead } => node.available_at.saturating_add(*lead),
        MaterialConstraint::IgnoredInFrozenSpan { .. } => node.available_at,
    }
}

/// Resolve every material requirement of `op` for `quantity` units at the
/// given clock, staging successful draws on `ledger`.
///
/// On a shortfall the requirement's partial staging is undone before
/// returning, so the ledger only ever carries fully-covered requirements;
/// the caller still owns rollback of earlier requirements.
pub fn resolve(
    model: &mut PlantModel,
    ledger: &mut MaterialLedger,
    op: OperationId,
    quantity: Qty,
    clock: Ticks,
) -> MaterialOutcome {
    let requirements = model.operations[op].materials.clone();

    for req in &requirements {
        if let MaterialConstraint::IgnoredInFrozenSpan { frozen_until } = req.constraint
            && clock <= frozen_until
        {
            continue;
        }

        let need = req.qty_per_unit * quantity;
        if need <= Qty::from_num(0) {
            continue;
        }

        let profile = model
            .profiles
            .get(&(req.item, req.warehouse))
            .cloned()
            .unwrap_or_default();

        let mut remaining = need;
        let mut local = MaterialLedger::new();
        for node_id in &profile {
            let (free, at) = {
                let node = &model.supplies[*node_id];
                (node.free(), effective_at(node, &req.constraint))
            };
            if at > clock || free <= Qty::from_num(0) {
                continue;
            }
            let take = free.min(remaining);
            local.stage(model, *node_id, take);
            remaining -= take;
            if remaining <= Qty::from_num(0) {
                break;
            }
        }

        if remaining > Qty::from_num(0) {
            // Shortfall: undo this requirement's partial staging, then
            // project when future supply covers the full need.
            local.rollback(model);
            let retry_at = projected_cover_time(model, &profile, &req.constraint, need, clock);
            return MaterialOutcome::Short {
                blocking: req.item,
                retry_at,
            };
        }
        ledger.staged.append(&mut local.staged);
    }

    MaterialOutcome::Satisfied
}

/// Earliest time at which cumulative free supply reaches `need`, or None
/// when projected supply never covers it.
fn projected_cover_time(
    model: &PlantModel,
    profile: &[SupplyNodeId],
    constraint: &MaterialConstraint,
    need: Qty,
    clock: Ticks,
) -> Option<Ticks> {
    // Profiles are sorted by available time; lead-time offsets preserve
    // that order because the offset is constant per requirement.
    let mut cumulative = Qty::from_num(0);
    for node_id in profile {
        let node = &model.supplies[*node_id];
        let free = node.free();
        if free <= Qty::from_num(0) {
            continue;
        }
        cumulative += free;
        if cumulative >= need {
            return Some(effective_at(node, constraint).max(clock));
        }
    }
    None
}

// ===========================================================================
// Tests
// ===========================================================================
