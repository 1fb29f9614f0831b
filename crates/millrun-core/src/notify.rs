//! The post-commit notification cascade.
//!
//! After a placement commits, downstream work has to learn about it: the
//! activity leaves every dispatcher, losing paths of the MO are omitted,
//! sequential neighbors on the resource are linked, successors get
//! predecessor-available events per their overlap rule, finished MOs
//! release their successor MOs, and occupied connectors and freed
//! warehouses arm their events.

use tracing::debug;

use crate::dispatch::{DispatchOrder, DispatcherSet};
use crate::error::ValidationError;
use crate::event::SimEvent;
use crate::fixed::Ticks;
use crate::id::{ActivityId, WarehouseId};
use crate::model::PlantModel;
use crate::activity::ScheduledSpan;
use crate::order::OperationPhase;
use crate::queue::EventQueue;
use crate::readiness::{self, PredecessorProgress};

/// Run the full cascade for one committed activity.
pub fn after_commit(
    model: &mut PlantModel,
    queue: &mut EventQueue,
    dispatchers: &mut DispatcherSet,
    activity: ActivityId,
    span: ScheduledSpan,
    freed: &[WarehouseId],
) -> Result<(), ValidationError> {
    let clock = queue.clock();
    let op_id = model.activities[activity].operation;
    let mo_id = model.operations[op_id].mo;

    dispatchers.remove_everywhere(model, activity);
    model.activities[activity].suspended_dispatchers.clear();

    omit_losing_paths(model, dispatchers, activity)?;
    link_neighbors(model, activity, span);

    // Wake the next candidate queued behind this one on the resource.
    if let Some(d) = dispatchers.get(span.resource)
        && let Some(next) = d.best(DispatchOrder::Normal)
    {
        queue.push(
            span.end.max(clock),
            SimEvent::RetryPlacement {
                resource: span.resource,
                activity: next.activity,
            },
        )?;
    }

    // Successor operations, per overlap rule.
    let quantity = model.activities[activity].required_qty;
    let run_per_unit = model.operations[op_id].primary().run_per_unit;
    let progress = PredecessorProgress {
        start: span.start,
        run_start: span.run_start,
        run_end: span.run_end,
        end: span.end,
        quantity,
        run_per_unit,
    };
    for assoc in model.successors_of(op_id) {
        let at = readiness::overlap_release_time(assoc.overlap, progress).max(clock);
        queue.push(
            at,
            SimEvent::PredecessorAvailable {
                op: assoc.successor,
                predecessor: op_id,
            },
        )?;
    }

    // MO completion propagates to successor MOs.
    model.mo_states[mo_id].last_end = model.mo_states[mo_id].last_end.max(span.end);
    if model.operation_states[op_id].phase == OperationPhase::Scheduled {
        model.mo_states[mo_id].scheduled_ops += 1;
        if mo_fully_scheduled(model, mo_id) {
            let at = model.mo_states[mo_id].last_end.max(clock);
            for succ in model.mos[mo_id].successors.clone() {
                debug!(?mo_id, ?succ, at, "mo complete, releasing successor");
                queue.push(at, SimEvent::ReleaseMo { mo: succ })?;
            }
        }
    }

    // Connector occupancy ends at arrival.
    if let Some(connector) = model.activities[activity].arrived_via {
        let free_at = model.connector_states[connector].free_at.max(clock);
        queue.push(free_at, SimEvent::ConnectorFreed { connector })?;
    }

    // Warehouses whose fill dropped wake storage waiters.
    for &warehouse in freed {
        queue.push(clock, SimEvent::StorageFreed { warehouse })?;
    }

    // Product output wakes material waiters at its availability time.
    let outputs: Vec<(crate::id::ItemId, Ticks)> = model
        .supplies
        .values()
        .filter(|n| {
            n.source == crate::material::SupplySource::ActivityOutput
                && model.supply_watch.contains_key(&n.item)
                && n.available_at >= clock
        })
        .map(|n| (n.item, n.available_at))
        .collect();
    for (item, at) in outputs {
        queue.push(at, SimEvent::MaterialAvailable { item })?;
    }

    Ok(())
}

/// Enforce at-most-one-path: on the MO's first commit, omit every operation
/// of every other path and remove their activities from dispatching.
fn omit_losing_paths(
    model: &mut PlantModel,
    dispatchers: &mut DispatcherSet,
    activity: ActivityId,
) -> Result<(), ValidationError> {
    let op_id = model.activities[activity].operation;
    let mo_id = model.operations[op_id].mo;
    let Some(winner) = model.mo_states[mo_id].committed_path else {
        return Err(ValidationError::UnknownEntity {
            what: "committed path",
        });
    };

    let losing: Vec<crate::id::PathId> = model.mos[mo_id]
        .paths
        .iter()
        .copied()
        .filter(|&p| p != winner)
        .collect();
    for path in losing {
        for op in model.paths[path].operations.clone() {
            let state = &model.operation_states[op];
            if state.phase == OperationPhase::Omitted {
                continue;
            }
            for act in model.operation_states[op].activities.clone() {
                dispatchers.remove_everywhere(model, act);
            }
            model.operation_states[op].phase = OperationPhase::Omitted;
        }
    }
    Ok(())
}

/// Link this activity to its committed neighbors on every resource one of
/// its requirements resolved to: the batch ending latest at or before our
/// start on the left, the one starting earliest at or after our end on the
/// right. Secondary blocks share the primary batch id, so a single batch
/// marks our own work on each resource.
fn link_neighbors(model: &mut PlantModel, activity: ActivityId, span: ScheduledSpan) {
    let own_batch = model.activities[activity].batches[0];
    let n_reqs = model.activities[activity].resources.len();

    for idx in 0..n_reqs {
        let Some(resource) = model.activities[activity].resources[idx] else {
            continue;
        };
        let state = &model.resource_states[resource];
        let mut left = None;
        let mut right = None;
        for block in &state.blocks {
            if block.batch == own_batch || block.batch.is_none() {
                continue;
            }
            if block.end <= span.start {
                left = block.batch;
            } else if block.start >= span.end && right.is_none() {
                right = block.batch;
            }
        }

        let act = &mut model.activities[activity];
        act.left[idx] = left;
        act.right[idx] = right;
    }
}

/// True when every operation of the MO's committed path is terminal.
pub fn mo_fully_scheduled(model: &PlantModel, mo: crate::id::MoId) -> bool {
    let Some(path) = model.mo_states[mo].committed_path else {
        return false;
    };
    model.paths[path].operations.iter().all(|&op| {
        matches!(
            model.operation_states[op].phase,
            OperationPhase::Scheduled | OperationPhase::Finished | OperationPhase::Omitted
        )
    })
}

// ===========================================================================
// Tests
// ===========================================================================
