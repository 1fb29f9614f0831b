//! The placement engine: committing one activity onto one primary resource.
//!
//! A placement attempt runs a fixed sequence of checks — customization
//! hooks, compatibility, connectors, auto-split, primary capacity, cleanout,
//! transfer validation, secondary resources, material, product storage —
//! and either commits everything atomically or returns a typed failure.
//! Nothing is mutated on failure: material staging is rolled back and
//! exclusivity reservations are cleared before control returns.

use tracing::{debug, trace};

use crate::autosplit::{self, SplitDecision, SplitTrigger, SplitUndo};
use crate::batch::{BatchManager, JoinRefusal};
use crate::dispatch::DispatcherSet;
use crate::fixed::{Qty, Ticks, span_for};
use crate::hooks::{CustomizationHook, HookVerdict};
use crate::id::{ActivityId, BatchId, ConnectorId, ItemId, ResourceId, WarehouseId};
use crate::material::{self, MaterialLedger, MaterialOutcome, SupplyNode, SupplySource};
use crate::model::PlantModel;
use crate::order::{OperationPhase, OverlapKind, Product, ProductTiming, ReqRole, ResourceRequirement};
use crate::policy::SchedulingPolicy;
use crate::readiness::{PredecessorProgress, overlap_release_time};
use crate::resource::{Block, BlockKind, CapacityKind, WindowSearch};
use crate::activity::{ProductionStatus, ScheduledSpan};

// ---------------------------------------------------------------------------
// Outcome taxonomy
// ---------------------------------------------------------------------------

/// Result of one placement attempt. Every failure is an expected scheduling
/// outcome with its own retry policy, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// Committed. `remainder` is the sibling created by an auto-split, if
    /// any; it re-enters dispatching as fresh work. `freed` lists the
    /// warehouses whose fill dropped when material committed, so waiting
    /// work can be woken.
    Placed {
        batch: BatchId,
        span: ScheduledSpan,
        remainder: Option<ActivityId>,
        freed: Vec<WarehouseId>,
    },
    /// No window of the needed duration. `retry_at` is present when a
    /// committed block end gives a concrete next candidate time.
    NoCapacity { retry_at: Option<Ticks> },
    /// Another placement attempt holds the resource right now.
    Occupied { retry_at: Ticks },
    /// A multi-tasking resource has no attention left in the window.
    AttentionUnavailable { retry_at: Ticks },
    /// The window intersects a span reserved for an in-flight move.
    ReservedMoveWindow { retry_at: Ticks },
    /// The resource's compatibility group excludes this operation.
    CompatibilityViolation,
    /// The slot's open batch refused the candidate.
    BatchRefused(JoinRefusal),
    /// Material shortfall; `retry_at` is the projected cover time when the
    /// profile can compute one, otherwise the caller watches the item.
    MaterialUnavailable {
        blocking: ItemId,
        retry_at: Option<Ticks>,
    },
    /// A product found no warehouse room.
    StorageUnavailable { warehouse: WarehouseId },
    /// A customization hook vetoed the placement.
    CustomizationRejected { retry_at: Option<Ticks> },
    /// Soft failure: a required clean-before span does not fit. The caller
    /// may let a lower-scoring candidate place this round and retry this
    /// one next round.
    CleanoutBlocking { retry_at: Ticks },
    /// No connector reaches this resource in time. `retry_at` is the
    /// earliest time any connector frees; `None` means no connector exists
    /// at all.
    ConnectorUnavailable { retry_at: Option<Ticks> },
    /// Placing here would break an overlap promise already made to a
    /// scheduled successor.
    TransferViolation { retry_at: Ticks },
    /// The run was cancelled mid-placement; all reservations are released.
    Cancelled,
}

/// Per-attempt inputs threaded from the run context.
pub struct PlacementContext<'a> {
    pub policy: &'a SchedulingPolicy,
    pub clock: Ticks,
    /// True when this attempt is part of an explicit move.
    pub moving: bool,
    /// Set by the driver to abort mid-run (e.g. the committed-block limit).
    pub cancelled: bool,
    /// Committed-placement counter; commit assigns and increments.
    pub next_ordinal: u64,
}

// ---------------------------------------------------------------------------
// Attempt
// ---------------------------------------------------------------------------

/// Try to place `activity` on `resource` at or after the clock.
///
/// Exclusivity reservations taken during the attempt are released on every
/// path out; an auto-split performed during the attempt is rejoined unless
/// the placement commits.
pub fn attempt_place(
    model: &mut PlantModel,
    batches: &mut BatchManager,
    dispatchers: &mut DispatcherSet,
    hook: &mut dyn CustomizationHook,
    ctx: &mut PlacementContext,
    resource: ResourceId,
    activity: ActivityId,
) -> PlacementOutcome {
    if ctx.cancelled {
        return PlacementOutcome::Cancelled;
    }

    // Exclusivity: one attempt at a time may work a resource.
    if let Some(holder) = model.resource_states[resource].reserved_for
        && holder != activity
    {
        return PlacementOutcome::Occupied {
            retry_at: ctx.clock + 1,
        };
    }
    model.resource_states[resource].reserved_for = Some(activity);

    let mut reserved = vec![resource];
    let mut undo: Option<SplitUndo> = None;
    let outcome = place_inner(
        model,
        batches,
        hook,
        ctx,
        resource,
        activity,
        &mut reserved,
        &mut undo,
    );

    for r in reserved {
        model.resource_states[r].reserved_for = None;
    }
    if !matches!(outcome, PlacementOutcome::Placed { .. })
        && let Some(mut u) = undo
    {
        autosplit::rejoin(model, dispatchers, &mut u);
    }
    outcome
}

#[allow(clippy::too_many_arguments)]
fn place_inner(
    model: &mut PlantModel,
    batches: &mut BatchManager,
    hook: &mut dyn CustomizationHook,
    ctx: &mut PlacementContext,
    resource: ResourceId,
    activity: ActivityId,
    reserved: &mut Vec<ResourceId>,
    undo: &mut Option<SplitUndo>,
) -> PlacementOutcome {
    // 1. Customization gates.
    match hook.is_schedulable(model, activity) {
        HookVerdict::Allow => {}
        HookVerdict::Defer(t) => {
            return PlacementOutcome::CustomizationRejected {
                retry_at: Some(t.max(ctx.clock + 1)),
            };
        }
        HookVerdict::Reject => {
            return PlacementOutcome::CustomizationRejected { retry_at: None };
        }
    }
    match hook.can_schedule_on_resource(model, activity, resource) {
        HookVerdict::Allow => {}
        HookVerdict::Defer(t) => {
            return PlacementOutcome::CustomizationRejected {
                retry_at: Some(t.max(ctx.clock + 1)),
            };
        }
        HookVerdict::Reject => {
            return PlacementOutcome::CustomizationRejected { retry_at: None };
        }
    }

    let res = model.resources[resource].clone();
    let op_id = model.activities[activity].operation;
    let op = model.operations[op_id].clone();

    // 2. Compatibility group.
    if !res.accepts(op.compat_code) {
        return PlacementOutcome::CompatibilityViolation;
    }

    // 3. Release time and connector arrival.
    let mut earliest = ctx.clock.max(model.activities[activity].release_time);
    earliest = hook
        .adjust_activity_release(model, activity, earliest)
        .max(earliest);

    let mut arrival_connector: Option<(ConnectorId, Ticks)> = None;
    if op.transfer_by_connector
        && let Some(from_resource) = predecessor_resource(model, op_id)
        && from_resource != resource
    {
        match connector_arrival(model, from_resource, resource, earliest) {
            ConnectorSearch::Reaches { connector, arrival } => {
                earliest = earliest.max(arrival);
                arrival_connector = Some((connector, arrival));
            }
            ConnectorSearch::AllBusy { next_free } => {
                return PlacementOutcome::ConnectorUnavailable {
                    retry_at: Some(next_free.max(ctx.clock + 1)),
                };
            }
            ConnectorSearch::NoRoute => {
                return PlacementOutcome::ConnectorUnavailable { retry_at: None };
            }
        }
    }

    // 4. Joining an open batch short-circuits capacity work: members share
    // the slot's blocks, so only the limit/shape checks apply.
    if let Some((slot, _)) = batches.joinable_slot(model, resource, activity, earliest) {
        return commit_join(model, batches, hook, ctx, resource, activity, slot);
    }

    // 5. Auto-split. Several limits can cap the placeable quantity at
    // once; the tightest one is the trigger, so a single split (and a
    // single undo) covers the attempt.
    let mut required = model.activities[activity].required_qty;
    let primary = op.primary().clone();

    let mut cap = Qty::MAX;
    let mut trigger: Option<SplitTrigger> = None;
    let mut transfer_full_at: Option<Ticks> = None;
    if let Some(max) = res.max_qty {
        cap = max;
        trigger = Some(SplitTrigger::QuantityCap { max });
    }
    // A successor must not outrun its predecessors: cap at what will have
    // transferred by the soonest time this run could end.
    let soonest_end = earliest + span_for(required, primary.run_per_unit);
    if let Some((available, full_at)) = predecessor_transferred(model, op_id, soonest_end)
        && available < cap
    {
        cap = available;
        trigger = Some(SplitTrigger::PredecessorRatio { available });
        transfer_full_at = Some(full_at);
    }
    if let Some(rule) = res.cleanout {
        // Even a fresh resource cannot run past the cleanout boundary.
        let fits = autosplit::qty_fitting(rule.max_run, primary.run_per_unit);
        if fits < cap {
            cap = fits;
            trigger = Some(SplitTrigger::Cleanout {
                run_left: rule.max_run,
                clean_span: rule.clean_span,
            });
        }
    }
    if let Some(trigger) = trigger
        && required > cap
    {
        match autosplit::evaluate(model, ctx.policy, activity, resource, trigger) {
            SplitDecision::Split {
                keep, clean_after, ..
            } => {
                let keep = hook.split(model, activity, keep).unwrap_or(keep);
                *undo = Some(autosplit::perform(model, activity, keep, clean_after));
                required = keep;
            }
            SplitDecision::NotNeeded => {}
            SplitDecision::Disabled | SplitDecision::Infeasible => {
                // Transferred quantity grows on its own; everything else
                // waits for the caller's usual backoff.
                let retry_at = transfer_full_at.map(|t| t.max(ctx.clock + 1));
                return PlacementOutcome::NoCapacity { retry_at };
            }
        }
    }

    let mut run = span_for(required, primary.run_per_unit);

    // 6. Primary capacity window. When no stretch holds the full run, one
    // window-fit split may shrink it before the attempt gives up.
    let (start, clean_before, body, clean_after) = loop {
        let clean_after = model.activities[activity].clean_after.unwrap_or(0);
        let mut clean_before: Ticks = 0;
        if let Some(rule) = res.cleanout {
            let since = model.resource_states[resource].run_since_clean;
            if since > 0 && since + run > rule.max_run {
                // A cleanout first resets the accumulator.
                clean_before = rule.clean_span;
            }
        }
        let body = primary.setup_span + run + primary.post_process_span + primary.storage_span;
        let total = clean_before + body + clean_after;

        match model.resource_states[resource].earliest_window(&res, earliest, total) {
            WindowSearch::Found { start } => break (start, clean_before, body, clean_after),
            WindowSearch::Busy { retry_at } => {
                if undo.is_none()
                    && ctx.policy.auto_split
                    && let Some((_, widest)) =
                        model.resource_states[resource].widest_window(&res, earliest)
                    && widest > total - run
                    && let SplitDecision::Split {
                        keep,
                        clean_after: truncated_clean,
                        ..
                    } = autosplit::evaluate(
                        model,
                        ctx.policy,
                        activity,
                        resource,
                        SplitTrigger::CapacityWindow {
                            available: widest - (total - run),
                        },
                    )
                {
                    let keep = hook.split(model, activity, keep).unwrap_or(keep);
                    *undo = Some(autosplit::perform(model, activity, keep, truncated_clean));
                    required = keep;
                    run = span_for(required, primary.run_per_unit);
                    continue;
                }
                let retry_at =
                    ctx.policy
                        .corrected_retry(retry_at, primary.setup_span, ctx.clock);
                // A clean-before that does not fit is soft: without it the
                // window may exist, and a lower-scoring candidate may still
                // place this round.
                if clean_before > 0
                    && matches!(
                        model.resource_states[resource].earliest_window(
                            &res,
                            earliest,
                            body + clean_after
                        ),
                        WindowSearch::Found { .. }
                    )
                {
                    return PlacementOutcome::CleanoutBlocking { retry_at };
                }
                return match res.capacity {
                    CapacityKind::MultiTasking { .. } => {
                        PlacementOutcome::AttentionUnavailable { retry_at }
                    }
                    _ => PlacementOutcome::NoCapacity {
                        retry_at: Some(retry_at),
                    },
                };
            }
            WindowSearch::NoWindow => {
                return PlacementOutcome::NoCapacity { retry_at: None };
            }
        }
    };
    let total = clean_before + body + clean_after;

    // 7. Move-window reservation.
    if let Some((ws, we)) = model.resource_states[resource].move_window
        && start < we
        && start + total > ws
        && !(ctx.moving && model.activities[activity].moved)
    {
        return PlacementOutcome::ReservedMoveWindow { retry_at: we };
    }

    let span = ScheduledSpan {
        resource,
        start,
        run_start: start + clean_before + primary.setup_span,
        run_end: start + clean_before + primary.setup_span + run,
        post_end: start + clean_before + primary.setup_span + run + primary.post_process_span,
        end: start + body + clean_before,
    };

    // 8. Batch slot pre-check at the chosen start.
    let allow_new =
        ctx.policy.allow_new_batch || batches.were_together(resource, span.start, op_id);
    if let Err(refusal) = batches.can_place(model, resource, activity, span.start, allow_new) {
        return PlacementOutcome::BatchRefused(refusal);
    }

    // 9. Overlap promises already made to scheduled successors.
    if let Some(retry_at) = transfer_violation(model, op_id, required, &primary, span) {
        return PlacementOutcome::TransferViolation {
            retry_at: retry_at.max(ctx.clock + 1),
        };
    }

    // 10. Secondary resource requirements, unified retry on failure.
    let mut secondary_plan: Vec<(usize, ResourceId)> = Vec::new();
    let mut worst_retry: Option<Ticks> = None;
    for (idx, req) in op.requirements.iter().enumerate() {
        if req.role == ReqRole::Primary {
            continue;
        }
        match resolve_secondary(model, req, op.compat_code, activity, span.start, span.end) {
            SecondaryOutcome::Resolved { resource: sec } => {
                model.resource_states[sec].reserved_for = Some(activity);
                reserved.push(sec);
                secondary_plan.push((idx, sec));
            }
            SecondaryOutcome::Unavailable { retry_at } => {
                worst_retry = Some(worst_retry.map_or(retry_at, |w| w.max(retry_at)));
            }
            SecondaryOutcome::Incompatible => {
                return PlacementOutcome::CompatibilityViolation;
            }
        }
    }
    if let Some(retry_at) = worst_retry {
        return PlacementOutcome::NoCapacity {
            retry_at: Some(ctx.policy.corrected_retry(
                retry_at,
                primary.setup_span,
                ctx.clock,
            )),
        };
    }

    // 11. Material, transactionally staged.
    let mut ledger = MaterialLedger::new();
    match material::resolve(model, &mut ledger, op_id, required, ctx.clock) {
        MaterialOutcome::Satisfied => {}
        MaterialOutcome::Short { blocking, retry_at } => {
            ledger.rollback(model);
            return PlacementOutcome::MaterialUnavailable { blocking, retry_at };
        }
    }

    // 12. Product storage must have room before anything commits.
    for product in &op.products {
        let out_qty = product.qty_per_unit * required;
        if let Some(w) = model.warehouses.get(&product.warehouse)
            && let Some(cap) = w.capacity
            && w.stored + out_qty > cap
        {
            ledger.rollback(model);
            return PlacementOutcome::StorageUnavailable {
                warehouse: product.warehouse,
            };
        }
    }

    if ctx.cancelled {
        ledger.rollback(model);
        return PlacementOutcome::Cancelled;
    }

    // 13. Commit.
    commit(
        model,
        batches,
        hook,
        ctx,
        resource,
        activity,
        span,
        clean_before,
        clean_after,
        run,
        &secondary_plan,
        ledger,
        arrival_connector,
        undo,
    )
}

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

enum ConnectorSearch {
    Reaches { connector: ConnectorId, arrival: Ticks },
    AllBusy { next_free: Ticks },
    NoRoute,
}

/// Earliest arrival over any connector from `from` to `to`, departing no
/// earlier than `ready`.
fn connector_arrival(
    model: &PlantModel,
    from: ResourceId,
    to: ResourceId,
    ready: Ticks,
) -> ConnectorSearch {
    let routes = model.connectors_between(from, to);
    if routes.is_empty() {
        return ConnectorSearch::NoRoute;
    }
    let mut best: Option<(Ticks, ConnectorId)> = None;
    let mut next_free = Ticks::MAX;
    for id in routes {
        let conn = &model.connectors[id];
        let state = &model.connector_states[id];
        if state.is_free(conn, ready) {
            let arrival = ready + conn.transit;
            if best.is_none_or(|(t, b)| (arrival, id) < (t, b)) {
                best = Some((arrival, id));
            }
        } else {
            let departs = state.free_at.max(ready);
            next_free = next_free.min(departs + conn.transit);
        }
    }
    match best {
        Some((arrival, connector)) => ConnectorSearch::Reaches { connector, arrival },
        None => ConnectorSearch::AllBusy { next_free },
    }
}

/// Quantity the overlap-typed predecessors of `op` will have produced by
/// `at`, net of what this operation's placed activities already drew, plus
/// the time every predecessor run finishes. `None` when no predecessor run
/// is still in flight at `at`.
fn predecessor_transferred(
    model: &PlantModel,
    op: crate::id::OperationId,
    at: Ticks,
) -> Option<(Qty, Ticks)> {
    let mut limiting: Option<Qty> = None;
    let mut full_at: Ticks = 0;
    for assoc in model.predecessors_of(op) {
        if matches!(assoc.overlap, OverlapKind::None) {
            continue;
        }
        let per_unit = model.operations[assoc.predecessor].primary().run_per_unit;
        let mut produced = Qty::ZERO;
        let mut in_flight = false;
        for &act in &model.operation_states[assoc.predecessor].activities {
            let Some(span) = model.activities[act].scheduled else {
                in_flight = true;
                continue;
            };
            full_at = full_at.max(span.run_end);
            if at >= span.run_end || per_unit == 0 {
                produced += model.activities[act].required_qty;
            } else {
                in_flight = true;
                if at > span.run_start {
                    // Split off whole units first so the fixed-point
                    // conversion stays within range.
                    let elapsed = at - span.run_start;
                    produced += Qty::from_num(elapsed / per_unit)
                        + Qty::from_num(elapsed % per_unit) / Qty::from_num(per_unit);
                }
            }
        }
        if in_flight && limiting.is_none_or(|l| produced < l) {
            limiting = Some(produced);
        }
    }
    let limit = limiting?;
    let drawn: Qty = model.operation_states[op]
        .activities
        .iter()
        .filter(|&&a| model.activities[a].is_placed())
        .map(|&a| model.activities[a].required_qty)
        .sum();
    Some(((limit - drawn).max(Qty::ZERO), full_at))
}

/// The resource the most recently placed predecessor activity ran on.
fn predecessor_resource(model: &PlantModel, op: crate::id::OperationId) -> Option<ResourceId> {
    let mut latest: Option<(Ticks, ResourceId)> = None;
    for assoc in model.predecessors_of(op) {
        for &act in &model.operation_states[assoc.predecessor].activities {
            if let Some(span) = model.activities[act].scheduled
                && latest.is_none_or(|(t, _)| span.end > t)
            {
                latest = Some((span.end, span.resource));
            }
        }
    }
    latest.map(|(_, r)| r)
}

// ---------------------------------------------------------------------------
// Transfer validation
// ---------------------------------------------------------------------------

/// If a successor already scheduled its start on the strength of an overlap
/// promise, placing the predecessor such that the promise breaks is refused
/// with a retry past this candidate window.
fn transfer_violation(
    model: &PlantModel,
    op: crate::id::OperationId,
    quantity: Qty,
    primary: &ResourceRequirement,
    span: ScheduledSpan,
) -> Option<Ticks> {
    for assoc in model.successors_of(op) {
        let succ_state = &model.operation_states[assoc.successor];
        if succ_state.phase != OperationPhase::Scheduled {
            continue;
        }
        let progress = PredecessorProgress {
            start: span.start,
            run_start: span.run_start,
            run_end: span.run_end,
            end: span.end,
            quantity,
            run_per_unit: primary.run_per_unit,
        };
        if overlap_release_time(assoc.overlap, progress) > succ_state.first_run_start {
            return Some(span.end);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Secondary resolution
// ---------------------------------------------------------------------------

enum SecondaryOutcome {
    Resolved { resource: ResourceId },
    Unavailable { retry_at: Ticks },
    Incompatible,
}

/// Resolve one secondary requirement to a concrete resource available for
/// the whole `[start, end)` window. Candidate order: locked, reservation,
/// default, then eligible set in id order.
fn resolve_secondary(
    model: &PlantModel,
    req: &ResourceRequirement,
    compat: Option<crate::id::CompatCode>,
    activity: ActivityId,
    start: Ticks,
    end: Ticks,
) -> SecondaryOutcome {
    let candidates: Vec<ResourceId> = match req.pinned() {
        Some(r) => vec![r],
        None => {
            let mut c = Vec::new();
            if let Some(d) = req.default {
                c.push(d);
            }
            let mut rest: Vec<ResourceId> = req
                .eligible
                .iter()
                .copied()
                .filter(|r| !c.contains(r))
                .collect();
            rest.sort();
            c.extend(rest);
            c
        }
    };
    if candidates.is_empty() {
        return SecondaryOutcome::Incompatible;
    }

    let mut compatible_seen = false;
    let mut best_retry: Option<Ticks> = None;
    for id in candidates {
        let res = &model.resources[id];
        if !res.accepts(compat) {
            continue;
        }
        compatible_seen = true;
        let state = &model.resource_states[id];
        if state.reserved_for.is_some_and(|h| h != activity) {
            best_retry = Some(best_retry.map_or(end, |b| b.min(end)));
            continue;
        }
        if !res.is_online_span(start, end) {
            continue;
        }
        let limit = match res.capacity {
            CapacityKind::SingleTasking => 1,
            CapacityKind::MultiTasking { attention } => attention.max(1),
            CapacityKind::Infinite => return SecondaryOutcome::Resolved { resource: id },
        };
        if state.overlap_count(start, end) < limit {
            return SecondaryOutcome::Resolved { resource: id };
        }
        // Earliest end of a conflicting block is the next chance.
        let retry = state
            .blocks
            .iter()
            .filter(|b| b.overlaps(start, end))
            .map(|b| b.end)
            .min()
            .unwrap_or(end);
        best_retry = Some(best_retry.map_or(retry, |b| b.min(retry)));
    }

    if !compatible_seen {
        return SecondaryOutcome::Incompatible;
    }
    SecondaryOutcome::Unavailable {
        retry_at: best_retry.unwrap_or(end),
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Join an open batch: the candidate adopts the anchor's span and shares
/// its blocks; only material, storage, and the batch limit gate the join.
fn commit_join(
    model: &mut PlantModel,
    batches: &mut BatchManager,
    hook: &mut dyn CustomizationHook,
    ctx: &mut PlacementContext,
    resource: ResourceId,
    activity: ActivityId,
    slot: Ticks,
) -> PlacementOutcome {
    let op_id = model.activities[activity].operation;
    let required = model.activities[activity].required_qty;

    let anchor_span = batches
        .batch_at(resource, slot)
        .and_then(|b| model.batches[b].activities.first().copied())
        .and_then(|a| model.activities[a].scheduled);
    let Some(span) = anchor_span else {
        // Slot bookkeeping without a placed anchor is an engine bug;
        // fall back to a normal placement next round.
        debug_assert!(false, "open batch slot without a placed anchor");
        tracing::warn!(?resource, slot, "open batch slot without a placed anchor");
        return PlacementOutcome::NoCapacity {
            retry_at: Some(ctx.clock + 1),
        };
    };

    let mut ledger = MaterialLedger::new();
    match material::resolve(model, &mut ledger, op_id, required, ctx.clock) {
        MaterialOutcome::Satisfied => {}
        MaterialOutcome::Short { blocking, retry_at } => {
            ledger.rollback(model);
            return PlacementOutcome::MaterialUnavailable { blocking, retry_at };
        }
    }

    let products = model.operations[op_id].products.clone();
    for product in &products {
        let out_qty = product.qty_per_unit * required;
        if let Some(w) = model.warehouses.get(&product.warehouse)
            && let Some(cap) = w.capacity
            && w.stored + out_qty > cap
        {
            ledger.rollback(model);
            return PlacementOutcome::StorageUnavailable {
                warehouse: product.warehouse,
            };
        }
    }

    match batches.place(model, resource, activity, slot, false) {
        crate::batch::JoinOutcome::Joined(batch) => {
            let freed = ledger.commit(model);
            model.activities[activity].resources[0] = Some(resource);
            store_products(model, &products, required, span);
            finish_activity(model, hook, ctx, activity, span);
            debug!(?activity, ?batch, "joined batch at commit");
            PlacementOutcome::Placed {
                batch,
                span,
                remainder: None,
                freed,
            }
        }
        crate::batch::JoinOutcome::Created(_) | crate::batch::JoinOutcome::Refused(_) => {
            // joinable_slot said yes moments ago; nothing ran in between.
            ledger.rollback(model);
            PlacementOutcome::BatchRefused(JoinRefusal::CapacityExceeded)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn commit(
    model: &mut PlantModel,
    batches: &mut BatchManager,
    hook: &mut dyn CustomizationHook,
    ctx: &mut PlacementContext,
    resource: ResourceId,
    activity: ActivityId,
    span: ScheduledSpan,
    clean_before: Ticks,
    clean_after: Ticks,
    run: Ticks,
    secondary_plan: &[(usize, ResourceId)],
    mut ledger: MaterialLedger,
    arrival_connector: Option<(ConnectorId, Ticks)>,
    undo: &mut Option<SplitUndo>,
) -> PlacementOutcome {
    let op_id = model.activities[activity].operation;
    let required = model.activities[activity].required_qty;
    let op = model.operations[op_id].clone();
    let primary = op.primary();

    let batch = match batches.place(
        model,
        resource,
        activity,
        span.start,
        ctx.policy.allow_new_batch || batches.were_together(resource, span.start, op_id),
    ) {
        crate::batch::JoinOutcome::Created(b) | crate::batch::JoinOutcome::Joined(b) => b,
        crate::batch::JoinOutcome::Refused(refusal) => {
            ledger.rollback(model);
            return PlacementOutcome::BatchRefused(refusal);
        }
    };

    // Primary blocks.
    let mut cursor = span.start;
    let push = |model: &mut PlantModel, kind: BlockKind, cursor: &mut Ticks, len: Ticks| {
        if len == 0 {
            return;
        }
        model.resource_states[resource].insert_block(Block {
            activity,
            batch: Some(batch),
            kind,
            start: *cursor,
            end: *cursor + len,
        });
        *cursor += len;
    };
    push(model, BlockKind::CleanBefore, &mut cursor, clean_before);
    push(model, BlockKind::Setup, &mut cursor, primary.setup_span);
    push(model, BlockKind::Run, &mut cursor, run);
    push(
        model,
        BlockKind::PostProcess,
        &mut cursor,
        primary.post_process_span,
    );
    push(model, BlockKind::Storage, &mut cursor, primary.storage_span);
    push(model, BlockKind::CleanAfter, &mut cursor, clean_after);

    // Cleanout accounting.
    {
        let state = &mut model.resource_states[resource];
        if clean_before > 0 {
            state.run_since_clean = 0;
        }
        state.run_since_clean += run;
        if clean_after > 0 {
            state.run_since_clean = 0;
        }
    }

    // Secondary blocks cover the full primary window.
    model.activities[activity].resources[0] = Some(resource);
    for &(idx, sec) in secondary_plan {
        model.resource_states[sec].insert_block(Block {
            activity,
            batch: Some(batch),
            kind: BlockKind::Run,
            start: span.start,
            end: span.end,
        });
        model.activities[activity].resources[idx] = Some(sec);
    }

    // Connector occupancy until arrival.
    if let Some((connector, arrival)) = arrival_connector {
        let state = &mut model.connector_states[connector];
        state.in_use += 1;
        state.free_at = state.free_at.max(arrival);
        model.activities[activity].arrived_via = Some(connector);
    }

    let freed = ledger.commit(model);
    store_products(model, &op.products, required, span);
    finish_activity(model, hook, ctx, activity, span);

    let remainder = undo.take().map(|u| u.sibling);
    trace!(?activity, ?resource, start = span.start, end = span.end, "placed");
    PlacementOutcome::Placed {
        batch,
        span,
        remainder,
        freed,
    }
}

/// Register product output as projected supply and warehouse fill.
fn store_products(model: &mut PlantModel, products: &[Product], quantity: Qty, span: ScheduledSpan) {
    for product in products {
        let total = product.qty_per_unit * quantity;
        if total <= Qty::from_num(0) {
            continue;
        }
        if let Some(w) = model.warehouses.get_mut(&product.warehouse) {
            w.stored += total;
        }
        match product.timing {
            ProductTiming::PerCycle { cycle } if cycle > 0 => {
                // One node per completed cycle, output spread evenly.
                let run = span.run_end - span.run_start;
                let n = (run / cycle).max(1);
                let per = total / Qty::from_num(n);
                for i in 1..=n {
                    add_output(
                        model,
                        product,
                        per,
                        (span.run_start + i * cycle).min(span.run_end),
                    );
                }
            }
            _ => {
                let at = match product.timing {
                    ProductTiming::AtRunStart => span.run_start,
                    ProductTiming::AtRunEnd => span.run_end,
                    ProductTiming::AtPostProcessEnd => span.post_end,
                    ProductTiming::AtStorageEnd => span.end,
                    ProductTiming::PerCycle { .. } => span.run_end,
                };
                add_output(model, product, total, at);
            }
        }
    }
}

fn add_output(model: &mut PlantModel, product: &Product, qty: Qty, at: Ticks) {
    model.add_supply(SupplyNode {
        item: product.item,
        warehouse: product.warehouse,
        source: SupplySource::ActivityOutput,
        available_at: at,
        qty,
        consumed: Qty::from_num(0),
        staged: Qty::from_num(0),
    });
}

/// Final per-activity and per-operation state updates after commit.
fn finish_activity(
    model: &mut PlantModel,
    hook: &mut dyn CustomizationHook,
    ctx: &mut PlacementContext,
    activity: ActivityId,
    span: ScheduledSpan,
) {
    let op_id = {
        let act = &mut model.activities[activity];
        act.scheduled = Some(span);
        act.status = ProductionStatus::Finished;
        act.ordinal = Some(ctx.next_ordinal);
        act.operation
    };
    ctx.next_ordinal += 1;

    let (placed, total) = {
        let state = &mut model.operation_states[op_id];
        state.placed += 1;
        state.last_end = state.last_end.max(span.end);
        state.last_run_end = state.last_run_end.max(span.run_end);
        state.first_run_start = state.first_run_start.min(span.run_start);
        (state.placed, state.activities.len())
    };

    // Path commitment: first placement of the MO wins the race.
    let mo = model.operations[op_id].mo;
    let path = model.operations[op_id].path;
    if model.mo_states[mo].committed_path.is_none() {
        model.mo_states[mo].committed_path = Some(path);
    }

    if placed >= total {
        model.operation_states[op_id].phase = OperationPhase::Scheduled;
        hook.operation_scheduled(model, op_id);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
