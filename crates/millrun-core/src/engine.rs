//! The simulation driver: event loop, dispatch rounds, and run lifecycle.
//!
//! A run repeatedly pops the next event batch (all events at the minimum
//! time), processes them into readiness and dispatcher state, then gives
//! every resource with ready work one placement attempt in score order
//! before the clock advances. Identical input and policy produce an
//! identical sequence of committed blocks.

use tracing::{debug, info, warn};

use crate::batch::BatchManager;
use crate::dispatch::{DispatchEntry, DispatchOrder, DispatchRule, DispatcherSet, rule_for};
use crate::error::ValidationError;
use crate::event::SimEvent;
use crate::fixed::Ticks;
use crate::hooks::{CustomizationHook, NoopHook, NoopObserver, RunObserver};
use crate::id::{ActivityId, ResourceId};
use crate::model::PlantModel;
use crate::notify;
use crate::order::OperationPhase;
use crate::placement::{self, PlacementContext, PlacementOutcome};
use crate::policy::SchedulingPolicy;
use crate::profiling::{Counter, Counters};
use crate::queue::EventQueue;
use crate::readiness::{self, ConstraintKind, ReleaseOutcome};
use crate::resource::BlockKind;

// ---------------------------------------------------------------------------
// Run kinds and results
// ---------------------------------------------------------------------------

/// How a run treats state left by previous runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Fresh schedule; all prior blocks are discarded.
    Forward,
    /// Re-simulation over existing blocks; prior batch composition is
    /// honored where edits did not touch it.
    Incremental,
    /// Like incremental, but explicitly-moved activities outrank
    /// opportunistic placements in dispatch order.
    Move,
}

/// One committed block, flattened for callers and determinism checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedBlock {
    pub resource: ResourceId,
    pub activity: ActivityId,
    pub kind: BlockKind,
    pub start: Ticks,
    pub end: Ticks,
}

/// Summary of a finished (or cancelled) run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub scheduled: u64,
    pub clock_end: Ticks,
    pub cancelled: bool,
    /// All blocks, ordered by resource id then start.
    pub blocks: Vec<CommittedBlock>,
    /// Activities that never placed, in creation order.
    pub unplaced: Vec<ActivityId>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The scheduling engine: a plant model plus policy, reusable across runs.
pub struct Engine {
    pub model: PlantModel,
    policy: SchedulingPolicy,
    batches: BatchManager,
    counters: Counters,
}

impl Engine {
    pub fn new(model: PlantModel, policy: SchedulingPolicy) -> Result<Self, ValidationError> {
        policy.validate()?;
        Ok(Self {
            model,
            policy,
            batches: BatchManager::new(),
            counters: Counters::new(),
        })
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Run with no hooks or observers.
    pub fn run(&mut self, start: Ticks, kind: RunKind) -> Result<RunResult, ValidationError> {
        self.run_with(start, kind, &mut NoopHook, &mut NoopObserver)
    }

    /// Run the full simulation loop.
    pub fn run_with(
        &mut self,
        start: Ticks,
        kind: RunKind,
        hook: &mut dyn CustomizationHook,
        observer: &mut dyn RunObserver,
    ) -> Result<RunResult, ValidationError> {
        self.policy.validate()?;
        let keep_blocks = matches!(kind, RunKind::Incremental | RunKind::Move);
        self.model.reset_run_state(keep_blocks);
        if keep_blocks {
            // Leftover blocks from a prior run can be structurally corrupt
            // after outside edits; repair and report, never crash.
            for (id, res) in &self.model.resources {
                if let Some(state) = self.model.resource_states.get_mut(id) {
                    let pruned = state.prune_invalid_blocks(res);
                    if pruned > 0 {
                        warn!(resource = ?id, pruned, "removed invalid committed blocks");
                    }
                }
            }
        }
        self.batches.reset_open();
        self.counters = Counters::new();

        let model = &mut self.model;
        let batches = &mut self.batches;
        let policy = &self.policy;
        let counters = &mut self.counters;
        let rule = rule_for(&policy.rule);

        // Seed the queue in bulk: MO releases and online boundaries. MOs
        // that are another MO's successor wait for the notification cascade.
        let gated: std::collections::BTreeSet<crate::id::MoId> = model
            .mos
            .values()
            .flat_map(|mo| mo.successors.iter().copied())
            .collect();
        let mut queue = EventQueue::new();
        queue.begin_bulk(start)?;
        for (id, mo) in &model.mos {
            if gated.contains(&id) {
                continue;
            }
            queue.push(mo.release_after.max(start), SimEvent::ReleaseMo { mo: id })?;
        }
        for (id, res) in &model.resources {
            for w in &res.online {
                if w.start > start {
                    queue.push(w.start, SimEvent::ResourceOnline { resource: id })?;
                }
            }
        }
        queue.end_bulk()?;
        info!(start, ?kind, seeded = queue.len(), "run started");

        let mut dispatchers = DispatcherSet::new();
        let mut ctx = PlacementContext {
            policy,
            clock: start,
            moving: matches!(kind, RunKind::Move),
            cancelled: false,
            next_ordinal: 0,
        };
        let order = if ctx.moving {
            DispatchOrder::Move
        } else {
            DispatchOrder::Normal
        };
        let mut scheduled: u64 = 0;

        while let Some(t) = queue.peek_min_time() {
            if t > policy.horizon {
                debug!(t, horizon = policy.horizon, "horizon reached");
                break;
            }
            let events = queue.pop_batch();
            ctx.clock = queue.clock();
            for event in events {
                counters.bump(Counter::EventsProcessed);
                process_event(model, &mut queue, &mut dispatchers, rule.as_ref(), event)?;
            }

            // One placement attempt per resource with ready work, in score
            // order. A cleanout soft failure lets the next candidate on the
            // same resource try within the round.
            for resource in dispatchers.resources_with_work(model, order) {
                if let Some(d) = dispatchers.get_mut(resource) {
                    d.begin_dispatch();
                }
                let mut skipped: Vec<ActivityId> = Vec::new();
                loop {
                    let Some(entry) = dispatchers
                        .get(resource)
                        .and_then(|d| d.best_excluding(order, &skipped))
                    else {
                        break;
                    };
                    let activity = entry.activity;
                    counters.bump(Counter::PlacementAttempts);
                    let outcome = placement::attempt_place(
                        model,
                        batches,
                        &mut dispatchers,
                        hook,
                        &mut ctx,
                        resource,
                        activity,
                    );
                    match outcome {
                        PlacementOutcome::Placed {
                            span,
                            remainder,
                            freed,
                            ..
                        } => {
                            counters.bump(Counter::Placements);
                            // The sibling must be queued before the commit
                            // notification so the wake armed for the freed
                            // slot can see it as a candidate.
                            if let Some(sibling) = remainder {
                                counters.bump(Counter::Splits);
                                enqueue_activity(model, &mut dispatchers, rule.as_ref(), sibling)?;
                            }
                            notify::after_commit(
                                model,
                                &mut queue,
                                &mut dispatchers,
                                activity,
                                span,
                                &freed,
                            )?;
                            observer.activity_scheduled(model, activity);
                            scheduled += 1;
                            if policy.progress_every > 0
                                && scheduled % policy.progress_every == 0
                            {
                                observer.progress(scheduled, ctx.clock);
                            }
                            if let Some(max) = policy.max_committed_blocks {
                                let total: usize = model
                                    .resource_states
                                    .values()
                                    .map(|s| s.blocks.len())
                                    .sum();
                                if total as u64 >= max {
                                    warn!(total, max, "committed-block limit reached, cancelling run");
                                    ctx.cancelled = true;
                                }
                            }
                            // Batches group work that starts at the same
                            // instant, so the round continues while the next
                            // candidate can share the slot just committed.
                            if !ctx.cancelled
                                && let Some(next) = dispatchers
                                    .get(resource)
                                    .and_then(|d| d.best_excluding(order, &skipped))
                                && batches
                                    .joinable_slot(model, resource, next.activity, ctx.clock)
                                    .is_some()
                            {
                                continue;
                            }
                        }
                        PlacementOutcome::CleanoutBlocking { retry_at } => {
                            counters.bump(Counter::RetriesArmed);
                            queue.push(retry_at, SimEvent::CleanoutBoundary { resource })?;
                            skipped.push(activity);
                            continue;
                        }
                        other => {
                            handle_failure(
                                model,
                                &mut queue,
                                &mut dispatchers,
                                counters,
                                ctx.clock,
                                resource,
                                activity,
                                other,
                            )?;
                        }
                    }
                    break;
                }
                if let Some(d) = dispatchers.get_mut(resource) {
                    d.end_dispatch();
                }
                if ctx.cancelled {
                    break;
                }
            }
            if ctx.cancelled {
                break;
            }
        }

        // Work still sitting in a dispatcher after the queue drains means a
        // retry path failed to re-arm: an engine bug.
        if !ctx.cancelled && queue.is_empty() && dispatchers.total_ready() > 0 {
            debug_assert!(false, "dispatchers non-empty after queue drained");
            warn!(
                pending = dispatchers.total_ready(),
                "dispatchers non-empty after queue drained"
            );
        }

        batches.remember_run(model);
        observer.scheduling_complete(scheduled, ctx.clock);

        let mut unplaced: Vec<(u64, ActivityId)> = model
            .activities
            .iter()
            .filter(|(_, a)| !a.is_placed())
            .map(|(id, a)| (a.seq, id))
            .collect();
        unplaced.sort();
        let result = RunResult {
            scheduled,
            clock_end: ctx.clock,
            cancelled: ctx.cancelled,
            blocks: collect_blocks(model),
            unplaced: unplaced.into_iter().map(|(_, id)| id).collect(),
        };
        info!(
            scheduled,
            clock_end = result.clock_end,
            cancelled = result.cancelled,
            unplaced = result.unplaced.len(),
            "run finished"
        );
        Ok(result)
    }

    /// Remove committed state for the given activities: blocks on every
    /// resource, batch membership, and the owning operations' placement
    /// accounting. Used by the edit layer between incremental runs.
    pub fn unschedule(&mut self, activities: &[ActivityId]) -> Result<(), ValidationError> {
        for &activity in activities {
            let Some(act) = self.model.activities.get(activity) else {
                return Err(ValidationError::UnknownEntity { what: "activity" });
            };
            let op = act.operation;
            let was_placed = act.scheduled.is_some();

            self.batches.remove(&mut self.model, activity);
            for (_, state) in self.model.resource_states.iter_mut() {
                state.remove_blocks_of(activity);
            }
            let act = &mut self.model.activities[activity];
            act.scheduled = None;
            act.ordinal = None;
            act.status = crate::activity::ProductionStatus::Queued;

            if was_placed {
                let state = &mut self.model.operation_states[op];
                state.placed = state.placed.saturating_sub(1);
                if state.phase == OperationPhase::Scheduled {
                    state.phase = OperationPhase::Released;
                }
            }
        }
        Ok(())
    }

    /// Enable or disable dispatching per resource. Disabled resources keep
    /// their committed blocks but take no new work.
    pub fn configure_stages(&mut self, stages: &[(ResourceId, bool)]) -> Result<(), ValidationError> {
        for &(resource, enabled) in stages {
            let Some(state) = self.model.resource_states.get_mut(resource) else {
                return Err(ValidationError::UnknownEntity { what: "resource" });
            };
            state.stage_enabled = enabled;
        }
        Ok(())
    }
}

/// Flatten all committed blocks, ordered by resource id then start.
pub fn collect_blocks(model: &PlantModel) -> Vec<CommittedBlock> {
    let mut out = Vec::new();
    let mut ids: Vec<ResourceId> = model.resources.keys().collect();
    ids.sort();
    for resource in ids {
        for b in &model.resource_states[resource].blocks {
            out.push(CommittedBlock {
                resource,
                activity: b.activity,
                kind: b.kind,
                start: b.start,
                end: b.end,
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Event processing
// ---------------------------------------------------------------------------

fn process_event(
    model: &mut PlantModel,
    queue: &mut EventQueue,
    dispatchers: &mut DispatcherSet,
    rule: &dyn DispatchRule,
    event: SimEvent,
) -> Result<(), ValidationError> {
    let clock = queue.clock();
    match event {
        SimEvent::ReleaseMo { mo } => {
            if model.mo_states[mo].released {
                return Ok(());
            }
            if model.mos[mo].release_after > clock {
                return queue.push(model.mos[mo].release_after, SimEvent::ReleaseMo { mo });
            }
            model.mo_states[mo].released = true;
            debug!(?mo, clock, "mo released");
            for path in model.mos[mo].paths.clone() {
                if let Some(committed) = model.mo_states[mo].committed_path
                    && committed != path
                {
                    continue;
                }
                for op in readiness::root_operations(model, path) {
                    queue.push(clock, SimEvent::ReleaseOperation { op })?;
                }
            }
        }
        SimEvent::ReleaseOperation { op } => {
            try_release(model, queue, dispatchers, rule, op)?;
        }
        SimEvent::PredecessorAvailable { op, predecessor } => {
            let complete = readiness::mark_predecessor_available(model, op, predecessor);
            if complete && model.operation_states[op].phase == OperationPhase::Unreleased {
                queue.push(clock, SimEvent::ReleaseOperation { op })?;
            }
        }
        SimEvent::HoldExpired { op } => {
            queue.push(clock, SimEvent::ReleaseOperation { op })?;
        }
        SimEvent::MaterialAvailable { item } => {
            for op in readiness::take_material_watchers(model, item) {
                for activity in model.operation_states[op].activities.clone() {
                    restore_suspended(model, dispatchers, rule, activity)?;
                }
            }
        }
        SimEvent::ConnectorFreed { connector } => {
            let state = &mut model.connector_states[connector];
            state.in_use = state.in_use.saturating_sub(1);
        }
        SimEvent::StorageFreed { warehouse } => {
            for activity in model.storage_watch.remove(&warehouse).unwrap_or_default() {
                restore_suspended(model, dispatchers, rule, activity)?;
            }
        }
        SimEvent::RetryPlacement { resource, activity } => {
            if model
                .activities
                .get(activity)
                .is_some_and(|a| !a.is_placed())
            {
                insert_candidate(model, dispatchers, rule, resource, activity)?;
            }
        }
        // These exist to wake the loop; the dispatch round that follows
        // every batch does the work.
        SimEvent::ResourceOnline { .. }
        | SimEvent::ResourceOffline { .. }
        | SimEvent::CleanoutBoundary { .. } => {}
    }
    Ok(())
}

/// Evaluate an operation's release gate and either release it (creating its
/// first activity and populating dispatchers) or arm the deferral event.
fn try_release(
    model: &mut PlantModel,
    queue: &mut EventQueue,
    dispatchers: &mut DispatcherSet,
    rule: &dyn DispatchRule,
    op: crate::id::OperationId,
) -> Result<(), ValidationError> {
    if model.operation_states[op].phase != OperationPhase::Unreleased {
        return Ok(());
    }
    let clock = queue.clock();
    match readiness::evaluate_release(model, op, clock) {
        ReleaseOutcome::Ready => {
            readiness::advance_phase(model, op, OperationPhase::Released);
            let quantity = model.mos[model.operations[op].mo].quantity;
            let activity = model.new_activity(op, quantity, clock);
            debug!(?op, ?activity, clock, "operation released");
            enqueue_activity(model, dispatchers, rule, activity)?;
        }
        ReleaseOutcome::Deferred(constraint) => match constraint.kind {
            ConstraintKind::Hold => {
                queue.push(constraint.at, SimEvent::HoldExpired { op })?;
            }
            ConstraintKind::Clock => {
                if constraint.at > clock {
                    queue.push(constraint.at, SimEvent::ReleaseOperation { op })?;
                }
            }
            // A PredecessorAvailable or MaterialAvailable event re-triggers
            // the release when it fires.
            _ => {}
        },
        ReleaseOutcome::Omitted => {
            readiness::advance_phase(model, op, OperationPhase::Omitted);
        }
    }
    Ok(())
}

/// Insert an unplaced activity into the dispatcher of every resource its
/// primary requirement can use.
fn enqueue_activity(
    model: &mut PlantModel,
    dispatchers: &mut DispatcherSet,
    rule: &dyn DispatchRule,
    activity: ActivityId,
) -> Result<(), ValidationError> {
    let op = model.activities[activity].operation;
    let primary = model.operations[op].primary();
    let resources: Vec<ResourceId> = match primary.pinned() {
        Some(r) => vec![r],
        None => {
            let mut r = primary.eligible.clone();
            r.sort();
            r
        }
    };
    for resource in resources {
        insert_candidate(model, dispatchers, rule, resource, activity)?;
    }
    Ok(())
}

fn insert_candidate(
    model: &mut PlantModel,
    dispatchers: &mut DispatcherSet,
    rule: &dyn DispatchRule,
    resource: ResourceId,
    activity: ActivityId,
) -> Result<(), ValidationError> {
    let score = rule.score(model, activity);
    let act = &model.activities[activity];
    let entry = DispatchEntry {
        activity,
        score,
        seq: act.seq,
        moved: act.moved,
        original_start: act.original_start,
    };
    dispatchers.insert(model, resource, entry)
}

/// Put a suspended activity back into the dispatchers it was removed from.
fn restore_suspended(
    model: &mut PlantModel,
    dispatchers: &mut DispatcherSet,
    rule: &dyn DispatchRule,
    activity: ActivityId,
) -> Result<(), ValidationError> {
    if model
        .activities
        .get(activity)
        .is_none_or(|a| a.is_placed())
    {
        return Ok(());
    }
    let suspended = std::mem::take(&mut model.activities[activity].suspended_dispatchers);
    for resource in suspended {
        insert_candidate(model, dispatchers, rule, resource, activity)?;
    }
    Ok(())
}

/// Translate a non-committing placement outcome into retry/removal policy.
#[allow(clippy::too_many_arguments)]
fn handle_failure(
    model: &mut PlantModel,
    queue: &mut EventQueue,
    dispatchers: &mut DispatcherSet,
    counters: &mut Counters,
    clock: Ticks,
    resource: ResourceId,
    activity: ActivityId,
    outcome: PlacementOutcome,
) -> Result<(), ValidationError> {
    match outcome {
        PlacementOutcome::Placed { .. } | PlacementOutcome::CleanoutBlocking { .. } => {
            unreachable!("handled by the caller")
        }
        PlacementOutcome::NoCapacity { retry_at: Some(t) }
        | PlacementOutcome::Occupied { retry_at: t }
        | PlacementOutcome::AttentionUnavailable { retry_at: t }
        | PlacementOutcome::ReservedMoveWindow { retry_at: t }
        | PlacementOutcome::TransferViolation { retry_at: t }
        | PlacementOutcome::ConnectorUnavailable { retry_at: Some(t) }
        | PlacementOutcome::CustomizationRejected { retry_at: Some(t) } => {
            counters.bump(Counter::RetriesArmed);
            dispatchers.remove(model, resource, activity);
            queue.push(t.max(clock + 1), SimEvent::RetryPlacement { resource, activity })?;
        }
        PlacementOutcome::BatchRefused(_) => {
            counters.bump(Counter::RetriesArmed);
            dispatchers.remove(model, resource, activity);
            queue.push(clock + 1, SimEvent::RetryPlacement { resource, activity })?;
        }
        // This resource can never take the activity.
        PlacementOutcome::NoCapacity { retry_at: None }
        | PlacementOutcome::CompatibilityViolation
        | PlacementOutcome::ConnectorUnavailable { retry_at: None }
        | PlacementOutcome::CustomizationRejected { retry_at: None } => {
            dispatchers.remove(model, resource, activity);
        }
        PlacementOutcome::MaterialUnavailable { blocking, retry_at } => {
            let removed = dispatchers.remove_everywhere(model, activity);
            model.activities[activity].suspended_dispatchers = removed;
            let op = model.activities[activity].operation;
            readiness::watch_material(model, blocking, op);
            if let Some(t) = retry_at {
                counters.bump(Counter::RetriesArmed);
                queue.push(t.max(clock + 1), SimEvent::MaterialAvailable { item: blocking })?;
            }
        }
        PlacementOutcome::StorageUnavailable { warehouse } => {
            let removed = dispatchers.remove_everywhere(model, activity);
            model.activities[activity].suspended_dispatchers = removed;
            model
                .storage_watch
                .entry(warehouse)
                .or_default()
                .push(activity);
        }
        PlacementOutcome::Cancelled => {}
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
