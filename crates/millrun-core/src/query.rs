//! Read-only query API for inspecting schedule output.
//!
//! Provides snapshot types that aggregate committed blocks and per-run state
//! into convenient views for planners, UIs, and reports. All types are owned
//! copies -- no references into internal model storage.

use crate::activity::ScheduledSpan;
use crate::engine::CommittedBlock;
use crate::fixed::{Qty, Ticks};
use crate::id::{ActivityId, MoId, OperationId, PathId, ResourceId};
use crate::model::PlantModel;
use crate::order::OperationPhase;
use crate::resource::BlockKind;

// ---------------------------------------------------------------------------
// Resource snapshot
// ---------------------------------------------------------------------------

/// An aggregated, read-only view of one resource's committed schedule.
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    /// The resource's ID in the plant model.
    pub id: ResourceId,
    /// Display name of the resource.
    pub name: String,
    /// All committed blocks on this resource, ordered by start time.
    pub blocks: Vec<CommittedBlock>,
    /// Total occupied ticks, with batch-shared blocks counted once.
    pub busy: Ticks,
    /// First block start and last block end, if any block is committed.
    pub occupied_span: Option<(Ticks, Ticks)>,
}

/// Build a snapshot of one resource's schedule.
pub fn resource_snapshot(model: &PlantModel, id: ResourceId) -> Option<ResourceSnapshot> {
    let res = model.resources.get(id)?;
    let state = model.resource_states.get(id)?;

    let mut blocks: Vec<CommittedBlock> = state
        .blocks
        .iter()
        .map(|b| CommittedBlock {
            resource: id,
            activity: b.activity,
            kind: b.kind,
            start: b.start,
            end: b.end,
        })
        .collect();
    blocks.sort_by_key(|b| (b.start, b.end));

    // Batch members share run blocks, so merge intervals before summing.
    let mut busy: Ticks = 0;
    let mut cursor: Option<(Ticks, Ticks)> = None;
    for b in &blocks {
        match cursor {
            Some((lo, hi)) if b.start <= hi => cursor = Some((lo, hi.max(b.end))),
            Some((lo, hi)) => {
                busy += hi - lo;
                cursor = Some((b.start, b.end));
            }
            None => cursor = Some((b.start, b.end)),
        }
    }
    if let Some((lo, hi)) = cursor {
        busy += hi - lo;
    }

    let occupied_span = blocks
        .first()
        .map(|f| (f.start, blocks.iter().map(|b| b.end).max().unwrap_or(f.end)));

    Some(ResourceSnapshot {
        id,
        name: res.name.clone(),
        blocks,
        busy,
        occupied_span,
    })
}

/// Snapshots for every resource, ordered by resource id.
pub fn all_resources(model: &PlantModel) -> Vec<ResourceSnapshot> {
    let mut ids: Vec<ResourceId> = model.resources.keys().collect();
    ids.sort();
    ids.into_iter()
        .filter_map(|id| resource_snapshot(model, id))
        .collect()
}

/// Committed blocks on one resource that overlap the window `[start, end)`.
pub fn blocks_in_window(
    model: &PlantModel,
    resource: ResourceId,
    start: Ticks,
    end: Ticks,
) -> Vec<CommittedBlock> {
    resource_snapshot(model, resource)
        .map(|snap| {
            snap.blocks
                .into_iter()
                .filter(|b| b.start < end && start < b.end)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// MO snapshot
// ---------------------------------------------------------------------------

/// One activity's contribution to an MO snapshot.
#[derive(Debug, Clone)]
pub struct ActivitySnapshot {
    pub id: ActivityId,
    pub operation: OperationId,
    pub operation_name: String,
    pub quantity: Qty,
    /// Commit order across the whole run, if the activity placed.
    pub ordinal: Option<u64>,
    pub span: Option<ScheduledSpan>,
}

/// An aggregated, read-only view of one manufacturing order's schedule.
#[derive(Debug, Clone)]
pub struct MoSnapshot {
    /// The MO's ID in the plant model.
    pub id: MoId,
    /// Display name of the MO.
    pub name: String,
    pub due: Ticks,
    /// The path the MO committed to, once its first activity placed.
    pub committed_path: Option<PathId>,
    /// Operations scheduled so far versus operations on the committed path
    /// (or the largest path while uncommitted).
    pub scheduled_ops: usize,
    pub total_ops: usize,
    /// End of the latest placed activity. None while nothing has placed.
    pub completion: Option<Ticks>,
    /// True when the MO completed after its due date.
    pub late: bool,
    /// Per-activity detail, in creation order.
    pub activities: Vec<ActivitySnapshot>,
}

/// Build a snapshot of one MO's schedule.
pub fn mo_snapshot(model: &PlantModel, id: MoId) -> Option<MoSnapshot> {
    let mo = model.mos.get(id)?;
    let state = model.mo_states.get(id)?;

    let total_ops = match state.committed_path {
        Some(path) => model.paths[path].operations.len(),
        None => mo
            .paths
            .iter()
            .map(|&p| model.paths[p].operations.len())
            .max()
            .unwrap_or(0),
    };

    let mut activities = Vec::new();
    for &path in &mo.paths {
        for &op in &model.paths[path].operations {
            let op_state = &model.operation_states[op];
            if op_state.phase == OperationPhase::Omitted {
                continue;
            }
            for &act_id in &op_state.activities {
                let act = &model.activities[act_id];
                activities.push(ActivitySnapshot {
                    id: act_id,
                    operation: op,
                    operation_name: model.operations[op].name.clone(),
                    quantity: act.required_qty,
                    ordinal: act.ordinal,
                    span: act.scheduled,
                });
            }
        }
    }
    activities.sort_by_key(|a| model.activities[a.id].seq);

    let completion = (state.scheduled_ops > 0).then_some(state.last_end);
    Some(MoSnapshot {
        id,
        name: mo.name.clone(),
        due: mo.due,
        committed_path: state.committed_path,
        scheduled_ops: state.scheduled_ops,
        total_ops,
        completion,
        late: completion.is_some_and(|c| c > mo.due),
        activities,
    })
}

/// Snapshots for every MO, ordered by due date then name.
pub fn all_mos(model: &PlantModel) -> Vec<MoSnapshot> {
    let mut out: Vec<MoSnapshot> = model
        .mos
        .keys()
        .filter_map(|id| mo_snapshot(model, id))
        .collect();
    out.sort_by(|a, b| (a.due, &a.name).cmp(&(b.due, &b.name)));
    out
}

/// Total ticks spent on `Run` blocks across the whole plant.
pub fn total_run_ticks(model: &PlantModel) -> Ticks {
    model
        .resource_states
        .values()
        .flat_map(|s| s.blocks.iter())
        .filter(|b| b.kind == BlockKind::Run)
        .map(|b| b.end - b.start)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, RunKind};
    use crate::policy::SchedulingPolicy;
    use crate::test_utils::two_activity_fixture;

    fn scheduled_engine() -> Engine {
        let fixture = two_activity_fixture();
        let mut engine =
            Engine::new(fixture.model, SchedulingPolicy::default()).expect("valid policy");
        engine.run(0, RunKind::Forward).expect("run succeeds");
        engine
    }

    // ---- Test 1: resource snapshot orders blocks and merges busy time ----
    #[test]
    fn resource_snapshot_orders_and_sums() {
        let engine = scheduled_engine();
        let id = engine.model.resources.keys().next().expect("resource");
        let snap = resource_snapshot(&engine.model, id).expect("snapshot");

        assert!(!snap.blocks.is_empty());
        assert!(snap.blocks.windows(2).all(|w| w[0].start <= w[1].start));
        let (lo, hi) = snap.occupied_span.expect("occupied");
        assert!(snap.busy > 0 && snap.busy <= hi - lo);
    }

    // ---- Test 2: MO snapshot reports completion and progress ----
    #[test]
    fn mo_snapshot_reports_completion() {
        let engine = scheduled_engine();
        let id = engine.model.mos.keys().next().expect("mo");
        let snap = mo_snapshot(&engine.model, id).expect("snapshot");

        assert_eq!(snap.scheduled_ops, 2);
        assert_eq!(snap.total_ops, 2);
        let completion = snap.completion.expect("completed");
        assert_eq!(completion, engine.model.mo_states[id].last_end);
        assert!(!snap.late, "due 100_000 leaves ample slack");
        assert!(snap.activities.iter().all(|a| a.span.is_some()));
    }

    // ---- Test 3: window filter excludes non-overlapping blocks ----
    #[test]
    fn blocks_in_window_filters() {
        let engine = scheduled_engine();
        let id = engine.model.resources.keys().next().expect("resource");
        let snap = resource_snapshot(&engine.model, id).expect("snapshot");
        let (lo, hi) = snap.occupied_span.expect("occupied");

        assert_eq!(blocks_in_window(&engine.model, id, lo, hi).len(), snap.blocks.len());
        assert!(blocks_in_window(&engine.model, id, hi + 1, hi + 100).is_empty());
    }

    // ---- Test 4: run-tick total matches committed run blocks ----
    #[test]
    fn total_run_ticks_counts_run_blocks_only() {
        let engine = scheduled_engine();
        let expected: Ticks = engine
            .model
            .resource_states
            .values()
            .flat_map(|s| s.blocks.iter())
            .filter(|b| b.kind == BlockKind::Run)
            .map(|b| b.end - b.start)
            .sum();
        assert_eq!(total_run_ticks(&engine.model), expected);
        assert!(expected > 0);
    }
}
