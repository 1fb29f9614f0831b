//! Determinism validation tools for schedule comparison.
//!
//! Provides utilities for comparing two committed-block sequences to find
//! divergences, and for validating that a model plus policy produces an
//! identical schedule on repeated runs.

use crate::engine::{CommittedBlock, Engine, RunKind};
use crate::error::ValidationError;
use crate::fixed::Ticks;
use crate::id::{ActivityId, MoId};
use crate::model::PlantModel;
use crate::policy::SchedulingPolicy;

// ---------------------------------------------------------------------------
// Schedule diff types
// ---------------------------------------------------------------------------

/// Difference between two schedules at the block level.
#[derive(Debug, Clone)]
pub enum BlockDiff {
    /// Block exists only in schedule A (index into A's sequence).
    OnlyInA { index: usize, block: CommittedBlock },
    /// Block exists only in schedule B (index into B's sequence).
    OnlyInB { index: usize, block: CommittedBlock },
    /// Both schedules have a block at this position but they differ.
    Mismatch {
        index: usize,
        a: CommittedBlock,
        b: CommittedBlock,
    },
}

/// Difference between two schedules at the MO level.
#[derive(Debug, Clone)]
pub enum MoDiff {
    /// Completion time differs.
    CompletionMismatch { mo: MoId, a: Ticks, b: Ticks },
    /// Scheduled-operation count differs.
    ProgressMismatch { mo: MoId, a: usize, b: usize },
}

/// Full diff between two schedule outputs.
#[derive(Debug, Clone)]
pub struct ScheduleDiff {
    pub is_identical: bool,
    pub block_diffs: Vec<BlockDiff>,
    pub mo_diffs: Vec<MoDiff>,
    /// Activities whose commit ordinals differ between the runs, keyed by
    /// the ordinal seen in run A.
    pub ordinal_diffs: Vec<(u64, ActivityId, ActivityId)>,
}

// ---------------------------------------------------------------------------
// Block-sequence diff
// ---------------------------------------------------------------------------

/// Compare two committed-block sequences position by position.
pub fn diff_blocks(a: &[CommittedBlock], b: &[CommittedBlock]) -> Vec<BlockDiff> {
    let mut diffs = Vec::new();
    let shared = a.len().min(b.len());

    for index in 0..shared {
        if a[index] != b[index] {
            diffs.push(BlockDiff::Mismatch {
                index,
                a: a[index],
                b: b[index],
            });
        }
    }
    for (offset, &block) in a[shared..].iter().enumerate() {
        diffs.push(BlockDiff::OnlyInA {
            index: shared + offset,
            block,
        });
    }
    for (offset, &block) in b[shared..].iter().enumerate() {
        diffs.push(BlockDiff::OnlyInB {
            index: shared + offset,
            block,
        });
    }
    diffs
}

/// Compute a detailed diff between two scheduled models.
///
/// Both models must have been built identically; this compares run output
/// (blocks, ordinals, MO progress), not plant structure.
pub fn diff_schedules(a: &PlantModel, b: &PlantModel) -> ScheduleDiff {
    let blocks_a = crate::engine::collect_blocks(a);
    let blocks_b = crate::engine::collect_blocks(b);
    let block_diffs = diff_blocks(&blocks_a, &blocks_b);

    let mut mo_diffs = Vec::new();
    for mo in a.mos.keys() {
        let (Some(sa), Some(sb)) = (a.mo_states.get(mo), b.mo_states.get(mo)) else {
            continue;
        };
        if sa.scheduled_ops != sb.scheduled_ops {
            mo_diffs.push(MoDiff::ProgressMismatch {
                mo,
                a: sa.scheduled_ops,
                b: sb.scheduled_ops,
            });
        } else if sa.last_end != sb.last_end {
            mo_diffs.push(MoDiff::CompletionMismatch {
                mo,
                a: sa.last_end,
                b: sb.last_end,
            });
        }
    }

    let ordinal_diffs = diff_ordinals(a, b);
    ScheduleDiff {
        is_identical: block_diffs.is_empty() && mo_diffs.is_empty() && ordinal_diffs.is_empty(),
        block_diffs,
        mo_diffs,
        ordinal_diffs,
    }
}

fn diff_ordinals(a: &PlantModel, b: &PlantModel) -> Vec<(u64, ActivityId, ActivityId)> {
    let by_ordinal = |m: &PlantModel| {
        let mut v: Vec<(u64, ActivityId)> = m
            .activities
            .iter()
            .filter_map(|(id, act)| act.ordinal.map(|o| (o, id)))
            .collect();
        v.sort();
        v
    };
    let oa = by_ordinal(a);
    let ob = by_ordinal(b);

    oa.iter()
        .zip(ob.iter())
        .filter(|((orda, ida), (ordb, idb))| orda != ordb || ida != idb)
        .map(|(&(ord, ida), &(_, idb))| (ord, ida, idb))
        .collect()
}

// ---------------------------------------------------------------------------
// Determinism validation
// ---------------------------------------------------------------------------

/// Result of a determinism validation run.
#[derive(Debug)]
pub struct DeterminismResult {
    /// Whether every repeat produced an identical schedule.
    pub is_deterministic: bool,
    /// Index (1-based repeat number) of the first diverging run, if any.
    pub diverged_at: Option<u32>,
    /// Diff of the first diverging run against the baseline.
    pub first_diff: Option<ScheduleDiff>,
}

/// Validate that running the same model under the same policy repeatedly
/// produces an identical committed-block sequence and ordinal assignment.
///
/// Each repeat runs on a fresh clone of `model`, so slotmap key allocation
/// is identical across repeats.
pub fn validate_determinism(
    model: &PlantModel,
    policy: &SchedulingPolicy,
    start: Ticks,
    repeats: u32,
) -> Result<DeterminismResult, ValidationError> {
    let mut baseline = Engine::new(model.clone(), policy.clone())?;
    baseline.run(start, RunKind::Forward)?;

    for repeat in 1..=repeats.max(1) {
        let mut engine = Engine::new(model.clone(), policy.clone())?;
        engine.run(start, RunKind::Forward)?;

        let diff = diff_schedules(&baseline.model, &engine.model);
        if !diff.is_identical {
            return Ok(DeterminismResult {
                is_deterministic: false,
                diverged_at: Some(repeat),
                first_diff: Some(diff),
            });
        }
    }

    Ok(DeterminismResult {
        is_deterministic: true,
        diverged_at: None,
        first_diff: None,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::BlockKind;
    use crate::test_utils::{two_activity_fixture, two_mo_fixture};

    fn run_model(model: &PlantModel) -> PlantModel {
        let mut engine =
            Engine::new(model.clone(), SchedulingPolicy::default()).expect("valid policy");
        engine.run(0, RunKind::Forward).expect("run succeeds");
        engine.model
    }

    // ---- Test 1: identical runs diff as identical ----
    #[test]
    fn identical_runs_have_empty_diff() {
        let fixture = two_activity_fixture();
        let a = run_model(&fixture.model);
        let b = run_model(&fixture.model);

        let diff = diff_schedules(&a, &b);
        assert!(diff.is_identical);
        assert!(diff.block_diffs.is_empty());
        assert!(diff.ordinal_diffs.is_empty());
    }

    // ---- Test 2: a perturbed block shows up as a mismatch ----
    #[test]
    fn perturbed_block_is_detected() {
        let fixture = two_activity_fixture();
        let a = run_model(&fixture.model);
        let mut b = run_model(&fixture.model);

        let resource = b.resources.keys().next().expect("resource");
        let block = b.resource_states[resource]
            .blocks
            .iter_mut()
            .find(|blk| blk.kind == BlockKind::Run)
            .expect("run block");
        block.end += 1;

        let diff = diff_schedules(&a, &b);
        assert!(!diff.is_identical);
        assert!(
            diff.block_diffs
                .iter()
                .any(|d| matches!(d, BlockDiff::Mismatch { .. }))
        );
    }

    // ---- Test 3: length mismatch reports the extra blocks ----
    #[test]
    fn missing_blocks_reported_by_side() {
        let fixture = two_activity_fixture();
        let a = run_model(&fixture.model);
        let mut b = run_model(&fixture.model);

        let resource = b.resources.keys().next().expect("resource");
        b.resource_states[resource].blocks.pop();

        let diff = diff_schedules(&a, &b);
        assert!(!diff.is_identical);
        assert!(
            diff.block_diffs
                .iter()
                .any(|d| matches!(d, BlockDiff::OnlyInA { .. }))
        );
    }

    // ---- Test 4: repeat validation passes on a real fixture ----
    #[test]
    fn repeated_runs_are_deterministic() {
        let fixture = two_mo_fixture(5_000, 9_000);
        let result =
            validate_determinism(&fixture.model, &SchedulingPolicy::default(), 0, 3)
                .expect("valid policy");
        assert!(result.is_deterministic);
        assert!(result.diverged_at.is_none());
    }
}
