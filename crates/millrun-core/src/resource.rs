//! Resources: capacity intervals, committed blocks, connectors and rules.
//!
//! A `Resource` is long-lived configuration; the matching `ResourceState`
//! holds everything a single run mutates (committed blocks, cleanout
//! accounting, reservations) and is reset between runs. Connectors follow
//! the same split.

use crate::fixed::{Qty, Ticks};
use crate::id::{ActivityId, BatchId, CompatCode, ResourceId};

// ---------------------------------------------------------------------------
// Capacity model
// ---------------------------------------------------------------------------

/// How many activities a resource can carry at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CapacityKind {
    /// Exactly one committed block at a time.
    SingleTasking,
    /// Up to `attention` simultaneous blocks.
    MultiTasking { attention: u32 },
    /// Unlimited simultaneous blocks.
    Infinite,
}

/// A half-open online window `[start, end)`. Windows are sorted and disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CapacityInterval {
    pub start: Ticks,
    pub end: Ticks,
}

/// Batch fill limit: percent of the resource volume, or an absolute volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BatchLimit {
    /// Maximum fill as a percentage (0..=100) of the resource volume.
    Percent { max_fill: u32 },
    /// Maximum combined quantity per batch.
    Volume { max: Qty },
}

/// Cleanout rule: after `max_run` accumulated run ticks the resource must
/// be cleaned for `clean_span` ticks before further runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CleanoutRule {
    pub max_run: Ticks,
    pub clean_span: Ticks,
}

/// A capacity-bearing asset.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Resource {
    pub name: String,
    pub capacity: CapacityKind,
    pub online: Vec<CapacityInterval>,
    /// Maximum quantity a single activity may carry on this resource.
    pub max_volume: Option<Qty>,
    /// Smallest quantity an auto-split may leave placeable here.
    pub min_qty: Qty,
    /// Largest quantity a single placement may carry here.
    pub max_qty: Option<Qty>,
    pub batch_limit: Option<BatchLimit>,
    pub cleanout: Option<CleanoutRule>,
    /// Accepted compatibility codes. Empty accepts every code.
    pub compat: Vec<CompatCode>,
}

impl Resource {
    /// Whether an operation with the given compatibility code may run here.
    pub fn accepts(&self, code: Option<CompatCode>) -> bool {
        match code {
            None => true,
            Some(c) => self.compat.is_empty() || self.compat.contains(&c),
        }
    }

    /// Start of the first online window whose end is after `from`.
    pub fn next_online_at(&self, from: Ticks) -> Option<Ticks> {
        self.online
            .iter()
            .find(|w| w.end > from)
            .map(|w| w.start.max(from))
    }

    /// Whether `[start, end)` lies fully inside one online window.
    pub fn is_online_span(&self, start: Ticks, end: Ticks) -> bool {
        self.online
            .iter()
            .any(|w| w.start <= start && end <= w.end)
    }
}

// ---------------------------------------------------------------------------
// Committed blocks
// ---------------------------------------------------------------------------

/// What a committed block occupies the resource for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BlockKind {
    Setup,
    CleanBefore,
    Run,
    PostProcess,
    Storage,
    CleanAfter,
}

/// A committed time-window allocation on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub activity: ActivityId,
    pub batch: Option<BatchId>,
    pub kind: BlockKind,
    pub start: Ticks,
    pub end: Ticks,
}

impl Block {
    pub fn overlaps(&self, start: Ticks, end: Ticks) -> bool {
        self.start < end && start < self.end
    }
}

// ---------------------------------------------------------------------------
// Window search result
// ---------------------------------------------------------------------------

/// Outcome of an earliest-window search on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSearch {
    /// A window of the requested duration starts at `start`.
    Found { start: Ticks },
    /// Committed blocks pushed the candidate past every online window.
    /// `retry_at` is the earliest block end that unblocked a candidate.
    Busy { retry_at: Ticks },
    /// No online window of the requested duration exists at or after the
    /// requested time.
    NoWindow,
}

// ---------------------------------------------------------------------------
// Per-run resource state
// ---------------------------------------------------------------------------

/// Per-run mutable state of one resource.
#[derive(Debug, Clone, Default)]
pub struct ResourceState {
    /// Committed blocks, sorted by start.
    pub blocks: Vec<Block>,
    /// Accumulated run ticks since the last cleanout.
    pub run_since_clean: Ticks,
    /// Exclusivity flag while one placement attempt holds the resource.
    /// Cleared immediately on failure or success.
    pub reserved_for: Option<ActivityId>,
    /// Whether the resource participates in dispatching this run.
    pub stage_enabled: bool,
    /// A window reserved for an in-flight move that opportunistic
    /// placements may not intersect.
    pub move_window: Option<(Ticks, Ticks)>,
}

impl ResourceState {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            run_since_clean: 0,
            reserved_for: None,
            stage_enabled: true,
            move_window: None,
        }
    }

    /// Insert a block keeping the list sorted by start.
    pub fn insert_block(&mut self, block: Block) {
        let at = self
            .blocks
            .partition_point(|b| (b.start, b.end) <= (block.start, block.end));
        self.blocks.insert(at, block);
    }

    /// Remove every block belonging to `activity`. Returns how many.
    pub fn remove_blocks_of(&mut self, activity: ActivityId) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|b| b.activity != activity);
        before - self.blocks.len()
    }

    /// Number of blocks overlapping `[start, end)`.
    pub fn overlap_count(&self, start: Ticks, end: Ticks) -> u32 {
        self.blocks
            .iter()
            .filter(|b| b.overlaps(start, end))
            .count() as u32
    }

    /// Earliest start of a `duration`-tick window at or after `from` that is
    /// fully online and within the resource's capacity kind.
    pub fn earliest_window(
        &self,
        resource: &Resource,
        from: Ticks,
        duration: Ticks,
    ) -> WindowSearch {
        let limit = match resource.capacity {
            CapacityKind::SingleTasking => 1,
            CapacityKind::MultiTasking { attention } => attention.max(1),
            CapacityKind::Infinite => {
                // Only online windows constrain an infinite resource.
                for w in &resource.online {
                    let start = from.max(w.start);
                    if start + duration <= w.end {
                        return WindowSearch::Found { start };
                    }
                }
                return WindowSearch::NoWindow;
            }
        };

        let mut first_bump: Option<Ticks> = None;
        for w in &resource.online {
            if w.end <= from || w.end - w.start < duration {
                continue;
            }
            let mut candidate = from.max(w.start);
            while candidate + duration <= w.end {
                let busy: Vec<&Block> = self
                    .blocks
                    .iter()
                    .filter(|b| b.overlaps(candidate, candidate + duration))
                    .collect();
                if (busy.len() as u32) < limit {
                    return WindowSearch::Found { start: candidate };
                }
                // Bump past the earliest-ending conflicting block.
                let bump = busy.iter().map(|b| b.end).min().unwrap_or(w.end);
                if first_bump.is_none() {
                    first_bump = Some(bump);
                }
                if bump <= candidate {
                    break;
                }
                candidate = bump;
            }
        }

        match first_bump {
            Some(retry_at) => WindowSearch::Busy { retry_at },
            None => WindowSearch::NoWindow,
        }
    }

    /// Longest open stretch starting at or after `from` on a
    /// single-tasking resource, as (start, length). Used to size a
    /// window-fit split; other capacity kinds report nothing.
    pub fn widest_window(&self, resource: &Resource, from: Ticks) -> Option<(Ticks, Ticks)> {
        if !matches!(resource.capacity, CapacityKind::SingleTasking) {
            return None;
        }
        let mut best: Option<(Ticks, Ticks)> = None;
        let mut note = |start: Ticks, len: Ticks| {
            if len > 0 && best.is_none_or(|(_, l)| len > l) {
                best = Some((start, len));
            }
        };
        for w in &resource.online {
            if w.end <= from {
                continue;
            }
            let lo = from.max(w.start);
            let mut busy: Vec<(Ticks, Ticks)> = self
                .blocks
                .iter()
                .filter(|b| b.end > lo && b.start < w.end)
                .map(|b| (b.start, b.end))
                .collect();
            busy.sort_unstable();
            let mut cursor = lo;
            for (s, e) in busy {
                if s > cursor {
                    note(cursor, s - cursor);
                }
                cursor = cursor.max(e);
            }
            if w.end > cursor {
                note(cursor, w.end - cursor);
            }
        }
        best
    }

    /// Drop blocks that are structurally impossible (inverted spans or
    /// spans outside every online window). Returns how many were pruned;
    /// the caller reports the anomaly.
    pub fn prune_invalid_blocks(&mut self, resource: &Resource) -> usize {
        let before = self.blocks.len();
        self.blocks
            .retain(|b| b.start < b.end && resource.is_online_span(b.start, b.end));
        before - self.blocks.len()
    }
}

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

/// A timed, capacity-limited link between two resources.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Connector {
    pub from: ResourceId,
    pub to: ResourceId,
    pub transit: Ticks,
    /// How many transfers may be in flight at once.
    pub concurrency: u32,
}

/// Per-run connector state.
#[derive(Debug, Clone, Default)]
pub struct ConnectorState {
    pub in_use: u32,
    /// Clock at which the next in-flight transfer frees a slot.
    pub free_at: Ticks,
}

impl ConnectorState {
    pub fn is_free(&self, connector: &Connector, at: Ticks) -> bool {
        self.in_use < connector.concurrency || self.free_at <= at
    }
}

// ===========================================================================
// Tests
// ===========================================================================
