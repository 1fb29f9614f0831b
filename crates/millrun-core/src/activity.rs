//! Activities: the units actually placed on resources.
//!
//! Activities are per-run entities: they are created when an operation
//! releases (or when the auto-split engine partitions an existing activity)
//! and discarded with the run. The `seq` field captures creation order and
//! is the final dispatch tie-break, so slotmap key reuse can never perturb
//! determinism.

use crate::fixed::{Qty, Ticks};
use crate::id::{ActivityId, BatchId, ConnectorId, OperationId, ResourceId};

// ---------------------------------------------------------------------------
// Production status
// ---------------------------------------------------------------------------

/// Where the activity is in its production lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProductionStatus {
    #[default]
    Queued,
    InSetup,
    Running,
    PostProcessing,
    Finished,
}

// ---------------------------------------------------------------------------
// Scheduled span
// ---------------------------------------------------------------------------

/// The committed time structure of a placed activity on its primary resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSpan {
    pub resource: ResourceId,
    /// Start of the first block (clean-before or setup).
    pub start: Ticks,
    pub run_start: Ticks,
    pub run_end: Ticks,
    pub post_end: Ticks,
    /// End of the last block (storage or clean-after).
    pub end: Ticks,
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// A schedulable unit of an operation's work, possibly one of several splits.
#[derive(Debug, Clone)]
pub struct Activity {
    pub operation: OperationId,
    /// Creation order within the run; the deterministic tie-break.
    pub seq: u64,
    pub required_qty: Qty,
    pub status: ProductionStatus,
    pub scheduled: Option<ScheduledSpan>,
    /// Scheduled-activity counter value, assigned at commit.
    pub ordinal: Option<u64>,
    /// Batch membership per resource requirement. At most one per
    /// requirement at any time.
    pub batches: Vec<Option<BatchId>>,
    /// Resource each requirement resolved to at commit (0 = primary).
    pub resources: Vec<Option<ResourceId>>,
    /// Left/right neighbor batches per requirement for single-tasking
    /// sequential continuity. Pointers, not ownership.
    pub left: Vec<Option<BatchId>>,
    pub right: Vec<Option<BatchId>>,
    /// Dispatchers this activity currently sits in. At most one entry per
    /// resource.
    pub in_dispatchers: Vec<ResourceId>,
    /// Dispatchers remembered while the activity waits on material, so
    /// membership can be restored exactly.
    pub suspended_dispatchers: Vec<ResourceId>,
    /// Earliest time placement may start.
    pub release_time: Ticks,
    /// Set when the activity is being moved by an explicit edit.
    pub moved: bool,
    /// Original scheduled start before the move, for move-order dispatch.
    pub original_start: Option<Ticks>,
    /// The activity this one was split off from, if any.
    pub split_parent: Option<ActivityId>,
    /// Connector used to reach the placed resource, if any.
    pub arrived_via: Option<ConnectorId>,
    /// Clean span that must follow a run truncated by a cleanout boundary.
    pub clean_after: Option<Ticks>,
}

impl Activity {
    pub fn new(operation: OperationId, seq: u64, required_qty: Qty, n_requirements: usize) -> Self {
        Self {
            operation,
            seq,
            required_qty,
            status: ProductionStatus::Queued,
            scheduled: None,
            ordinal: None,
            batches: vec![None; n_requirements],
            resources: vec![None; n_requirements],
            left: vec![None; n_requirements],
            right: vec![None; n_requirements],
            in_dispatchers: Vec::new(),
            suspended_dispatchers: Vec::new(),
            release_time: 0,
            moved: false,
            original_start: None,
            split_parent: None,
            arrived_via: None,
            clean_after: None,
        }
    }

    pub fn is_placed(&self) -> bool {
        self.scheduled.is_some()
    }
}
