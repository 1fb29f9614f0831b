//! Customization and observer hook points.
//!
//! The engine executes policy but never decides it: the surrounding system
//! can veto or defer placements, override split quantities, adjust release
//! times, and observe progress. Every hook has a no-op default so plain
//! runs need no wiring.

use crate::fixed::{Qty, Ticks};
use crate::id::{ActivityId, OperationId, ResourceId};
use crate::model::PlantModel;

/// A business-level answer to "may this happen".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVerdict {
    Allow,
    /// Reject and retry no earlier than the given time.
    Defer(Ticks),
    /// Reject permanently for this run.
    Reject,
}

/// Hook points queried during placement. Implementations must not mutate
/// simulation state; they answer questions.
pub trait CustomizationHook {
    /// Queried before any capacity work for a candidate.
    fn is_schedulable(&mut self, _model: &PlantModel, _activity: ActivityId) -> HookVerdict {
        HookVerdict::Allow
    }

    /// May override an auto-split keep quantity. `None` keeps the engine's
    /// computed value.
    fn split(
        &mut self,
        _model: &PlantModel,
        _activity: ActivityId,
        _engine_keep: Qty,
    ) -> Option<Qty> {
        None
    }

    /// May push an activity's release later (never earlier).
    fn adjust_activity_release(
        &mut self,
        _model: &PlantModel,
        _activity: ActivityId,
        release: Ticks,
    ) -> Ticks {
        release
    }

    /// Queried per candidate resource before capacity computation.
    fn can_schedule_on_resource(
        &mut self,
        _model: &PlantModel,
        _activity: ActivityId,
        _resource: ResourceId,
    ) -> HookVerdict {
        HookVerdict::Allow
    }

    /// Notified after an operation's last activity commits.
    fn operation_scheduled(&mut self, _model: &PlantModel, _operation: OperationId) {}
}

/// Progress callbacks for the run as a whole.
pub trait RunObserver {
    fn activity_scheduled(&mut self, _model: &PlantModel, _activity: ActivityId) {}

    /// Called every `progress_every` committed placements.
    fn progress(&mut self, _scheduled: u64, _clock: Ticks) {}

    fn scheduling_complete(&mut self, _scheduled: u64, _clock: Ticks) {}
}

/// Hook that allows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl CustomizationHook for NoopHook {}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}
