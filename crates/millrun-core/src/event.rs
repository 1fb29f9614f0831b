//! Typed simulation events.
//!
//! Every logical "wait" in the engine is a future event carrying enough
//! state to resume processing: there are no suspensions, threads or async
//! tasks. Events are created by readiness propagation, placement failures
//! and the post-commit cascade, and owned by the queue until dequeued.

use crate::id::{ActivityId, ConnectorId, ItemId, MoId, OperationId, ResourceId, WarehouseId};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A simulation event payload. The timestamp lives in the queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    // -- Release propagation --
    ReleaseMo {
        mo: MoId,
    },
    ReleaseOperation {
        op: OperationId,
    },
    PredecessorAvailable {
        op: OperationId,
        predecessor: OperationId,
    },
    HoldExpired {
        op: OperationId,
    },

    // -- Material --
    MaterialAvailable {
        item: ItemId,
    },

    // -- Resource availability --
    ResourceOnline {
        resource: ResourceId,
    },
    ResourceOffline {
        resource: ResourceId,
    },
    CleanoutBoundary {
        resource: ResourceId,
    },
    ConnectorFreed {
        connector: ConnectorId,
    },
    StorageFreed {
        warehouse: WarehouseId,
    },

    // -- Retry timers --
    RetryPlacement {
        resource: ResourceId,
        activity: ActivityId,
    },
}

/// Discriminant tag for event types, used for counters and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ReleaseMo,
    ReleaseOperation,
    PredecessorAvailable,
    HoldExpired,
    MaterialAvailable,
    ResourceOnline,
    ResourceOffline,
    CleanoutBoundary,
    ConnectorFreed,
    StorageFreed,
    RetryPlacement,
}

impl SimEvent {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            SimEvent::ReleaseMo { .. } => EventKind::ReleaseMo,
            SimEvent::ReleaseOperation { .. } => EventKind::ReleaseOperation,
            SimEvent::PredecessorAvailable { .. } => EventKind::PredecessorAvailable,
            SimEvent::HoldExpired { .. } => EventKind::HoldExpired,
            SimEvent::MaterialAvailable { .. } => EventKind::MaterialAvailable,
            SimEvent::ResourceOnline { .. } => EventKind::ResourceOnline,
            SimEvent::ResourceOffline { .. } => EventKind::ResourceOffline,
            SimEvent::CleanoutBoundary { .. } => EventKind::CleanoutBoundary,
            SimEvent::ConnectorFreed { .. } => EventKind::ConnectorFreed,
            SimEvent::StorageFreed { .. } => EventKind::StorageFreed,
            SimEvent::RetryPlacement { .. } => EventKind::RetryPlacement,
        }
    }
}
