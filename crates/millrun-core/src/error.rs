//! Caller-facing validation failures.
//!
//! These are the user-correctable tier of the three error tiers: they abort
//! only the current top-level operation and carry a stable code plus
//! parameters so the surrounding system can localize them. Expected
//! scheduling outcomes (lack of capacity, material shortage, ...) are not
//! errors; they are variants of the placement/material result enums.

use crate::fixed::{Qty, Ticks};
use crate::id::{ActivityId, BatchId, MoId};

/// A validation failure with a stable error code.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Auto-split bounds are inverted or non-positive.
    #[error("invalid split parameters: min {min} exceeds max {max}")]
    InvalidSplitParams { min: Qty, max: Qty },

    /// A disabled feature was required to satisfy the request.
    #[error("feature disabled: {feature}")]
    FeatureDisabled { feature: &'static str },

    /// A manufacturing order has no path that can ever release.
    #[error("no satisfiable path for manufacturing order {mo:?}")]
    UnsatisfiablePath { mo: MoId },

    /// A batch join request violated code/shape/capacity rules the caller
    /// had already been told about.
    #[error("inconsistent join of activity {activity:?} into batch {batch:?}")]
    InconsistentJoin {
        batch: BatchId,
        activity: ActivityId,
    },

    /// An event was pushed with a time earlier than the simulation clock
    /// outside bulk-insertion mode.
    #[error("event at {event_time} is earlier than clock {clock}")]
    EventOrderViolation { event_time: Ticks, clock: Ticks },

    /// The queue was used in a state that does not permit the operation.
    #[error("event queue is in state {state} which does not allow {operation}")]
    QueueState {
        state: &'static str,
        operation: &'static str,
    },

    /// A referenced entity is not present in the model arenas.
    #[error("unknown {what}")]
    UnknownEntity { what: &'static str },
}

impl ValidationError {
    /// Stable code for localization and reporting.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidSplitParams { .. } => "MR-1001",
            ValidationError::FeatureDisabled { .. } => "MR-1002",
            ValidationError::UnsatisfiablePath { .. } => "MR-1003",
            ValidationError::InconsistentJoin { .. } => "MR-1004",
            ValidationError::EventOrderViolation { .. } => "MR-1005",
            ValidationError::QueueState { .. } => "MR-1006",
            ValidationError::UnknownEntity { .. } => "MR-1007",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;

    #[test]
    fn codes_are_stable() {
        let err = ValidationError::InvalidSplitParams {
            min: qty(5.0),
            max: qty(1.0),
        };
        assert_eq!(err.code(), "MR-1001");

        let err = ValidationError::EventOrderViolation {
            event_time: 5,
            clock: 10,
        };
        assert_eq!(err.code(), "MR-1005");
    }

    #[test]
    fn display_carries_parameters() {
        let err = ValidationError::EventOrderViolation {
            event_time: 5,
            clock: 10,
        };
        let text = err.to_string();
        assert!(text.contains('5'));
        assert!(text.contains("10"));
    }
}
