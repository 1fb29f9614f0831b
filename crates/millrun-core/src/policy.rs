//! Scheduling policy configuration.
//!
//! The engine executes policy; it never decides it. Everything a planner can
//! tune (dispatch rule, batching thresholds, auto-split bounds, progress
//! frequency, retry-time correction) lives here and is threaded through the
//! run context, created fresh per run.

use crate::error::ValidationError;
use crate::fixed::{Qty, Ticks};

// ---------------------------------------------------------------------------
// Dispatch rule selection
// ---------------------------------------------------------------------------

/// Which built-in dispatch rule scores ready activities.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum DispatchRuleKind {
    /// Earlier due date of the owning MO scores higher.
    EarliestDue,
    /// Shorter primary run span scores higher.
    ShortestProcessing,
    /// Weighted combination of due-date urgency and MO priority.
    PriorityWeighted { due_weight: i64, priority_weight: i64 },
}

// ---------------------------------------------------------------------------
// Retry-time correction
// ---------------------------------------------------------------------------

/// Correction applied to capacity-derived retry times.
///
/// Some failure paths approximate the next feasible time by subtracting an
/// estimated setup span from a capacity-derived time. The exact factor is
/// architecture-specific, so it is configuration rather than a formula in
/// the engine. The factor is a rational to keep the sim loop float-free.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum SetupCorrection {
    /// Use capacity-derived retry times unmodified.
    None,
    /// Subtract `numerator / denominator` of the setup span from the
    /// computed retry time.
    EstimatedSetup { numerator: u32, denominator: u32 },
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// All planner-supplied knobs for one simulation run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulingPolicy {
    /// Dispatch rule used to score ready activities.
    pub rule: DispatchRuleKind,

    /// Planning horizon. Events past this time end the run.
    pub horizon: Ticks,

    /// Progress callback frequency, in processed events. 0 disables ticks.
    pub progress_every: u64,

    /// Whether the auto-split engine may partition activities.
    pub auto_split: bool,

    /// Smallest quantity an auto-split may produce.
    pub min_split_qty: Qty,

    /// Largest quantity an auto-split may leave on the original activity.
    pub max_split_qty: Option<Qty>,

    /// Whether an activity that cannot join a resource's current batch may
    /// open a separate batch in the same slot region.
    pub allow_new_batch: bool,

    /// Correction applied to capacity-derived retry times.
    pub setup_correction: SetupCorrection,

    /// Abort the run once this many blocks have been committed.
    /// None means unlimited.
    pub max_committed_blocks: Option<u64>,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            rule: DispatchRuleKind::EarliestDue,
            horizon: Ticks::MAX,
            progress_every: 1024,
            auto_split: false,
            min_split_qty: Qty::from_num(1),
            max_split_qty: None,
            allow_new_batch: true,
            setup_correction: SetupCorrection::None,
            max_committed_blocks: None,
        }
    }
}

impl SchedulingPolicy {
    /// Validate the user-supplied knobs before a run starts.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(max) = self.max_split_qty
            && self.min_split_qty > max
        {
            return Err(ValidationError::InvalidSplitParams {
                min: self.min_split_qty,
                max,
            });
        }
        if self.min_split_qty <= Qty::from_num(0) {
            return Err(ValidationError::InvalidSplitParams {
                min: self.min_split_qty,
                max: self.max_split_qty.unwrap_or(Qty::MAX),
            });
        }
        Ok(())
    }

    /// Apply the setup correction to a capacity-derived retry time and
    /// guarantee forward progress. A computed retry equal to the current
    /// clock is an engine bug; it is flagged in debug builds and repaired
    /// to `clock + 1` in release builds.
    pub fn corrected_retry(&self, raw: Ticks, setup_span: Ticks, clock: Ticks) -> Ticks {
        let corrected = match &self.setup_correction {
            SetupCorrection::None => raw,
            SetupCorrection::EstimatedSetup {
                numerator,
                denominator,
            } => {
                let den = (*denominator).max(1) as u64;
                raw.saturating_sub(setup_span * *numerator as u64 / den)
            }
        };
        if corrected <= clock {
            debug_assert!(
                corrected > clock,
                "retry time {corrected} does not advance past clock {clock}"
            );
            tracing::warn!(corrected, clock, "retry time repaired to clock + 1");
            clock + 1
        } else {
            corrected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;

    #[test]
    fn default_policy_validates() {
        assert!(SchedulingPolicy::default().validate().is_ok());
    }

    #[test]
    fn inverted_split_bounds_rejected() {
        let policy = SchedulingPolicy {
            min_split_qty: qty(10.0),
            max_split_qty: Some(qty(2.0)),
            ..SchedulingPolicy::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(ValidationError::InvalidSplitParams { .. })
        ));
    }

    #[test]
    fn nonpositive_min_split_rejected() {
        let policy = SchedulingPolicy {
            min_split_qty: qty(0.0),
            ..SchedulingPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn corrected_retry_subtracts_setup_fraction() {
        let policy = SchedulingPolicy {
            setup_correction: SetupCorrection::EstimatedSetup {
                numerator: 1,
                denominator: 2,
            },
            ..SchedulingPolicy::default()
        };
        // raw 100, setup 10 -> 100 - 5 = 95
        assert_eq!(policy.corrected_retry(100, 10, 0), 95);
    }

    #[test]
    fn corrected_retry_guarantees_forward_progress() {
        let policy = SchedulingPolicy::default();
        // A retry at the clock would loop forever; release builds repair it.
        #[cfg(not(debug_assertions))]
        assert_eq!(policy.corrected_retry(50, 0, 50), 51);
        #[cfg(debug_assertions)]
        {
            let result = std::panic::catch_unwind(|| policy.corrected_retry(50, 0, 50));
            assert!(result.is_err());
        }
    }
}
