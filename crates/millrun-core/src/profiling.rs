//! Run counters, compiled out unless the `profiling` feature is on.
//!
//! The counters ride on the run context instead of living in scattered
//! conditional blocks; with the feature off every bump is a no-op the
//! optimizer removes.

/// What is being counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    EventsProcessed,
    PlacementAttempts,
    Placements,
    RetriesArmed,
    Splits,
    BatchJoins,
}

/// Per-run counter block.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub events_processed: u64,
    pub placement_attempts: u64,
    pub placements: u64,
    pub retries_armed: u64,
    pub splits: u64,
    pub batch_joins: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn bump(&mut self, which: Counter) {
        #[cfg(feature = "profiling")]
        {
            match which {
                Counter::EventsProcessed => self.events_processed += 1,
                Counter::PlacementAttempts => self.placement_attempts += 1,
                Counter::Placements => self.placements += 1,
                Counter::RetriesArmed => self.retries_armed += 1,
                Counter::Splits => self.splits += 1,
                Counter::BatchJoins => self.batch_joins += 1,
            }
        }
        #[cfg(not(feature = "profiling"))]
        {
            let _ = which;
        }
    }
}

#[cfg(all(test, feature = "profiling"))]
mod tests {
    use super::*;

    #[test]
    fn bump_counts() {
        let mut c = Counters::new();
        c.bump(Counter::EventsProcessed);
        c.bump(Counter::EventsProcessed);
        c.bump(Counter::Placements);
        assert_eq!(c.events_processed, 2);
        assert_eq!(c.placements, 1);
    }
}
