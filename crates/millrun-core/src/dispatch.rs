//! Per-resource ready queues and dispatch scoring.
//!
//! Each resource owns one dispatcher: the set of activities eligible to
//! start now, ordered by a pluggable rule's score. Determinism: highest
//! score wins, ties broken by activity creation order. Move runs use a
//! different order so an explicitly-moved activity never loses its slot to
//! an opportunistic placement.

use slotmap::SecondaryMap;

use crate::error::ValidationError;
use crate::fixed::{Ticks, span_for};
use crate::id::{ActivityId, ResourceId};
use crate::model::PlantModel;
use crate::policy::DispatchRuleKind;

// ---------------------------------------------------------------------------
// Dispatch rules
// ---------------------------------------------------------------------------

/// Scores a ready activity. Higher scores dispatch first.
pub trait DispatchRule {
    fn name(&self) -> &'static str;
    fn score(&self, model: &PlantModel, activity: ActivityId) -> i64;
}

/// Earlier due date of the owning MO scores higher.
#[derive(Debug, Clone, Copy)]
pub struct EarliestDue;

impl DispatchRule for EarliestDue {
    fn name(&self) -> &'static str {
        "EDD"
    }

    fn score(&self, model: &PlantModel, activity: ActivityId) -> i64 {
        let op = model.activities[activity].operation;
        let due = model.mos[model.operations[op].mo].due;
        -(due.min(i64::MAX as u64) as i64)
    }
}

/// Shorter primary run span scores higher.
#[derive(Debug, Clone, Copy)]
pub struct ShortestProcessing;

impl DispatchRule for ShortestProcessing {
    fn name(&self) -> &'static str {
        "SPT"
    }

    fn score(&self, model: &PlantModel, activity: ActivityId) -> i64 {
        let act = &model.activities[activity];
        let op = &model.operations[act.operation];
        let span = span_for(act.required_qty, op.primary().run_per_unit);
        -(span.min(i64::MAX as u64) as i64)
    }
}

/// Weighted combination of due-date urgency and MO priority.
#[derive(Debug, Clone, Copy)]
pub struct PriorityWeighted {
    pub due_weight: i64,
    pub priority_weight: i64,
}

impl DispatchRule for PriorityWeighted {
    fn name(&self) -> &'static str {
        "PRIO"
    }

    fn score(&self, model: &PlantModel, activity: ActivityId) -> i64 {
        let op = model.activities[activity].operation;
        let mo = &model.mos[model.operations[op].mo];
        let due = -(mo.due.min(i64::MAX as u64) as i64);
        due.saturating_mul(self.due_weight)
            .saturating_add((mo.priority as i64).saturating_mul(self.priority_weight))
    }
}

/// Instantiate the configured rule.
pub fn rule_for(kind: &DispatchRuleKind) -> Box<dyn DispatchRule> {
    match kind {
        DispatchRuleKind::EarliestDue => Box::new(EarliestDue),
        DispatchRuleKind::ShortestProcessing => Box::new(ShortestProcessing),
        DispatchRuleKind::PriorityWeighted {
            due_weight,
            priority_weight,
        } => Box::new(PriorityWeighted {
            due_weight: *due_weight,
            priority_weight: *priority_weight,
        }),
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Which candidate ordering applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOrder {
    /// Highest score, ties by creation order.
    Normal,
    /// Moved activities first, then original scheduled start, then score.
    Move,
}

/// One entry of a resource's ready queue.
#[derive(Debug, Clone, Copy)]
pub struct DispatchEntry {
    pub activity: ActivityId,
    pub score: i64,
    pub seq: u64,
    pub moved: bool,
    pub original_start: Option<Ticks>,
}

/// A resource's ready queue of placeable activities.
#[derive(Debug, Default)]
pub struct Dispatcher {
    entries: Vec<DispatchEntry>,
    dispatching: bool,
}

impl Dispatcher {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, activity: ActivityId) -> bool {
        self.entries.iter().any(|e| e.activity == activity)
    }

    /// Bracket a scheduling attempt at the current time.
    pub fn begin_dispatch(&mut self) {
        self.dispatching = true;
    }

    pub fn end_dispatch(&mut self) {
        self.dispatching = false;
    }

    fn insert(&mut self, entry: DispatchEntry) {
        debug_assert!(
            !self.contains(entry.activity),
            "activity queued twice on one dispatcher"
        );
        self.entries.push(entry);
    }

    fn remove(&mut self, activity: ActivityId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.activity != activity);
        before != self.entries.len()
    }

    /// The best candidate under the given order, without removing it.
    pub fn best(&self, order: DispatchOrder) -> Option<DispatchEntry> {
        self.best_excluding(order, &[])
    }

    /// The best candidate not in `skip`. Used when a soft failure lets a
    /// lower-scoring candidate try in the same round.
    pub fn best_excluding(&self, order: DispatchOrder, skip: &[ActivityId]) -> Option<DispatchEntry> {
        self.entries
            .iter()
            .filter(|e| !skip.contains(&e.activity))
            .max_by(|a, b| match order {
                DispatchOrder::Normal => (a.score, std::cmp::Reverse(a.seq))
                    .cmp(&(b.score, std::cmp::Reverse(b.seq))),
                DispatchOrder::Move => {
                    // Moved first; earlier original start first; then score.
                    let key_a = (
                        a.moved,
                        std::cmp::Reverse(a.original_start.unwrap_or(Ticks::MAX)),
                        a.score,
                        std::cmp::Reverse(a.seq),
                    );
                    let key_b = (
                        b.moved,
                        std::cmp::Reverse(b.original_start.unwrap_or(Ticks::MAX)),
                        b.score,
                        std::cmp::Reverse(b.seq),
                    );
                    key_a.cmp(&key_b)
                }
            })
            .copied()
    }
}

// ---------------------------------------------------------------------------
// DispatcherSet
// ---------------------------------------------------------------------------

/// All dispatchers of a run, keyed by resource.
#[derive(Debug, Default)]
pub struct DispatcherSet {
    dispatchers: SecondaryMap<ResourceId, Dispatcher>,
}

impl DispatcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resource: ResourceId) -> Option<&Dispatcher> {
        self.dispatchers.get(resource)
    }

    pub fn get_mut(&mut self, resource: ResourceId) -> Option<&mut Dispatcher> {
        self.dispatchers.get_mut(resource)
    }

    /// Insert an activity into a resource's ready queue, maintaining the
    /// at-most-one-entry-per-resource invariant and the activity's own
    /// membership list.
    pub fn insert(
        &mut self,
        model: &mut PlantModel,
        resource: ResourceId,
        entry: DispatchEntry,
    ) -> Result<(), ValidationError> {
        let dispatcher = self
            .dispatchers
            .entry(resource)
            .ok_or(ValidationError::UnknownEntity { what: "resource" })?
            .or_default();
        if dispatcher.contains(entry.activity) {
            return Ok(());
        }
        dispatcher.insert(entry);
        let memberships = &mut model.activities[entry.activity].in_dispatchers;
        if !memberships.contains(&resource) {
            memberships.push(resource);
        }
        Ok(())
    }

    /// Remove an activity from one dispatcher.
    pub fn remove(&mut self, model: &mut PlantModel, resource: ResourceId, activity: ActivityId) {
        if let Some(d) = self.dispatchers.get_mut(resource) {
            d.remove(activity);
        }
        model.activities[activity]
            .in_dispatchers
            .retain(|&r| r != resource);
    }

    /// Remove an activity from every dispatcher. Returns the resources it
    /// was removed from, in membership order, so it can be restored later.
    pub fn remove_everywhere(
        &mut self,
        model: &mut PlantModel,
        activity: ActivityId,
    ) -> Vec<ResourceId> {
        let memberships = std::mem::take(&mut model.activities[activity].in_dispatchers);
        for &resource in &memberships {
            if let Some(d) = self.dispatchers.get_mut(resource) {
                d.remove(activity);
            }
        }
        memberships
    }

    /// Resources that currently have ready work, in deterministic order:
    /// best candidate score descending, ties by resource id.
    pub fn resources_with_work(&self, model: &PlantModel, order: DispatchOrder) -> Vec<ResourceId> {
        let mut out: Vec<(i64, ResourceId)> = self
            .dispatchers
            .iter()
            .filter(|(id, d)| {
                !d.is_empty()
                    && model
                        .resource_states
                        .get(*id)
                        .map(|s| s.stage_enabled)
                        .unwrap_or(false)
            })
            .map(|(id, d)| {
                let score = d.best(order).map(|e| e.score).unwrap_or(i64::MIN);
                (score, id)
            })
            .collect();
        out.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        out.into_iter().map(|(_, id)| id).collect()
    }

    /// Total ready entries across all dispatchers.
    pub fn total_ready(&self) -> usize {
        self.dispatchers.values().map(|d| d.len()).sum()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;
    use crate::test_utils::*;

    fn entry(activity: ActivityId, score: i64, seq: u64) -> DispatchEntry {
        DispatchEntry {
            activity,
            score,
            seq,
            moved: false,
            original_start: None,
        }
    }

    // -----------------------------------------------------------------------
    // Test 1: highest score wins
    // -----------------------------------------------------------------------
    #[test]
    fn highest_score_wins() {
        let mut fixture = two_activity_fixture();
        let (a, b) = (fixture.activities[0], fixture.activities[1]);
        let mut set = DispatcherSet::new();
        set.insert(&mut fixture.model, fixture.resource, entry(a, 5, 0))
            .unwrap();
        set.insert(&mut fixture.model, fixture.resource, entry(b, 9, 1))
            .unwrap();
        let best = set
            .get(fixture.resource)
            .unwrap()
            .best(DispatchOrder::Normal)
            .unwrap();
        assert_eq!(best.activity, b);
    }

    // -----------------------------------------------------------------------
    // Test 2: equal scores tie-break by creation order
    // -----------------------------------------------------------------------
    #[test]
    fn equal_scores_tiebreak_by_seq() {
        let mut fixture = two_activity_fixture();
        let (a, b) = (fixture.activities[0], fixture.activities[1]);
        let mut set = DispatcherSet::new();
        set.insert(&mut fixture.model, fixture.resource, entry(b, 5, 1))
            .unwrap();
        set.insert(&mut fixture.model, fixture.resource, entry(a, 5, 0))
            .unwrap();
        let best = set
            .get(fixture.resource)
            .unwrap()
            .best(DispatchOrder::Normal)
            .unwrap();
        assert_eq!(best.activity, a);
    }

    // -----------------------------------------------------------------------
    // Test 3: move order outranks score
    // -----------------------------------------------------------------------
    #[test]
    fn move_order_outranks_score() {
        let mut fixture = two_activity_fixture();
        let (a, b) = (fixture.activities[0], fixture.activities[1]);
        let mut set = DispatcherSet::new();
        set.insert(
            &mut fixture.model,
            fixture.resource,
            DispatchEntry {
                activity: a,
                score: 1,
                seq: 0,
                moved: true,
                original_start: Some(40),
            },
        )
        .unwrap();
        set.insert(&mut fixture.model, fixture.resource, entry(b, 99, 1))
            .unwrap();
        let best = set
            .get(fixture.resource)
            .unwrap()
            .best(DispatchOrder::Move)
            .unwrap();
        assert_eq!(best.activity, a);
    }

    // -----------------------------------------------------------------------
    // Test 4: duplicate insert is a no-op
    // -----------------------------------------------------------------------
    #[test]
    fn duplicate_insert_noop() {
        let mut fixture = two_activity_fixture();
        let a = fixture.activities[0];
        let mut set = DispatcherSet::new();
        set.insert(&mut fixture.model, fixture.resource, entry(a, 5, 0))
            .unwrap();
        set.insert(&mut fixture.model, fixture.resource, entry(a, 5, 0))
            .unwrap();
        assert_eq!(set.get(fixture.resource).unwrap().len(), 1);
        assert_eq!(fixture.model.activities[a].in_dispatchers.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Test 5: remove_everywhere returns memberships for restore
    // -----------------------------------------------------------------------
    #[test]
    fn remove_everywhere_remembers() {
        let mut fixture = two_activity_fixture();
        let a = fixture.activities[0];
        let mut set = DispatcherSet::new();
        set.insert(&mut fixture.model, fixture.resource, entry(a, 5, 0))
            .unwrap();
        let removed = set.remove_everywhere(&mut fixture.model, a);
        assert_eq!(removed, vec![fixture.resource]);
        assert!(set.get(fixture.resource).unwrap().is_empty());
        assert!(fixture.model.activities[a].in_dispatchers.is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 6: built-in rules order as documented
    // -----------------------------------------------------------------------
    #[test]
    fn edd_prefers_earlier_due() {
        let fixture = two_mo_fixture(10, 50);
        let rule = EarliestDue;
        let early = rule.score(&fixture.model, fixture.activities[0]);
        let late = rule.score(&fixture.model, fixture.activities[1]);
        assert!(early > late);
    }

    #[test]
    fn spt_prefers_shorter_run() {
        let mut fixture = two_activity_fixture();
        fixture.model.activities[fixture.activities[0]].required_qty = qty(2.0);
        fixture.model.activities[fixture.activities[1]].required_qty = qty(8.0);
        let rule = ShortestProcessing;
        let short = rule.score(&fixture.model, fixture.activities[0]);
        let long = rule.score(&fixture.model, fixture.activities[1]);
        assert!(short > long);
    }
}
