//! The time-ordered event queue and the simulation clock.
//!
//! Earliest time first; ties broken by a stable insertion order so repeated
//! runs over unchanged input are reproducible. A bulk-insertion mode exists
//! for seeding thousands of events before processing begins, heapifying
//! once instead of paying O(n log n) incremental inserts.
//!
//! State machine: Idle -> BulkInsert -> Draining -> Drained. Outside bulk
//! mode, pushing an event timestamped earlier than the clock is an ordering
//! violation: the clock never moves backwards.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::ValidationError;
use crate::event::SimEvent;
use crate::fixed::Ticks;

// ---------------------------------------------------------------------------
// Queue state
// ---------------------------------------------------------------------------

/// Lifecycle of the queue across one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    BulkInsert,
    Draining,
    Drained,
}

impl QueueState {
    fn name(self) -> &'static str {
        match self {
            QueueState::Idle => "Idle",
            QueueState::BulkInsert => "BulkInsert",
            QueueState::Draining => "Draining",
            QueueState::Drained => "Drained",
        }
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    time: Ticks,
    seq: u64,
    event: SimEvent,
}

// Min-heap by (time, seq): BinaryHeap is a max-heap, so reverse the order.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.time, other.seq).cmp(&(self.time, self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Entry {}

// ---------------------------------------------------------------------------
// EventQueue
// ---------------------------------------------------------------------------

/// The event queue driving a monotonically non-decreasing clock.
#[derive(Debug)]
pub struct EventQueue {
    heap: BinaryHeap<Entry>,
    bulk: Vec<Entry>,
    state: QueueState,
    clock: Ticks,
    next_seq: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            bulk: Vec::new(),
            state: QueueState::Idle,
            clock: 0,
            next_seq: 0,
        }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    /// The current simulation clock: the time of the last popped batch.
    pub fn clock(&self) -> Ticks {
        self.clock
    }

    pub fn len(&self) -> usize {
        self.heap.len() + self.bulk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty() && self.bulk.is_empty()
    }

    /// Enter bulk-insertion mode for initial seeding.
    pub fn begin_bulk(&mut self, start: Ticks) -> Result<(), ValidationError> {
        if self.state != QueueState::Idle {
            return Err(ValidationError::QueueState {
                state: self.state.name(),
                operation: "begin_bulk",
            });
        }
        self.clock = start;
        self.state = QueueState::BulkInsert;
        Ok(())
    }

    /// Leave bulk mode, heapifying all seeded events at once.
    pub fn end_bulk(&mut self) -> Result<(), ValidationError> {
        if self.state != QueueState::BulkInsert {
            return Err(ValidationError::QueueState {
                state: self.state.name(),
                operation: "end_bulk",
            });
        }
        self.heap = BinaryHeap::from(std::mem::take(&mut self.bulk));
        self.state = QueueState::Draining;
        Ok(())
    }

    /// Add an event. Outside bulk mode an event timestamped earlier than
    /// the clock is rejected as an ordering violation.
    pub fn push(&mut self, time: Ticks, event: SimEvent) -> Result<(), ValidationError> {
        let seq = self.next_seq;
        self.next_seq += 1;
        match self.state {
            QueueState::BulkInsert => {
                self.bulk.push(Entry { time, seq, event });
                Ok(())
            }
            QueueState::Draining | QueueState::Drained => {
                if time < self.clock {
                    debug_assert!(
                        time >= self.clock,
                        "event at {time} pushed behind clock {}",
                        self.clock
                    );
                    tracing::warn!(time, clock = self.clock, "event behind clock rejected");
                    return Err(ValidationError::EventOrderViolation {
                        event_time: time,
                        clock: self.clock,
                    });
                }
                self.heap.push(Entry { time, seq, event });
                self.state = QueueState::Draining;
                Ok(())
            }
            QueueState::Idle => Err(ValidationError::QueueState {
                state: self.state.name(),
                operation: "push",
            }),
        }
    }

    /// Time of the earliest pending event.
    pub fn peek_min_time(&self) -> Option<Ticks> {
        self.heap.peek().map(|e| e.time)
    }

    /// Pop every event sharing the minimum time, in stable insertion order,
    /// advancing the clock to that time. Returns an empty vec when drained.
    pub fn pop_batch(&mut self) -> Vec<SimEvent> {
        let Some(first) = self.heap.pop() else {
            self.state = QueueState::Drained;
            return Vec::new();
        };
        let time = first.time;
        debug_assert!(time >= self.clock, "clock would move backwards");
        self.clock = time;

        let mut batch = vec![first.event];
        while let Some(next) = self.heap.peek() {
            if next.time != time {
                break;
            }
            // Heap pop order already follows (time, seq).
            batch.push(self.heap.pop().map(|e| e.event).unwrap_or_else(|| {
                unreachable!("peeked entry vanished");
            }));
        }
        if self.heap.is_empty() {
            self.state = QueueState::Drained;
        }
        batch
    }
}

// ===========================================================================
// Tests
// ===========================================================================
