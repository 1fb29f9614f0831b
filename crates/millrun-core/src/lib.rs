//! Millrun Core -- a deterministic discrete-event scheduler for production
//! plants.
//!
//! This crate simulates the placement of manufacturing-order work onto
//! finite-capacity resources: an event queue drives operation releases,
//! per-resource dispatchers rank ready work, and a placement engine commits
//! time blocks while honoring materials, batching, connectors, cleanouts,
//! and resource compatibility. Identical input always produces an identical
//! schedule.
//!
//! # Run Loop
//!
//! Each call to [`engine::Engine::run`] drives the simulation as follows:
//!
//! 1. **Seed** -- Queue a release event per manufacturing order at its
//!    earliest release time, plus resource online transitions.
//! 2. **Drain** -- Pop every event at the minimum time and apply it to
//!    readiness, dispatcher, and material state.
//! 3. **Dispatch** -- Give every resource with ready work one placement
//!    attempt, in score order under the configured dispatch rule.
//! 4. **Commit or defer** -- A successful attempt commits blocks and fans
//!    out notifications (successor releases, retries, freed storage);
//!    a failed attempt arms a typed retry event in the future.
//! 5. **Advance** -- The clock moves to the next event time. The run ends
//!    when the queue drains or the horizon is reached.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- Run lifecycle: forward, incremental, and move
//!   simulation over a [`model::PlantModel`].
//! - [`model::PlantModel`] -- Arena-backed plant: resources, orders, paths,
//!   operations, warehouses, connectors, and per-run state.
//! - [`policy::SchedulingPolicy`] -- Planner knobs: dispatch rule, horizon,
//!   auto-split bounds, batching, retry correction.
//! - [`placement::PlacementOutcome`] -- Exhaustive result of one placement
//!   attempt; every failure names its retry condition.
//! - [`dispatch::DispatchRule`] -- Scoring trait with the built-in rules.
//! - [`hooks::CustomizationHook`] -- Per-activity veto/defer/split hooks.
//! - [`query`] -- Read-only schedule snapshots per resource and per MO.
//! - [`fixed::Qty`] -- Q32.32 fixed-point quantity for deterministic math.

pub mod activity;
pub mod autosplit;
pub mod batch;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod fixed;
pub mod hooks;
pub mod id;
pub mod material;
pub mod model;
pub mod notify;
pub mod order;
pub mod placement;
pub mod policy;
pub mod profiling;
pub mod query;
pub mod queue;
pub mod readiness;
pub mod resource;
#[cfg(feature = "scenario-loader")]
pub mod scenario;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
