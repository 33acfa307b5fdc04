// src/engine/mod.rs

//! Scheduling engine for punchclock.
//!
//! This module ties together:
//! - the per-tick [`Scheduler`] (gate, session, repair, execution)
//! - the sequence repair planner
//! - the status events handed to the presentation layer
//! - the [`Runtime`] loop that sleeps, persists and reacts to shutdown
//!
//! Task semantics live in [`scheduler`] and [`repair`]; the async/IO shell
//! is implemented in [`runtime`].

/// Runtime options for the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Stop after one tick (used for `run --once`).
    pub exit_after_tick: bool,
}

pub mod events;
pub mod repair;
pub mod runtime;
pub mod scheduler;
pub mod stats;

pub use events::{EventSink, RepairKind, SharedSink, StatusEvent, TaskRef, TracingSink};
pub use repair::RepairAction;
pub use runtime::Runtime;
pub use scheduler::{Scheduler, TickReport};
pub use stats::SchedulerStats;
