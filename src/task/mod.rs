// src/task/mod.rs

//! Scheduled check-in/check-out tasks.
//!
//! - [`model`] defines the [`Task`] record and its lifecycle invariants.
//! - [`store`] is the in-memory collection the scheduler and manual edits
//!   mutate; persistence lives elsewhere (see `crate::persist`).

pub mod model;
pub mod store;

pub use model::{RepairMarks, Task, TaskId, parse_date, parse_time};
pub use store::{SharedTaskStore, TaskStore};
