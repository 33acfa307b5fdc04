// src/exec/mod.rs

//! Performing remote actions.
//!
//! - [`executor`]: one check-in/check-out for one task, with retries.
//! - [`classify`]: reading the portal's JSON answer.
//! - [`throttle`]: request spacing and retry backoff.

pub mod classify;
pub mod executor;
pub mod throttle;

pub use classify::{ActionResponse, MarkerClassifier, ResponseClassifier};
pub use executor::{ActionExecutor, ActionOutcome};
pub use throttle::Throttle;
