// src/config/mod.rs

//! Settings loading and validation for punchclock.
//!
//! Responsibilities:
//! - Define the TOML-backed settings model (`model.rs`).
//! - Load a settings file from disk (`loader.rs`).
//! - Validate basic invariants like threshold ordering and CIDR syntax
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_and_validate};
pub use model::{
    ExecutorSection, LoginForm, LoginMarkers, NetworkSection, PortalSection, RawSettings,
    RepairSection, ResponseMarkers, ScheduleSection, SessionSection, Settings,
};
