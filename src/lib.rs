// src/lib.rs

pub mod app;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod network;
pub mod persist;
pub mod portal;
pub mod task;
pub mod types;

pub use app::run;
