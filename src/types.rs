// src/types.rs

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Boxed future used at the trait seams (transport, probes, network env).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The two remote actions a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CheckIn,
    CheckOut,
}

impl Action {
    /// Value sent in the action request body (`{type: 1|2}`).
    pub fn code(self) -> i64 {
        match self {
            Action::CheckIn => 1,
            Action::CheckOut => 2,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::CheckIn => f.write_str("check-in"),
            Action::CheckOut => f.write_str("check-out"),
        }
    }
}
