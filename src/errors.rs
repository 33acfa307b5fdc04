// src/errors.rs

//! Crate-wide error aliases and helpers.

use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PunchclockError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Route probe error: {0}")]
    ProbeError(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why an authentication attempt did not produce an active session.
///
/// Only [`AuthError::BadCredentials`] counts toward the lockout counter;
/// everything else is either terminal configuration trouble or retryable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("username or password not configured")]
    MissingCredentials,

    #[error("portal rejected the credentials")]
    BadCredentials,

    #[error("login locked until {until}")]
    Locked { until: NaiveDateTime },

    #[error("portal reported a server error: {0}")]
    ServerError(String),

    #[error("login response could not be classified")]
    Unrecognized,

    #[error("transport failure: {0}")]
    Transport(String),
}

impl AuthError {
    /// Network trouble and unparsable pages are worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::ServerError(_) | AuthError::Unrecognized | AuthError::Transport(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PunchclockError>;
