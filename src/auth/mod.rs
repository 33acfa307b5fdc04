// src/auth/mod.rs

//! Authenticated portal session.
//!
//! - [`page`] reads login responses and authenticated pages.
//! - [`session`] is the session state machine (login, keep-alive,
//!   verification, lockout).

pub mod page;
pub mod session;

pub use page::{LoginPage, PageClassifier, SessionPage};
pub use session::{AuthSession, KeepAlive, SessionStatus};
