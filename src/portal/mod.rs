// src/portal/mod.rs

//! Talking to the remote portal.
//!
//! - [`transport`] defines the [`PortalTransport`] seam the session and the
//!   executor use, so tests can script the portal without a network.
//! - [`http`] is the production implementation on top of `reqwest` with a
//!   shared cookie jar.
//! - [`cookies`] is the serializable cookie record handed to persistence.

pub mod cookies;
pub mod http;
pub mod transport;

pub use cookies::Cookie;
pub use http::HttpPortal;
pub use transport::{PortalResponse, PortalTransport};
