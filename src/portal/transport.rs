// src/portal/transport.rs

//! Transport abstraction over the portal's three endpoints.
//!
//! The auth session owns the transport (it is the live cookie jar); the
//! executor borrows it for action requests. Production code uses
//! [`HttpPortal`](super::HttpPortal); tests provide a scripted fake.

use crate::errors::Result;
use crate::portal::cookies::Cookie;
use crate::types::BoxFuture;

/// Status and body of one portal response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: u16,
    pub body: String,
}

impl PortalResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Truncated body for log lines.
    pub fn excerpt(&self) -> &str {
        let end = self
            .body
            .char_indices()
            .nth(200)
            .map(|(i, _)| i)
            .unwrap_or(self.body.len());
        &self.body[..end]
    }
}

/// Trait abstracting the HTTP conversation with the portal.
///
/// Errors returned here are transport failures (connect, timeout, TLS);
/// any HTTP status, including 4xx/5xx, comes back as a `PortalResponse`.
pub trait PortalTransport: Send {
    /// POST the form-encoded login body.
    fn submit_login<'a>(
        &'a mut self,
        url: &'a str,
        form: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<PortalResponse>>;

    /// GET an authenticated page.
    fn fetch_page<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, Result<PortalResponse>>;

    /// POST a JSON action body.
    fn post_action<'a>(
        &'a mut self,
        url: &'a str,
        body: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<PortalResponse>>;

    /// Cookies currently held for the portal.
    fn cookies(&self) -> Vec<Cookie>;

    /// Seed cookies, e.g. from a previous run.
    fn set_cookies(&mut self, cookies: &[Cookie]);

    /// Drop every cookie and start a fresh session.
    fn reset(&mut self) -> Result<()>;
}
