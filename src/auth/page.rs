// src/auth/page.rs

//! Marker-based reading of portal HTML.

use regex::Regex;

use crate::config::LoginMarkers;
use crate::errors::{PunchclockError, Result};
use crate::portal::PortalResponse;

/// What a login response says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginPage {
    /// Logged in. `user` is the name from the welcome fragment, if found.
    Authenticated { user: Option<String> },
    BadCredentials,
    ServerError(String),
    Unrecognized,
}

/// What an authenticated page (keep-alive, verification) says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPage {
    Authenticated,
    Expired,
    Ambiguous,
}

#[derive(Debug, Clone)]
pub struct PageClassifier {
    welcome: Regex,
    markers: LoginMarkers,
}

impl PageClassifier {
    pub fn new(markers: &LoginMarkers) -> Result<Self> {
        let welcome = Regex::new(&markers.welcome_pattern).map_err(|e| {
            PunchclockError::ConfigError(format!("welcome_pattern is not a valid regex: {e}"))
        })?;
        Ok(Self {
            welcome,
            markers: markers.clone(),
        })
    }

    pub fn classify_login(&self, resp: &PortalResponse) -> LoginPage {
        if !resp.is_success() {
            return LoginPage::ServerError(format!("HTTP {}", resp.status));
        }
        let body = resp.body.as_str();

        let status_marker = self.markers.status_marker.as_str();
        if let Some(pos) = body.find(status_marker).filter(|_| !status_marker.is_empty()) {
            let status = &body[pos + status_marker.len()..];
            if let Some(user) = self.welcome_user(status) {
                return LoginPage::Authenticated { user: Some(user) };
            }
            if let Some(err) = self.error_redirect(body) {
                return err;
            }
            // Status area present but its wording changed.
            return LoginPage::Authenticated { user: None };
        }

        if let Some(err) = self.error_redirect(body) {
            return err;
        }
        LoginPage::Unrecognized
    }

    pub fn classify_session(&self, resp: &PortalResponse) -> SessionPage {
        if !resp.is_success() {
            return SessionPage::Expired;
        }
        let body = resp.body.as_str();
        let found = |m: &str| !m.is_empty() && body.contains(m);
        let has = |markers: &[String]| markers.iter().any(|m| found(m.as_str()));

        let strong_login = self.markers.logged_in.first().is_some_and(|m| found(m.as_str()))
            && found(self.markers.status_marker.as_str())
            && self.welcome.is_match(body);
        if strong_login {
            return SessionPage::Authenticated;
        }
        if has(&self.markers.login_form) || has(&self.markers.logged_out) {
            return SessionPage::Expired;
        }
        if has(&self.markers.logged_in) {
            return SessionPage::Authenticated;
        }
        SessionPage::Ambiguous
    }

    fn welcome_user(&self, text: &str) -> Option<String> {
        self.welcome
            .captures(text)?
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .filter(|u| !u.is_empty())
    }

    fn error_redirect(&self, body: &str) -> Option<LoginPage> {
        let marker = self.markers.error_redirect.as_str();
        if marker.is_empty() || !body.contains(marker) {
            return None;
        }
        let bad = self
            .markers
            .bad_credential_codes
            .iter()
            .any(|code| !code.is_empty() && body.contains(code.as_str()));
        Some(if bad {
            LoginPage::BadCredentials
        } else {
            LoginPage::ServerError("portal redirected to its error page".to_string())
        })
    }
}
