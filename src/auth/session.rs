// src/auth/session.rs

//! Session state machine.
//!
//! ```text
//! LoggedOut --login ok--> Active --expiry / verify fails--> LoggedOut
//! LoggedOut --N bad credentials--> Locked(until) --deadline--> LoggedOut
//! ```
//!
//! Only explicit bad-credential pages count toward the lockout. Transport
//! errors and pages that cannot be read are retryable and leave the
//! counter alone.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::auth::page::{LoginPage, PageClassifier, SessionPage};
use crate::clock::SharedClock;
use crate::config::{PortalSection, SessionSection};
use crate::engine::events::{SharedSink, StatusEvent};
use crate::errors::{AuthError, Result};
use crate::portal::{Cookie, PortalTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    LoggedOut,
    Active,
    Locked { until: NaiveDateTime },
}

/// Result of one keep-alive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    /// No session to keep alive.
    Inactive,
    /// Too early to refresh; nothing sent.
    NotDue,
    Refreshed,
    /// The page could not be read but cookies look intact.
    AssumedValid,
    /// The session is gone and needs a new login.
    Expired,
}

pub struct AuthSession<T: PortalTransport> {
    transport: T,
    portal: PortalSection,
    timing: SessionSection,
    pages: PageClassifier,
    clock: SharedClock,
    sink: SharedSink,

    active: bool,
    /// False for sessions seeded from stored cookies until checked online.
    verified: bool,
    last_login: Option<NaiveDateTime>,
    /// Last time the portal confirmed the session (login or refresh).
    last_refresh: Option<NaiveDateTime>,
    consecutive_failures: u32,
    locked_until: Option<NaiveDateTime>,
    /// Cookie names present after a successful login.
    load_bearing: BTreeSet<String>,
    user: Option<String>,
    cookies_changed: bool,
}

impl<T: PortalTransport> std::fmt::Debug for AuthSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("active", &self.active)
            .field("verified", &self.verified)
            .field("last_refresh", &self.last_refresh)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("locked_until", &self.locked_until)
            .finish_non_exhaustive()
    }
}

impl<T: PortalTransport> AuthSession<T> {
    pub fn new(
        transport: T,
        portal: PortalSection,
        timing: SessionSection,
        clock: SharedClock,
        sink: SharedSink,
    ) -> Result<Self> {
        let pages = PageClassifier::new(&portal.markers)?;
        Ok(Self {
            transport,
            portal,
            timing,
            pages,
            clock,
            sink,
            active: false,
            verified: false,
            last_login: None,
            last_refresh: None,
            consecutive_failures: 0,
            locked_until: None,
            load_bearing: BTreeSet::new(),
            user: None,
            cookies_changed: false,
        })
    }

    pub fn status(&self) -> SessionStatus {
        let now = self.clock.now();
        match self.locked_until {
            Some(until) if until > now => SessionStatus::Locked { until },
            _ if self.active => SessionStatus::Active,
            _ => SessionStatus::LoggedOut,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.active && self.verified
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn last_login(&self) -> Option<NaiveDateTime> {
        self.last_login
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn locked_until(&self) -> Option<NaiveDateTime> {
        self.locked_until
    }

    pub fn load_bearing_cookies(&self) -> impl Iterator<Item = &str> {
        self.load_bearing.iter().map(String::as_str)
    }

    /// The live transport (cookie jar) for action requests.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn portal(&self) -> &PortalSection {
        &self.portal
    }

    fn age(&self, now: NaiveDateTime) -> Option<Duration> {
        self.last_refresh.map(|t| now - t)
    }

    fn within_validity(&self, now: NaiveDateTime) -> bool {
        self.active && self.age(now).is_some_and(|age| age < self.timing.valid_for())
    }

    /// Log in unless a usable session exists.
    ///
    /// Without `force`, an active session inside its validity window is
    /// checked with [`verify_session`](Self::verify_session) instead of
    /// re-submitting credentials. While locked, fails without contacting
    /// the portal.
    pub async fn login(&mut self, force: bool) -> std::result::Result<(), AuthError> {
        let now = self.clock.now();
        if let Some(until) = self.locked_until.filter(|until| *until > now) {
            debug!(%until, "login skipped: locked");
            return Err(AuthError::Locked { until });
        }

        if !force && self.within_validity(now) {
            if self.verify_session().await {
                debug!("reusing existing session");
                return Ok(());
            }
            debug!("existing session failed verification; logging in again");
        }

        if !self.portal.has_credentials() {
            return Err(AuthError::MissingCredentials);
        }

        self.active = false;
        self.verified = false;
        self.transport
            .reset()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let mut form: Vec<(String, String)> = vec![
            (
                self.portal.login_form.username_field.clone(),
                self.portal.username.trim().to_string(),
            ),
            (
                self.portal.login_form.password_field.clone(),
                self.portal.password.clone(),
            ),
        ];
        form.extend(
            self.portal
                .login_form
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        info!(url = %self.portal.login_url, "logging in");
        let response = match self.transport.submit_login(&self.portal.login_url, &form).await {
            Ok(resp) => resp,
            Err(err) => {
                let err = AuthError::Transport(err.to_string());
                self.sink.emit(StatusEvent::LoginFailed {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        match self.pages.classify_login(&response) {
            LoginPage::Authenticated { user } => {
                self.on_login_success(user);
                Ok(())
            }
            LoginPage::BadCredentials => {
                self.on_bad_credentials();
                Err(AuthError::BadCredentials)
            }
            LoginPage::ServerError(msg) => {
                let err = AuthError::ServerError(msg);
                self.sink.emit(StatusEvent::LoginFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
            LoginPage::Unrecognized => {
                debug!(body = %response.excerpt(), "unrecognized login response");
                self.sink.emit(StatusEvent::LoginFailed {
                    reason: AuthError::Unrecognized.to_string(),
                });
                Err(AuthError::Unrecognized)
            }
        }
    }

    fn on_login_success(&mut self, user: Option<String>) {
        let now = self.clock.now();
        self.active = true;
        self.verified = true;
        self.last_login = Some(now);
        self.last_refresh = Some(now);
        self.consecutive_failures = 0;
        self.locked_until = None;
        self.cookies_changed = true;

        self.load_bearing = self.transport.cookies().into_iter().map(|c| c.name).collect();
        debug!(cookies = ?self.load_bearing, "session cookies discovered");

        let expected = self.portal.display_name.trim();
        if let Some(actual) = user.as_deref() {
            if !expected.is_empty() && expected != actual {
                warn!(%actual, %expected, "logged-in user does not match the configured name");
            }
        }

        self.user = user.clone();
        self.sink.emit(StatusEvent::LoggedIn { user });
    }

    fn on_bad_credentials(&mut self) {
        let now = self.clock.now();
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        warn!(
            failures = self.consecutive_failures,
            "portal rejected the credentials"
        );
        self.sink.emit(StatusEvent::LoginFailed {
            reason: AuthError::BadCredentials.to_string(),
        });

        let threshold = self.timing.lockout_threshold.max(1);
        if self.consecutive_failures >= threshold {
            let doublings = (self.consecutive_failures - threshold).min(16);
            let window = (Duration::seconds(self.timing.lockout_base_secs) * 2i32.pow(doublings))
                .min(Duration::seconds(self.timing.lockout_max_secs));
            let until = now + window;
            self.locked_until = Some(until);
            self.sink.emit(StatusEvent::SessionLocked { until });
        }
    }

    /// Cheap check: the cookies seen at login are still in the jar.
    pub fn cookies_valid(&self) -> bool {
        let present: BTreeSet<String> =
            self.transport.cookies().into_iter().map(|c| c.name).collect();
        if self.load_bearing.is_empty() {
            return !present.is_empty();
        }
        self.load_bearing.iter().all(|name| present.contains(name))
    }

    /// Confirm the session without re-submitting credentials: cookies are
    /// intact and the home page still renders as logged in.
    pub async fn verify_session(&mut self) -> bool {
        if !self.active || !self.cookies_valid() {
            return false;
        }
        if self.portal.home_url.trim().is_empty() {
            // Nothing to fetch; the cookie check is all there is.
            return true;
        }

        let url = self.portal.home_url.clone();
        let page = match self.transport.fetch_page(&url).await {
            Ok(resp) => self.pages.classify_session(&resp),
            Err(err) => {
                debug!(error = %err, "session verification request failed");
                return false;
            }
        };

        match page {
            SessionPage::Authenticated => {
                self.verified = true;
                self.last_refresh = Some(self.clock.now());
                true
            }
            SessionPage::Expired => {
                self.expire();
                false
            }
            // Same rule as keep-alive: intact cookies vouch for the session.
            SessionPage::Ambiguous if self.cookies_valid() => {
                self.verified = true;
                self.last_refresh = Some(self.clock.now());
                true
            }
            SessionPage::Ambiguous => false,
        }
    }

    /// How long until [`keep_alive`](Self::keep_alive) should refresh the
    /// session. `None` when there is nothing to keep alive.
    pub fn refresh_due_in(&self) -> Option<Duration> {
        if !self.active || self.portal.home_url.trim().is_empty() {
            return None;
        }
        let age = self.age(self.clock.now())?;
        Some((self.timing.refresh_after() - age).max(Duration::zero()))
    }

    /// Refresh the session once it is older than the refresh threshold.
    pub async fn keep_alive(&mut self) -> KeepAlive {
        if !self.active {
            return KeepAlive::Inactive;
        }
        let now = self.clock.now();
        let Some(age) = self.age(now) else {
            return KeepAlive::Inactive;
        };

        if age >= self.timing.valid_for() {
            info!(age_secs = age.num_seconds(), "session past its validity window");
            self.expire();
            return KeepAlive::Expired;
        }
        if age < self.timing.refresh_after() {
            return KeepAlive::NotDue;
        }
        if self.portal.home_url.trim().is_empty() {
            return KeepAlive::NotDue;
        }

        debug!(age_secs = age.num_seconds(), "refreshing session");
        let url = self.portal.home_url.clone();
        let page = match self.transport.fetch_page(&url).await {
            Ok(resp) => self.pages.classify_session(&resp),
            Err(err) => {
                warn!(error = %err, "keep-alive request failed; will log in again");
                self.expire();
                return KeepAlive::Expired;
            }
        };

        match page {
            SessionPage::Authenticated => {
                self.last_refresh = Some(now);
                self.verified = true;
                KeepAlive::Refreshed
            }
            SessionPage::Expired => {
                self.expire();
                KeepAlive::Expired
            }
            SessionPage::Ambiguous if self.cookies_valid() => {
                debug!("keep-alive page unclear; cookies intact, assuming valid");
                self.last_refresh = Some(now);
                KeepAlive::AssumedValid
            }
            SessionPage::Ambiguous => {
                self.expire();
                KeepAlive::Expired
            }
        }
    }

    /// Make sure an authenticated session exists before an action.
    pub async fn ensure_active(&mut self) -> std::result::Result<(), AuthError> {
        let now = self.clock.now();
        if self.verified && self.within_validity(now) {
            return Ok(());
        }
        self.login(false).await
    }

    /// Treat the session as gone, e.g. after a login page came back where
    /// an action response was expected.
    pub fn expire(&mut self) {
        if self.active {
            self.sink.emit(StatusEvent::SessionExpired);
        }
        self.active = false;
        self.verified = false;
    }

    /// Seed the jar with stored cookies. The session counts as active but
    /// unverified until the first successful [`verify_session`](Self::verify_session).
    pub fn seed_cookies(&mut self, cookies: &[Cookie]) {
        if cookies.is_empty() {
            return;
        }
        self.transport.set_cookies(cookies);
        self.load_bearing = cookies.iter().map(|c| c.name.clone()).collect();
        self.active = true;
        self.verified = false;
        self.last_refresh = Some(self.clock.now());
        debug!(count = cookies.len(), "seeded session from stored cookies");
    }

    pub fn cookies(&self) -> Vec<Cookie> {
        self.transport.cookies()
    }

    /// Whether cookies changed since the last call (i.e. should be saved).
    pub fn take_cookies_changed(&mut self) -> bool {
        std::mem::take(&mut self.cookies_changed)
    }
}
