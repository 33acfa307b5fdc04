#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use punchclock::config::{RawSettings, Settings};
use punchclock::task::{Task, parse_time};
use punchclock::types::Action;

use crate::day;

/// Builder for `Task` to simplify test setup.
pub struct TaskBuilder {
    name: String,
    date: NaiveDate,
    check_in: String,
    check_out: String,
    notify: bool,
    done: Option<Action>,
    restricted_at: Option<NaiveDateTime>,
    failures: u32,
}

impl TaskBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            date: day(),
            check_in: "09:00".to_string(),
            check_out: "12:00".to_string(),
            notify: true,
            done: None,
            restricted_at: None,
            failures: 0,
        }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    pub fn times(mut self, check_in: &str, check_out: &str) -> Self {
        self.check_in = check_in.to_string();
        self.check_out = check_out.to_string();
        self
    }

    pub fn checked_in(mut self) -> Self {
        self.done = Some(Action::CheckIn);
        self
    }

    pub fn completed(mut self) -> Self {
        self.done = Some(Action::CheckOut);
        self
    }

    pub fn restricted_at(mut self, when: NaiveDateTime) -> Self {
        self.restricted_at = Some(when);
        self
    }

    /// Pre-existing consecutive failures (below the abnormal threshold).
    pub fn failures(mut self, n: u32) -> Self {
        self.failures = n;
        self
    }

    pub fn silent(mut self) -> Self {
        self.notify = false;
        self
    }

    pub fn build(self) -> Task {
        let mut task = Task::new(
            self.name,
            self.date,
            parse_time(&self.check_in).expect("valid check-in"),
            parse_time(&self.check_out).expect("valid check-out"),
        )
        .expect("valid task");
        task.notify = self.notify;
        if let Some(action) = self.done {
            task.mark_done(action);
        }
        if let Some(when) = self.restricted_at {
            task.mark_restricted(when);
        }
        for _ in 0..self.failures {
            task.record_failure(u32::MAX, "seeded");
        }
        task
    }
}

/// Builder for `Settings` with fast, deterministic test defaults: portal
/// URLs and credentials set, no request spacing, no jitter, short backoff.
pub struct SettingsBuilder {
    raw: RawSettings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        let mut raw = RawSettings::default();
        raw.portal.login_url = "https://portal.test/entrance/save_id.php".into();
        raw.portal.home_url = "https://portal.test/entrance/index.php".into();
        raw.portal.check_in_url = "https://portal.test/card/edit.php".into();
        raw.portal.check_out_url = "https://portal.test/card/edit.php".into();
        raw.portal.username = "s1234".into();
        raw.portal.password = "secret".into();
        raw.executor.request_spacing_ms = 0;
        raw.executor.jitter_ms = 0;
        raw.executor.backoff_base_ms = 10;
        raw.executor.backoff_max_ms = 40;
        Self { raw }
    }

    /// Point the portal at a different base URL (e.g. a wiremock server).
    pub fn base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.raw.portal.login_url = format!("{base}/entrance/save_id.php");
        self.raw.portal.home_url = format!("{base}/entrance/index.php");
        self.raw.portal.check_in_url = format!("{base}/card/edit.php");
        self.raw.portal.check_out_url = format!("{base}/card/edit.php");
        self
    }

    pub fn without_credentials(mut self) -> Self {
        self.raw.portal.username.clear();
        self.raw.portal.password.clear();
        self
    }

    pub fn display_name(mut self, name: &str) -> Self {
        self.raw.portal.display_name = name.to_string();
        self
    }

    pub fn network_gate(mut self, enabled: bool) -> Self {
        self.raw.network.enabled = enabled;
        self
    }

    pub fn secondary_probe(mut self, enabled: bool) -> Self {
        self.raw.network.secondary_probe = enabled;
        self
    }

    pub fn probe_timeout_secs(mut self, secs: u64) -> Self {
        self.raw.network.probe_timeout_secs = secs;
        self
    }

    pub fn cache_ttl_secs(mut self, secs: i64) -> Self {
        self.raw.network.cache_ttl_secs = secs;
        self
    }

    pub fn cooldown_mins(mut self, base: i64, max: i64) -> Self {
        self.raw.schedule.cooldown_base_mins = base;
        self.raw.schedule.cooldown_max_mins = max;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.raw.executor.max_attempts = n;
        self
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.raw.executor.failure_threshold = n;
        self
    }

    pub fn session_timing(mut self, refresh_after_secs: i64, valid_for_secs: i64) -> Self {
        self.raw.session.refresh_after_secs = refresh_after_secs;
        self.raw.session.valid_for_secs = valid_for_secs;
        self
    }

    pub fn lockout(mut self, threshold: u32, base_secs: i64, max_secs: i64) -> Self {
        self.raw.session.lockout_threshold = threshold;
        self.raw.session.lockout_base_secs = base_secs;
        self.raw.session.lockout_max_secs = max_secs;
        self
    }

    pub fn raw_mut(&mut self) -> &mut RawSettings {
        &mut self.raw
    }

    pub fn build(self) -> Settings {
        Settings::try_from(self.raw).expect("Failed to build valid settings from builder")
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
