// src/task/model.rs

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{PunchclockError, Result};
use crate::types::Action;

/// Stable task identity, generated once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, enough to tell tasks apart in logs and the CLI.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = PunchclockError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(TaskId)
            .map_err(|e| PunchclockError::InvalidTask(format!("invalid task id '{s}': {e}")))
    }
}

/// Per-task guards so each sequence repair logs and acts once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairMarks {
    /// An automatic check-out was already attempted for a blocking task.
    #[serde(default)]
    pub checkout_attempted: bool,
    /// Check-out was force-marked after the blocking threshold.
    #[serde(default)]
    pub forced_checkout: bool,
    /// Task was force-resolved as missed.
    #[serde(default)]
    pub missed: bool,
    /// Task was force-completed because a later task already progressed.
    #[serde(default)]
    pub reordered: bool,
}

impl RepairMarks {
    pub fn any(&self) -> bool {
        self.checkout_attempted || self.forced_checkout || self.missed || self.reordered
    }
}

/// One scheduled check-in/check-out pair.
///
/// Invariants held by every mutator:
/// - `check_out_done` implies `check_in_done`;
/// - `restricted` and `abnormal` are never both set (abnormal wins);
/// - `check_out_time > check_in_time` (checked at creation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    pub name: String,
    date: NaiveDate,
    #[serde(with = "hhmm")]
    check_in_time: NaiveTime,
    #[serde(with = "hhmm")]
    check_out_time: NaiveTime,
    #[serde(default = "default_notify")]
    pub notify: bool,
    #[serde(default)]
    check_in_done: bool,
    #[serde(default)]
    check_out_done: bool,
    #[serde(default)]
    restricted: bool,
    #[serde(default)]
    last_attempt_time: Option<NaiveDateTime>,
    #[serde(default)]
    restricted_attempts: u32,
    #[serde(default)]
    failure_count: u32,
    #[serde(default)]
    abnormal: bool,
    #[serde(default)]
    abnormal_reason: Option<String>,
    #[serde(default)]
    repair: RepairMarks,
}

fn default_notify() -> bool {
    true
}

impl Task {
    /// Create a task with a fresh id. Rejects schedules where check-out is
    /// not strictly after check-in.
    pub fn new(
        name: impl Into<String>,
        date: NaiveDate,
        check_in_time: NaiveTime,
        check_out_time: NaiveTime,
    ) -> Result<Self> {
        let name = name.into();
        if check_out_time <= check_in_time {
            return Err(PunchclockError::InvalidTask(format!(
                "task '{name}': check-out {} must be after check-in {}",
                check_out_time.format("%H:%M"),
                check_in_time.format("%H:%M")
            )));
        }

        Ok(Self {
            id: TaskId::generate(),
            name,
            date,
            check_in_time,
            check_out_time,
            notify: true,
            check_in_done: false,
            check_out_done: false,
            restricted: false,
            last_attempt_time: None,
            restricted_attempts: 0,
            failure_count: 0,
            abnormal: false,
            abnormal_reason: None,
            repair: RepairMarks::default(),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn check_in_time(&self) -> NaiveTime {
        self.check_in_time
    }

    pub fn check_out_time(&self) -> NaiveTime {
        self.check_out_time
    }

    pub fn check_in_at(&self) -> NaiveDateTime {
        self.date.and_time(self.check_in_time)
    }

    pub fn check_out_at(&self) -> NaiveDateTime {
        self.date.and_time(self.check_out_time)
    }

    /// When the given action becomes due.
    pub fn due_at(&self, action: Action) -> NaiveDateTime {
        match action {
            Action::CheckIn => self.check_in_at(),
            Action::CheckOut => self.check_out_at(),
        }
    }

    pub fn check_in_done(&self) -> bool {
        self.check_in_done
    }

    pub fn check_out_done(&self) -> bool {
        self.check_out_done
    }

    pub fn is_done(&self, action: Action) -> bool {
        match action {
            Action::CheckIn => self.check_in_done,
            Action::CheckOut => self.check_out_done,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.check_in_done && self.check_out_done
    }

    /// Whether the task has made any progress at all.
    pub fn has_progress(&self) -> bool {
        self.check_in_done
    }

    /// Record a completed action. A completed check-out implies check-in.
    pub fn mark_done(&mut self, action: Action) {
        match action {
            Action::CheckIn => self.check_in_done = true,
            Action::CheckOut => {
                self.check_in_done = true;
                self.check_out_done = true;
            }
        }
    }

    /// Set both progress flags at once, keeping `out ⇒ in`.
    pub fn set_progress(&mut self, check_in_done: bool, check_out_done: bool) {
        self.check_in_done = check_in_done || check_out_done;
        self.check_out_done = check_out_done;
    }

    pub fn force_complete(&mut self) {
        self.set_progress(true, true);
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    pub fn last_attempt_time(&self) -> Option<NaiveDateTime> {
        self.last_attempt_time
    }

    pub fn restricted_attempts(&self) -> u32 {
        self.restricted_attempts
    }

    /// The portal refused the action because of network location.
    ///
    /// Ignored for abnormal tasks, which are already out of automatic retry.
    pub fn mark_restricted(&mut self, now: NaiveDateTime) {
        if self.abnormal {
            return;
        }
        self.restricted = true;
        self.last_attempt_time = Some(now);
        self.restricted_attempts = self.restricted_attempts.saturating_add(1);
    }

    pub fn clear_restriction(&mut self) {
        self.restricted = false;
        self.last_attempt_time = None;
        self.restricted_attempts = 0;
    }

    /// Remaining cooldown before a restricted task may be retried.
    ///
    /// The window starts at `base` and doubles with each further restricted
    /// attempt, capped at `max`. `None` means the task may run now.
    pub fn cooldown_remaining(
        &self,
        now: NaiveDateTime,
        base: Duration,
        max: Duration,
    ) -> Option<Duration> {
        if !self.restricted {
            return None;
        }
        let last = self.last_attempt_time?;

        let doublings = self.restricted_attempts.saturating_sub(1).min(16);
        let window = (base * 2i32.pow(doublings)).min(max);
        let elapsed = now - last;

        if elapsed < window {
            Some(window - elapsed)
        } else {
            None
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Count one more consecutive failure. Returns `true` when this failure
    /// pushed the task over `threshold` and it was marked abnormal.
    pub fn record_failure(&mut self, threshold: u32, reason: &str) -> bool {
        self.failure_count = self.failure_count.saturating_add(1);
        if !self.abnormal && self.failure_count >= threshold {
            self.mark_abnormal(format!(
                "{} consecutive failures, last: {reason}",
                self.failure_count
            ));
            return true;
        }
        false
    }

    pub fn reset_failures(&mut self) {
        self.failure_count = 0;
    }

    pub fn is_abnormal(&self) -> bool {
        self.abnormal
    }

    pub fn abnormal_reason(&self) -> Option<&str> {
        self.abnormal_reason.as_deref()
    }

    /// Remove the task from automatic retry until manually cleared.
    pub fn mark_abnormal(&mut self, reason: impl Into<String>) {
        self.abnormal = true;
        self.abnormal_reason = Some(reason.into());
        self.restricted = false;
        self.last_attempt_time = None;
        self.restricted_attempts = 0;
    }

    pub fn clear_abnormal(&mut self) {
        self.abnormal = false;
        self.abnormal_reason = None;
        self.failure_count = 0;
    }

    pub fn repair_marks(&self) -> &RepairMarks {
        &self.repair
    }

    pub fn repair_marks_mut(&mut self) -> &mut RepairMarks {
        &mut self.repair
    }

    /// Manual reset from the user: back to a fresh, unstarted task.
    pub fn reset(&mut self) {
        self.set_progress(false, false);
        self.clear_restriction();
        self.clear_abnormal();
        self.repair = RepairMarks::default();
    }

    /// Earliest still-pending action time, if the task can still run.
    pub fn next_pending_at(&self) -> Option<NaiveDateTime> {
        if self.abnormal {
            return None;
        }
        if !self.check_in_done {
            Some(self.check_in_at())
        } else if !self.check_out_done {
            Some(self.check_out_at())
        } else {
            None
        }
    }

    /// Repair records loaded from disk that break the lifecycle invariants.
    pub(crate) fn normalize(&mut self) {
        if self.check_out_done && !self.check_in_done {
            self.check_in_done = true;
        }
        if self.abnormal && self.restricted {
            self.restricted = false;
            self.last_attempt_time = None;
            self.restricted_attempts = 0;
        }
    }
}

/// `HH:MM` time-of-day on disk, `HH:MM:SS` when seconds are set.
mod hhmm {
    use chrono::{NaiveTime, Timelike};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        let format = if time.second() == 0 { "%H:%M" } else { "%H:%M:%S" };
        s.serialize_str(&time.format(format).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parse a user-supplied `HH:MM` (or `HH:MM:SS`) time.
pub fn parse_time(raw: &str) -> std::result::Result<NaiveTime, String> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|e| format!("invalid time '{raw}' (expected HH:MM): {e}"))
}

/// Parse a user-supplied `YYYY-MM-DD` date.
pub fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{raw}' (expected YYYY-MM-DD): {e}"))
}
