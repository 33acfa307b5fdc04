// src/engine/events.rs

//! Status events for the presentation layer.
//!
//! The core reports what happened through an [`EventSink`] and never
//! cares how it is rendered. The CLI uses [`TracingSink`]; embedders can
//! hand in an mpsc sender.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::task::{Task, TaskId};
use crate::types::Action;

/// Identity of the task an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    pub id: TaskId,
    pub name: String,
    /// Whether the user wants notifications for this task.
    pub notify: bool,
}

impl From<&Task> for TaskRef {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id(),
            name: task.name.clone(),
            notify: task.notify,
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id.short())
    }
}

/// Sequence repairs the scheduler can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    /// Blocking task: one extra check-out attempt was made.
    AutoCheckout,
    /// Blocking task: check-out was marked done without the portal.
    ForcedCheckout,
    /// Never started and far past its check-in time.
    Missed,
    /// A later task has progress while this one does not.
    Reordered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    ActionSucceeded {
        task: TaskRef,
        action: Action,
        /// The portal said it was already done.
        already_done: bool,
    },
    ActionFailed {
        task: TaskRef,
        action: Action,
        reason: String,
    },
    TaskRestricted {
        task: TaskRef,
        action: Action,
    },
    TaskAbnormal {
        task: TaskRef,
        reason: String,
    },
    TaskRepaired {
        task: TaskRef,
        repair: RepairKind,
    },
    ShortShift {
        task: TaskRef,
        worked_mins: i64,
    },
    NetworkChanged {
        privileged: bool,
        detail: String,
    },
    RestrictionsCleared {
        count: usize,
    },
    LoggedIn {
        user: Option<String>,
    },
    LoginFailed {
        reason: String,
    },
    SessionExpired,
    SessionLocked {
        until: NaiveDateTime,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

pub type SharedSink = Arc<dyn EventSink>;

/// Renders events as log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: StatusEvent) {
        match event {
            StatusEvent::ActionSucceeded {
                task,
                action,
                already_done,
            } => info!(task = %task, %action, already_done, "action succeeded"),
            StatusEvent::ActionFailed {
                task,
                action,
                reason,
            } => warn!(task = %task, %action, %reason, "action failed"),
            StatusEvent::TaskRestricted { task, action } => {
                warn!(task = %task, %action, "portal refused action from this network")
            }
            StatusEvent::TaskAbnormal { task, reason } => {
                warn!(task = %task, %reason, "task marked abnormal; needs manual review")
            }
            StatusEvent::TaskRepaired { task, repair } => {
                warn!(task = %task, ?repair, "task sequence repaired")
            }
            StatusEvent::ShortShift { task, worked_mins } => {
                warn!(task = %task, worked_mins, "shift shorter than expected")
            }
            StatusEvent::NetworkChanged { privileged, detail } => {
                info!(privileged, %detail, "network state changed")
            }
            StatusEvent::RestrictionsCleared { count } => {
                info!(count, "restrictions cleared after entering privileged network")
            }
            StatusEvent::LoggedIn { user } => info!(user = ?user, "logged in"),
            StatusEvent::LoginFailed { reason } => warn!(%reason, "login failed"),
            StatusEvent::SessionExpired => info!("session expired"),
            StatusEvent::SessionLocked { until } => {
                warn!(%until, "login locked after repeated credential failures")
            }
        }
    }
}

impl EventSink for mpsc::UnboundedSender<StatusEvent> {
    fn emit(&self, event: StatusEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.send(event);
    }
}

/// Fan out to several sinks.
pub struct MultiSink(pub Vec<SharedSink>);

impl EventSink for MultiSink {
    fn emit(&self, event: StatusEvent) {
        for sink in &self.0 {
            sink.emit(event.clone());
        }
    }
}
