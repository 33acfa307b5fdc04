// src/engine/repair.rs

//! Sequence and anomaly repair planning.
//!
//! Pure: looks at today's tasks (sorted by check-in time) and the clock
//! and says what to fix. The scheduler applies the plan. Each repair is
//! guarded by a per-task mark so it fires once.

use chrono::{Duration, NaiveDateTime};

use crate::config::RepairSection;
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    /// Checked in, check-out long overdue, and a later task is due.
    /// Try one check-out; force it when `may_force` and that fails.
    ResolveBlocking { id: TaskId, may_force: bool },
    /// Never started and far past its check-in time.
    MarkMissed { id: TaskId },
    /// No progress while `later` already has some.
    ForceComplete { id: TaskId, later: TaskId },
}

impl RepairAction {
    pub fn task_id(&self) -> TaskId {
        match self {
            RepairAction::ResolveBlocking { id, .. }
            | RepairAction::MarkMissed { id }
            | RepairAction::ForceComplete { id, .. } => *id,
        }
    }
}

/// Plan repairs for `day` (tasks in check-in order).
pub fn plan(day: &[&Task], now: NaiveDateTime, cfg: &RepairSection) -> Vec<RepairAction> {
    let grace = Duration::minutes(cfg.grace_mins);
    let force_after = Duration::minutes(cfg.force_checkout_after_mins);
    let missed_after = Duration::minutes(cfg.missed_after_mins);

    let mut actions = Vec::new();

    for (i, task) in day.iter().enumerate() {
        if task.is_abnormal() || task.is_complete() {
            continue;
        }
        let later = &day[i + 1..];
        let marks = task.repair_marks();

        if task.check_in_done() {
            let overdue = now - task.check_out_at();
            let later_due = later
                .iter()
                .any(|t| !t.is_abnormal() && !t.check_in_done() && now >= t.check_in_at());

            if later_due && overdue >= grace {
                let may_force = overdue >= force_after && !marks.forced_checkout;
                if !marks.checkout_attempted || may_force {
                    actions.push(RepairAction::ResolveBlocking {
                        id: task.id(),
                        may_force,
                    });
                }
            }
            continue;
        }

        if !marks.missed && now - task.check_in_at() >= missed_after {
            actions.push(RepairAction::MarkMissed { id: task.id() });
            continue;
        }

        if !marks.reordered {
            if let Some(progressed) = later.iter().find(|t| t.has_progress()) {
                actions.push(RepairAction::ForceComplete {
                    id: task.id(),
                    later: progressed.id(),
                });
            }
        }
    }

    actions
}
