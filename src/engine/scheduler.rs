// src/engine/scheduler.rs

//! One scheduling pass over today's tasks.
//!
//! Per tick: keep the session alive, ask the network gate, repair the day's
//! sequence, then walk the tasks in check-in order. Nothing a single task
//! does can stop the tick; every outcome lands in task state, stats and
//! events.

use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::auth::{AuthSession, KeepAlive};
use crate::clock::SharedClock;
use crate::config::Settings;
use crate::engine::events::{RepairKind, SharedSink, StatusEvent, TaskRef};
use crate::engine::repair::{self, RepairAction};
use crate::engine::stats::SchedulerStats;
use crate::errors::{PunchclockError, Result};
use crate::exec::{ActionExecutor, ActionOutcome};
use crate::network::{GateVerdict, NetworkGate, Transition};
use crate::portal::PortalTransport;
use crate::task::{Task, TaskId, TaskStore};
use crate::types::Action;

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub at: NaiveDateTime,
    /// `false` when the network gate blocked task processing.
    pub permitted: bool,
    /// Actions handed to the executor (repairs included).
    pub attempted: usize,
    pub restrictions_cleared: usize,
}

pub struct Scheduler<T: PortalTransport> {
    settings: Settings,
    session: AuthSession<T>,
    executor: ActionExecutor,
    gate: NetworkGate,
    clock: SharedClock,
    sink: SharedSink,
    stats: SchedulerStats,
    /// Last gate answer that was logged, to log changes only.
    last_permitted: Option<bool>,
}

impl<T: PortalTransport> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("session", &self.session)
            .field("gate", &self.gate)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T: PortalTransport> Scheduler<T> {
    pub fn new(
        settings: Settings,
        session: AuthSession<T>,
        executor: ActionExecutor,
        gate: NetworkGate,
        clock: SharedClock,
        sink: SharedSink,
    ) -> Self {
        Self {
            settings,
            session,
            executor,
            gate,
            clock,
            sink,
            stats: SchedulerStats::default(),
            last_permitted: None,
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn session(&self) -> &AuthSession<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut AuthSession<T> {
        &mut self.session
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub fn gate(&self) -> &NetworkGate {
        &self.gate
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn tick(&mut self, store: &mut TaskStore) -> TickReport {
        let now = self.clock.now();
        self.stats.ticks += 1;

        let mut report = TickReport {
            at: now,
            permitted: true,
            attempted: 0,
            restrictions_cleared: 0,
        };

        match self.session.keep_alive().await {
            KeepAlive::Expired => debug!("session expired; next action logs in again"),
            KeepAlive::Refreshed | KeepAlive::AssumedValid => debug!("session refreshed"),
            KeepAlive::NotDue | KeepAlive::Inactive => {}
        }

        let verdict = self.gate.check(false).await;
        report.restrictions_cleared = self.handle_transition(store, &verdict);
        self.log_gate_change(&verdict);

        if !verdict.privileged {
            self.stats.gated_ticks += 1;
            report.permitted = false;
            return report;
        }

        let ids = store.ids_for_day(now.date());
        if ids.is_empty() {
            return report;
        }

        report.attempted += self.repair(store, &ids, now).await;

        for id in ids {
            match self.process_task(store, id, now).await {
                Ok(n) => report.attempted += n,
                Err(err) => warn!(task = %id, error = %err, "task processing failed; continuing"),
            }
        }

        report
    }

    fn handle_transition(&mut self, store: &mut TaskStore, verdict: &GateVerdict) -> usize {
        let Some(transition) = self.gate.take_transition() else {
            return 0;
        };
        self.sink.emit(StatusEvent::NetworkChanged {
            privileged: transition == Transition::BecamePrivileged,
            detail: verdict.to_string(),
        });
        if transition != Transition::BecamePrivileged {
            return 0;
        }
        let cleared = store.clear_restrictions();
        if cleared > 0 {
            self.sink.emit(StatusEvent::RestrictionsCleared { count: cleared });
        }
        cleared
    }

    fn log_gate_change(&mut self, verdict: &GateVerdict) {
        if self.last_permitted == Some(verdict.privileged) {
            return;
        }
        self.last_permitted = Some(verdict.privileged);
        if verdict.privileged {
            info!(%verdict, "network permits actions");
        } else {
            info!(%verdict, "outside the privileged network; pausing task execution");
        }
    }

    async fn repair(&mut self, store: &mut TaskStore, ids: &[TaskId], now: NaiveDateTime) -> usize {
        let day: Vec<&Task> = ids.iter().filter_map(|id| store.get(*id)).collect();
        let plan = repair::plan(&day, now, &self.settings.repair);

        let mut attempted = 0;
        for action in plan {
            let id = action.task_id();
            let Some(task) = store.get_mut(id) else {
                continue;
            };
            let task_ref = TaskRef::from(&*task);
            self.stats.repairs += 1;

            match action {
                RepairAction::ResolveBlocking { may_force, .. } => {
                    if !task.repair_marks().checkout_attempted {
                        task.repair_marks_mut().checkout_attempted = true;
                        warn!(task = %task_ref, "check-out overdue and blocking a later task; trying once");
                        self.sink.emit(StatusEvent::TaskRepaired {
                            task: task_ref.clone(),
                            repair: RepairKind::AutoCheckout,
                        });
                        attempted += 1;
                        let outcome = self
                            .executor
                            .execute(&mut self.session, task, Action::CheckOut)
                            .await;
                        self.count(&outcome);
                    }
                    if may_force && !task.check_out_done() {
                        task.mark_done(Action::CheckOut);
                        task.repair_marks_mut().forced_checkout = true;
                        warn!(task = %task_ref, "forcing check-out locally; the portal may disagree");
                        self.sink.emit(StatusEvent::TaskRepaired {
                            task: task_ref,
                            repair: RepairKind::ForcedCheckout,
                        });
                    }
                }
                RepairAction::MarkMissed { .. } => {
                    task.force_complete();
                    task.repair_marks_mut().missed = true;
                    task.mark_abnormal("missed");
                    self.sink.emit(StatusEvent::TaskRepaired {
                        task: task_ref.clone(),
                        repair: RepairKind::Missed,
                    });
                    self.sink.emit(StatusEvent::TaskAbnormal {
                        task: task_ref,
                        reason: "missed".to_string(),
                    });
                }
                RepairAction::ForceComplete { later, .. } => {
                    let reason = format!("completed out of order (task {} already started)", later.short());
                    task.force_complete();
                    task.repair_marks_mut().reordered = true;
                    task.mark_abnormal(reason.clone());
                    self.sink.emit(StatusEvent::TaskRepaired {
                        task: task_ref.clone(),
                        repair: RepairKind::Reordered,
                    });
                    self.sink.emit(StatusEvent::TaskAbnormal {
                        task: task_ref,
                        reason,
                    });
                }
            }
        }
        attempted
    }

    async fn process_task(
        &mut self,
        store: &mut TaskStore,
        id: TaskId,
        now: NaiveDateTime,
    ) -> Result<usize> {
        let task = store
            .get(id)
            .ok_or_else(|| PunchclockError::TaskNotFound(id.to_string()))?;

        if task.is_abnormal() || task.is_complete() {
            return Ok(0);
        }
        if let Some(remaining) = task.cooldown_remaining(
            now,
            self.settings.schedule.cooldown_base(),
            self.settings.schedule.cooldown_max(),
        ) {
            debug!(
                task = %id,
                remaining_mins = remaining.num_minutes(),
                "restricted; cooling down"
            );
            return Ok(0);
        }

        let wants_in = now >= task.check_in_at() && !task.check_in_done();
        let wants_out = now >= task.check_out_at() && !task.check_out_done();
        if !wants_in && !wants_out {
            return Ok(0);
        }

        let task = store
            .get_mut(id)
            .ok_or_else(|| PunchclockError::TaskNotFound(id.to_string()))?;
        let mut attempted = 0;

        if wants_in {
            attempted += 1;
            let outcome = self
                .executor
                .execute(&mut self.session, task, Action::CheckIn)
                .await;
            self.count(&outcome);
        }

        // Re-read: check-in may have just completed, or the task may have
        // become restricted/abnormal.
        if wants_out && task.check_in_done() && !task.is_abnormal() && !task.is_restricted() {
            attempted += 1;
            let outcome = self
                .executor
                .execute(&mut self.session, task, Action::CheckOut)
                .await;
            self.count(&outcome);
            if matches!(outcome, ActionOutcome::Completed { .. }) {
                self.check_short_shift(task, now);
            }
        }

        Ok(attempted)
    }

    fn check_short_shift(&self, task: &Task, now: NaiveDateTime) {
        let worked = now - task.check_in_at();
        let minimum = chrono::Duration::minutes(self.settings.schedule.short_shift_mins);
        if worked < minimum {
            self.sink.emit(StatusEvent::ShortShift {
                task: TaskRef::from(task),
                worked_mins: worked.num_minutes(),
            });
        }
    }

    fn count(&mut self, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Skipped => return,
            ActionOutcome::Completed { .. } => self.stats.successes += 1,
            ActionOutcome::Failed { .. } => self.stats.failures += 1,
            ActionOutcome::Restricted { .. } => self.stats.restricted += 1,
            ActionOutcome::OutOfOrder { .. } => {}
        }
        self.stats.attempts += 1;
    }

    /// How long to sleep before the next tick.
    ///
    /// Short interval while anything is due or within the near window,
    /// idle interval otherwise, never sleeping past the next due time or
    /// past the point where an active session needs its refresh.
    pub fn next_wake(&self, store: &TaskStore) -> Duration {
        let wait = self.task_wait(store);
        match self.session.refresh_due_in() {
            Some(due) => {
                let due = due.to_std().unwrap_or_default().max(Duration::from_secs(1));
                wait.min(due)
            }
            None => wait,
        }
    }

    fn task_wait(&self, store: &TaskStore) -> Duration {
        let schedule = &self.settings.schedule;
        let short = Duration::from_secs(schedule.check_interval_secs.max(1));
        let idle = Duration::from_secs(schedule.idle_interval_secs.max(1));
        let near = chrono::Duration::seconds(schedule.near_window_secs as i64);
        let now = self.clock.now();

        let next_due = store
            .tasks()
            .iter()
            .filter_map(|t| {
                let due = t.next_pending_at()?;
                let cooldown_end = t
                    .cooldown_remaining(now, schedule.cooldown_base(), schedule.cooldown_max())
                    .map(|rem| now + rem);
                Some(cooldown_end.map_or(due, |end| end.max(due)))
            })
            .filter(|due| due.date() >= now.date())
            .min();

        let Some(next_due) = next_due else {
            return idle;
        };
        let until = next_due - now;
        if until <= near {
            return short;
        }
        until
            .to_std()
            .map(|d| d.min(idle))
            .unwrap_or(short)
            .max(short)
    }

    /// Stop background work (the route trace) with a bounded wait.
    pub async fn shutdown(&self) {
        self.gate.shutdown().await;
    }
}
