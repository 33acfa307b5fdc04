// src/exec/executor.rs

//! Executes a single action against the portal and folds the answer into
//! the task.
//!
//! Decision table, in order:
//! 1. success code: mark done, reset failures.
//! 2. "already done": mark done, no further request.
//! 3. "out of order": leave the task alone; sequence repair handles it.
//! 4. location denied: mark restricted, force a re-login, no failure count.
//! 5. anything else: re-login and retry while attempts remain, then count
//!    one failure (abnormal at the threshold).

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::auth::AuthSession;
use crate::clock::SharedClock;
use crate::config::{ExecutorSection, Settings};
use crate::engine::events::{SharedSink, StatusEvent, TaskRef};
use crate::exec::classify::{ActionResponse, MarkerClassifier, ResponseClassifier};
use crate::exec::throttle::Throttle;
use crate::portal::PortalTransport;
use crate::task::Task;
use crate::types::Action;

/// What one `execute` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The portal confirmed the action (or said it was already done).
    Completed { already_done: bool },
    /// Nothing to do locally: already done or the task is abnormal. No
    /// request was sent.
    Skipped,
    OutOfOrder { message: String },
    Restricted { message: String },
    Failed { reason: String, abnormal: bool },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Completed { .. } | ActionOutcome::Skipped)
    }
}

pub struct ActionExecutor {
    settings: ExecutorSection,
    action_field: String,
    check_in_url: String,
    check_out_url: String,
    classifier: Box<dyn ResponseClassifier>,
    throttle: Throttle,
    clock: SharedClock,
    sink: SharedSink,
    requests_sent: u64,
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("settings", &self.settings)
            .field("requests_sent", &self.requests_sent)
            .finish_non_exhaustive()
    }
}

impl ActionExecutor {
    pub fn new(settings: &Settings, clock: SharedClock, sink: SharedSink) -> Self {
        let portal = &settings.portal;
        Self {
            settings: settings.executor.clone(),
            action_field: portal.responses.action_field.clone(),
            check_in_url: portal.check_in_url.clone(),
            check_out_url: portal.check_out_url.clone(),
            classifier: Box::new(MarkerClassifier::new(&portal.responses, &portal.markers)),
            throttle: Throttle::new(&settings.executor),
            clock,
            sink,
            requests_sent: 0,
        }
    }

    /// Swap the response classifier.
    pub fn with_classifier(mut self, classifier: Box<dyn ResponseClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Action requests sent so far, retries included.
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    pub async fn execute<T: PortalTransport>(
        &mut self,
        session: &mut AuthSession<T>,
        task: &mut Task,
        action: Action,
    ) -> ActionOutcome {
        let task_ref = TaskRef::from(&*task);

        if task.is_done(action) || task.is_abnormal() {
            debug!(task = %task_ref, %action, "nothing to do");
            return ActionOutcome::Skipped;
        }
        if action == Action::CheckOut && !task.check_in_done() {
            return ActionOutcome::OutOfOrder {
                message: "check-in has not been recorded".to_string(),
            };
        }

        if let Err(err) = session.ensure_active().await {
            return self.fail(task, &task_ref, action, format!("not logged in: {err}"));
        }

        let url = match action {
            Action::CheckIn => self.check_in_url.clone(),
            Action::CheckOut => self.check_out_url.clone(),
        };
        let mut body = Map::new();
        body.insert(self.action_field.clone(), Value::from(action.code()));
        let body = Value::Object(body);

        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.throttle.backoff(attempt - 1);
                debug!(task = %task_ref, %action, attempt, ?delay, "retrying");
                tokio::time::sleep(delay).await;

                if !session.cookies_valid() {
                    if let Err(err) = session.login(true).await {
                        last_reason = format!("re-login failed: {err}");
                        if !err.is_retryable() {
                            break;
                        }
                        continue;
                    }
                }
            }

            self.throttle.wait_turn().await;
            self.requests_sent += 1;
            info!(task = %task_ref, %action, attempt, "sending action");

            let response = match session.transport_mut().post_action(&url, &body).await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(task = %task_ref, %action, attempt, error = %err, "action request failed");
                    last_reason = format!("request failed: {err}");
                    continue;
                }
            };

            match self.classifier.classify(action, &response) {
                ActionResponse::Success { message } => {
                    debug!(task = %task_ref, %action, %message, "portal confirmed");
                    return self.complete(task, task_ref, action, false);
                }
                ActionResponse::AlreadyDone { message } => {
                    info!(task = %task_ref, %action, %message, "portal reports already done");
                    return self.complete(task, task_ref, action, true);
                }
                ActionResponse::OutOfOrder { message } => {
                    info!(task = %task_ref, %action, %message, "portal reports out-of-order action");
                    return ActionOutcome::OutOfOrder { message };
                }
                ActionResponse::Denied { message } => {
                    task.mark_restricted(self.clock.now());
                    self.sink.emit(StatusEvent::TaskRestricted {
                        task: task_ref.clone(),
                        action,
                    });
                    // The denial may also come from a stale session.
                    if let Err(err) = session.login(true).await {
                        debug!(error = %err, "re-login after denial failed");
                    }
                    return ActionOutcome::Restricted { message };
                }
                ActionResponse::LoginPage => {
                    session.expire();
                    last_reason = "session expired during action".to_string();
                }
                ActionResponse::Unexpected { detail } => {
                    warn!(task = %task_ref, %action, attempt, %detail, "unexpected action response");
                    last_reason = detail;
                }
            }

            if attempt < max_attempts {
                if let Err(err) = session.login(true).await {
                    last_reason = format!("re-login failed: {err}");
                    if !err.is_retryable() {
                        break;
                    }
                }
            }
        }

        self.fail(task, &task_ref, action, last_reason)
    }

    fn complete(
        &self,
        task: &mut Task,
        task_ref: TaskRef,
        action: Action,
        already_done: bool,
    ) -> ActionOutcome {
        task.mark_done(action);
        task.reset_failures();
        task.clear_restriction();
        self.sink.emit(StatusEvent::ActionSucceeded {
            task: task_ref,
            action,
            already_done,
        });
        ActionOutcome::Completed { already_done }
    }

    fn fail(
        &self,
        task: &mut Task,
        task_ref: &TaskRef,
        action: Action,
        reason: String,
    ) -> ActionOutcome {
        let abnormal = task.record_failure(self.settings.failure_threshold, &reason);
        debug!(
            task = %task_ref,
            %action,
            failures = task.failure_count(),
            %reason,
            "action failed"
        );
        self.sink.emit(StatusEvent::ActionFailed {
            task: task_ref.clone(),
            action,
            reason: reason.clone(),
        });
        if abnormal {
            self.sink.emit(StatusEvent::TaskAbnormal {
                task: task_ref.clone(),
                reason: task.abnormal_reason().unwrap_or_default().to_string(),
            });
        }
        ActionOutcome::Failed { reason, abnormal }
    }
}
