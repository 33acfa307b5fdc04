// tests/executor.rs

mod common;
use crate::common::builders::{SettingsBuilder, TaskBuilder};
use crate::common::fakes::{BAD_CREDENTIALS_PAGE, LOGIN_FORM_PAGE, Reply, action_json};
use crate::common::harness::Fakes;
use crate::common::{at, init_tracing, with_timeout};

use punchclock::engine::StatusEvent;
use punchclock::exec::ActionOutcome;
use punchclock::types::Action;

#[tokio::test(start_paused = true)]
async fn test_check_in_success_marks_done() {
    init_tracing();
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").failures(2).build();

    let outcome = with_timeout(executor.execute(&mut session, &mut task, Action::CheckIn)).await;

    assert_eq!(outcome, ActionOutcome::Completed { already_done: false });
    assert!(outcome.is_success());
    assert!(task.check_in_done());
    assert_eq!(task.failure_count(), 0, "success resets the failure streak");
    assert_eq!(fakes.portal.login_calls(), 1);
    assert_eq!(fakes.portal.action_bodies(), vec![serde_json::json!({ "type": 1 })]);
    assert_eq!(executor.requests_sent(), 1);
    assert_eq!(
        fakes.sink.count(|e| matches!(e, StatusEvent::ActionSucceeded { already_done: false, .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_completed_action_is_not_resent() {
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").build();

    executor.execute(&mut session, &mut task, Action::CheckIn).await;
    let before = fakes.portal.total_calls();
    let again = executor.execute(&mut session, &mut task, Action::CheckIn).await;

    assert_eq!(again, ActionOutcome::Skipped);
    assert_eq!(fakes.portal.total_calls(), before);
}

#[tokio::test(start_paused = true)]
async fn test_already_done_counts_as_success() {
    let fakes = Fakes::new(at("12:00"));
    let settings = SettingsBuilder::new().build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").checked_in().build();
    fakes.portal.push_action(Reply::ok(action_json(0, "今日已簽退")));

    let outcome = executor.execute(&mut session, &mut task, Action::CheckOut).await;

    assert_eq!(outcome, ActionOutcome::Completed { already_done: true });
    assert!(task.is_complete());
    assert_eq!(fakes.portal.action_bodies(), vec![serde_json::json!({ "type": 2 })]);
}

#[tokio::test(start_paused = true)]
async fn test_check_out_before_check_in_sends_nothing() {
    let fakes = Fakes::new(at("12:00"));
    let settings = SettingsBuilder::new().build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").build();

    let outcome = executor.execute(&mut session, &mut task, Action::CheckOut).await;

    assert!(matches!(outcome, ActionOutcome::OutOfOrder { .. }));
    assert_eq!(fakes.portal.total_calls(), 0);
    assert_eq!(task.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_portal_out_of_order_leaves_task_untouched() {
    let fakes = Fakes::new(at("12:00"));
    let settings = SettingsBuilder::new().build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").checked_in().build();
    fakes.portal.push_action(Reply::ok(action_json(0, "請先簽到")));

    let outcome = executor.execute(&mut session, &mut task, Action::CheckOut).await;

    assert!(matches!(outcome, ActionOutcome::OutOfOrder { .. }));
    assert!(!task.check_out_done());
    assert_eq!(task.failure_count(), 0);
    assert_eq!(fakes.portal.action_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_denied_marks_restricted_and_relogs() {
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").build();
    fakes.portal.push_action(Reply::ok(action_json(-1, "無使用權限")));

    let outcome = executor.execute(&mut session, &mut task, Action::CheckIn).await;

    assert!(matches!(outcome, ActionOutcome::Restricted { .. }));
    assert!(task.is_restricted());
    assert_eq!(task.last_attempt_time(), Some(at("09:00")));
    assert_eq!(task.failure_count(), 0, "denials are not failures");
    assert!(!task.check_in_done());
    assert_eq!(fakes.portal.action_calls(), 1, "no retry after a denial");
    assert_eq!(fakes.portal.login_calls(), 2, "denial forces a fresh login");
    assert_eq!(fakes.sink.count(|e| matches!(e, StatusEvent::TaskRestricted { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn test_success_clears_previous_restriction() {
    let fakes = Fakes::new(at("10:00"));
    let settings = SettingsBuilder::new().build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").restricted_at(at("09:00")).build();

    let outcome = executor.execute(&mut session, &mut task, Action::CheckIn).await;

    assert!(outcome.is_success());
    assert!(!task.is_restricted());
    assert_eq!(task.restricted_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_failures_mark_task_abnormal() {
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().max_attempts(1).failure_threshold(3).build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").build();
    fakes.portal.set_default_action(Reply::ok(action_json(0, "系統錯誤")));

    for round in 1..=2 {
        let outcome = executor.execute(&mut session, &mut task, Action::CheckIn).await;
        assert!(matches!(outcome, ActionOutcome::Failed { abnormal: false, .. }), "round {round}");
    }
    let third = executor.execute(&mut session, &mut task, Action::CheckIn).await;
    assert!(matches!(third, ActionOutcome::Failed { abnormal: true, .. }));
    assert!(task.is_abnormal());
    assert_eq!(fakes.sink.count(|e| matches!(e, StatusEvent::TaskAbnormal { .. })), 1);

    // Abnormal tasks are left alone.
    let sent = fakes.portal.action_calls();
    assert_eq!(
        executor.execute(&mut session, &mut task, Action::CheckIn).await,
        ActionOutcome::Skipped
    );
    assert_eq!(fakes.portal.action_calls(), sent);
}

#[tokio::test(start_paused = true)]
async fn test_login_page_response_triggers_relogin_and_retry() {
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().max_attempts(3).build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").build();
    fakes.portal.push_action(Reply::ok(LOGIN_FORM_PAGE));

    let outcome = with_timeout(executor.execute(&mut session, &mut task, Action::CheckIn)).await;

    assert_eq!(outcome, ActionOutcome::Completed { already_done: false });
    assert_eq!(fakes.portal.action_calls(), 2);
    assert_eq!(fakes.portal.login_calls(), 2);
    assert_eq!(task.failure_count(), 0);
    assert_eq!(fakes.sink.count(|e| matches!(e, StatusEvent::SessionExpired)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_are_retried() {
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().max_attempts(3).build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").build();
    fakes.portal.push_action(Reply::Fail("connection reset".into()));
    fakes.portal.push_action(Reply::status(502, "bad gateway"));

    let outcome = with_timeout(executor.execute(&mut session, &mut task, Action::CheckIn)).await;

    assert!(outcome.is_success());
    assert_eq!(fakes.portal.action_calls(), 3);
    assert_eq!(executor.requests_sent(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_attempts_count_one_failure() {
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().max_attempts(3).build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").build();
    fakes.portal.set_default_action(Reply::status(500, "oops"));

    let outcome = with_timeout(executor.execute(&mut session, &mut task, Action::CheckIn)).await;

    match outcome {
        ActionOutcome::Failed { reason, abnormal } => {
            assert!(reason.contains("500"), "{reason}");
            assert!(!abnormal);
        }
        other => panic!("Expected Failed, got {other:?}"),
    }
    assert_eq!(fakes.portal.action_calls(), 3);
    assert_eq!(task.failure_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_login_failure_counts_without_sending_action() {
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().build();
    let mut session = fakes.session(&settings);
    let mut executor = fakes.executor(&settings);
    let mut task = TaskBuilder::new("shift").build();
    fakes.portal.set_default_login(Reply::ok(BAD_CREDENTIALS_PAGE));

    let outcome = executor.execute(&mut session, &mut task, Action::CheckIn).await;

    assert!(matches!(outcome, ActionOutcome::Failed { .. }));
    assert_eq!(fakes.portal.action_calls(), 0);
    assert_eq!(task.failure_count(), 1);
}
