// tests/scheduler.rs

mod common;
use crate::common::builders::{SettingsBuilder, TaskBuilder};
use crate::common::fakes::{Reply, action_json};
use crate::common::harness::{Fakes, INSIDE, OUTSIDE};
use crate::common::{at, day, init_tracing, with_timeout};

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use punchclock::auth::KeepAlive;
use punchclock::engine::{RepairKind, StatusEvent};
use punchclock::task::TaskStore;

#[tokio::test(start_paused = true)]
async fn test_due_actions_run_in_order() {
    init_tracing();
    let fakes = Fakes::new(at("08:59"));
    let settings = SettingsBuilder::new().build();
    let mut scheduler = fakes.scheduler(&settings);
    let task = TaskBuilder::new("shift").times("09:00", "12:00").build();
    let id = task.id();
    let mut store = TaskStore::new(vec![task]);

    let report = scheduler.tick(&mut store).await;
    assert!(report.permitted);
    assert_eq!(report.attempted, 0);
    assert_eq!(fakes.portal.total_calls(), 0);

    fakes.clock.set(at("09:00"));
    let report = scheduler.tick(&mut store).await;
    assert_eq!(report.attempted, 1);
    assert!(store.get(id).unwrap().check_in_done());
    assert!(store.take_dirty());

    fakes.clock.set(at("12:00"));
    scheduler.tick(&mut store).await;
    assert!(store.get(id).unwrap().is_complete());
    assert_eq!(fakes.portal.action_calls(), 2);
    assert_eq!(fakes.sink.count(|e| matches!(e, StatusEvent::ShortShift { .. })), 0);

    let stats = scheduler.stats();
    assert_eq!(stats.ticks, 3);
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.successes, 2);
    assert_eq!(stats.failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_gate_blocks_processing_outside_network() {
    let fakes = Fakes::new(at("09:00"));
    fakes.network.set_local(Some(OUTSIDE));
    let settings = SettingsBuilder::new().build();
    let mut scheduler = fakes.scheduler(&settings);
    let mut store = TaskStore::new(vec![TaskBuilder::new("shift").build()]);

    let report = scheduler.tick(&mut store).await;

    assert!(!report.permitted);
    assert_eq!(report.attempted, 0);
    assert_eq!(fakes.portal.total_calls(), 0);
    assert_eq!(scheduler.stats().gated_ticks, 1);
    assert!(!store.tasks()[0].check_in_done());
}

#[tokio::test(start_paused = true)]
async fn test_restricted_task_waits_for_cooldown() {
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().cooldown_mins(30, 240).build();
    let mut scheduler = fakes.scheduler(&settings);
    let mut store = TaskStore::new(vec![TaskBuilder::new("shift").build()]);
    fakes.portal.push_action(Reply::ok(action_json(-1, "無使用權限")));

    scheduler.tick(&mut store).await;
    assert!(store.tasks()[0].is_restricted());
    assert_eq!(fakes.portal.action_calls(), 1);
    assert_eq!(scheduler.stats().restricted, 1);

    fakes.clock.set(at("09:10"));
    let report = scheduler.tick(&mut store).await;
    assert_eq!(report.attempted, 0);
    assert_eq!(fakes.portal.action_calls(), 1);

    fakes.clock.set(at("09:31"));
    let report = scheduler.tick(&mut store).await;
    assert_eq!(report.attempted, 1);
    assert_eq!(fakes.portal.action_calls(), 2);
    assert!(store.tasks()[0].check_in_done());
    assert!(!store.tasks()[0].is_restricted());
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_task_is_never_retried() {
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().max_attempts(1).failure_threshold(3).build();
    let mut scheduler = fakes.scheduler(&settings);
    let mut store = TaskStore::new(vec![TaskBuilder::new("shift").build()]);
    fakes.portal.set_default_action(Reply::ok(action_json(0, "系統錯誤")));

    for minute in 0..3 {
        fakes.clock.set(at("09:00") + ChronoDuration::minutes(minute));
        scheduler.tick(&mut store).await;
    }
    assert!(store.tasks()[0].is_abnormal());
    assert_eq!(fakes.portal.action_calls(), 3);

    fakes.clock.set(at("09:03"));
    let report = scheduler.tick(&mut store).await;
    assert_eq!(report.attempted, 0);
    assert_eq!(fakes.portal.action_calls(), 3);
    assert_eq!(scheduler.stats().failures, 3);
}

#[tokio::test(start_paused = true)]
async fn test_regaining_network_clears_restrictions() {
    let fakes = Fakes::new(at("09:00"));
    let settings = SettingsBuilder::new().cache_ttl_secs(0).build();
    let mut scheduler = fakes.scheduler(&settings);
    let mut store = TaskStore::new(vec![
        TaskBuilder::new("shift").restricted_at(at("08:50")).build(),
    ]);

    // Baseline inside; the task is still cooling down.
    let report = scheduler.tick(&mut store).await;
    assert_eq!(report.attempted, 0);

    fakes.network.set_local(Some(OUTSIDE));
    fakes.clock.set(at("09:01"));
    let report = scheduler.tick(&mut store).await;
    assert!(!report.permitted);
    assert_eq!(
        fakes.sink.count(|e| matches!(e, StatusEvent::NetworkChanged { privileged: false, .. })),
        1
    );

    fakes.network.set_local(Some(INSIDE));
    fakes.clock.set(at("09:02"));
    let report = scheduler.tick(&mut store).await;
    assert_eq!(report.restrictions_cleared, 1);
    assert_eq!(report.attempted, 1);
    assert!(store.tasks()[0].check_in_done());
    assert_eq!(
        fakes.sink.count(|e| matches!(e, StatusEvent::RestrictionsCleared { count: 1 })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_blocking_task_is_forced_and_next_task_proceeds() {
    let fakes = Fakes::new(at("09:31"));
    let settings = SettingsBuilder::new().max_attempts(1).build();
    let mut scheduler = fakes.scheduler(&settings);
    let a = TaskBuilder::new("A").times("08:00", "09:00").checked_in().build();
    let b = TaskBuilder::new("B").times("09:15", "10:00").build();
    let (a_id, b_id) = (a.id(), b.id());
    let mut store = TaskStore::new(vec![b, a]);
    fakes.portal.push_action(Reply::ok(action_json(0, "系統錯誤")));

    let report = scheduler.tick(&mut store).await;

    let a = store.get(a_id).unwrap();
    assert!(a.is_complete());
    assert!(a.repair_marks().checkout_attempted);
    assert!(a.repair_marks().forced_checkout);
    assert!(store.get(b_id).unwrap().check_in_done());
    assert_eq!(report.attempted, 2);

    let kinds: Vec<RepairKind> = fakes
        .sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            StatusEvent::TaskRepaired { repair, .. } => Some(repair),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![RepairKind::AutoCheckout, RepairKind::ForcedCheckout]);
    assert_eq!(scheduler.stats().repairs, 1);

    // Nothing left to repair on the next tick.
    fakes.clock.set(at("09:32"));
    scheduler.tick(&mut store).await;
    assert_eq!(scheduler.stats().repairs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_missed_and_reordered_tasks_become_abnormal() {
    let fakes = Fakes::new(at("13:30"));
    let settings = SettingsBuilder::new().build();
    let mut scheduler = fakes.scheduler(&settings);
    let missed = TaskBuilder::new("early").times("07:00", "08:00").build();
    let skipped = TaskBuilder::new("late morning").times("11:00", "12:00").build();
    let started = TaskBuilder::new("afternoon").times("13:00", "17:00").checked_in().build();
    let (missed_id, skipped_id) = (missed.id(), skipped.id());
    let mut store = TaskStore::new(vec![missed, skipped, started]);

    let report = scheduler.tick(&mut store).await;

    let missed = store.get(missed_id).unwrap();
    assert!(missed.is_abnormal() && missed.is_complete());
    assert_eq!(missed.abnormal_reason(), Some("missed"));
    let skipped = store.get(skipped_id).unwrap();
    assert!(skipped.is_abnormal() && skipped.repair_marks().reordered);

    assert_eq!(report.attempted, 0, "repairs here send nothing");
    assert_eq!(fakes.portal.action_calls(), 0);
    assert_eq!(fakes.sink.count(|e| matches!(e, StatusEvent::TaskAbnormal { .. })), 2);
}

#[tokio::test(start_paused = true)]
async fn test_short_shift_is_reported() {
    let fakes = Fakes::new(at("09:20"));
    let settings = SettingsBuilder::new().build();
    let mut scheduler = fakes.scheduler(&settings);
    let mut store = TaskStore::new(vec![
        TaskBuilder::new("quick").times("09:00", "09:20").checked_in().build(),
    ]);

    scheduler.tick(&mut store).await;

    assert!(store.tasks()[0].is_complete());
    assert_eq!(
        fakes.sink.count(|e| matches!(e, StatusEvent::ShortShift { worked_mins: 20, .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_other_days_are_ignored() {
    let fakes = Fakes::new(at("09:30"));
    let settings = SettingsBuilder::new().build();
    let mut scheduler = fakes.scheduler(&settings);
    let yesterday = day().pred_opt().unwrap();
    let mut store = TaskStore::new(vec![TaskBuilder::new("old").on(yesterday).build()]);

    let report = scheduler.tick(&mut store).await;
    assert_eq!(report.attempted, 0);
    assert_eq!(fakes.portal.total_calls(), 0);
}

#[test]
fn test_next_wake_intervals() {
    let fakes = Fakes::new(at("09:00"));
    let mut builder = SettingsBuilder::new();
    builder.raw_mut().schedule.check_interval_secs = 30;
    builder.raw_mut().schedule.idle_interval_secs = 3600;
    builder.raw_mut().schedule.near_window_secs = 600;
    let settings = builder.build();
    let scheduler = fakes.scheduler(&settings);

    let empty = TaskStore::default();
    assert_eq!(scheduler.next_wake(&empty), Duration::from_secs(3600));

    let near = TaskStore::new(vec![TaskBuilder::new("soon").times("09:05", "10:00").build()]);
    assert_eq!(scheduler.next_wake(&near), Duration::from_secs(30));

    let later = TaskStore::new(vec![TaskBuilder::new("later").times("09:20", "10:00").build()]);
    assert_eq!(scheduler.next_wake(&later), Duration::from_secs(20 * 60));

    let far = TaskStore::new(vec![TaskBuilder::new("far").times("15:00", "16:00").build()]);
    assert_eq!(scheduler.next_wake(&far), Duration::from_secs(3600));

    // Cooling down until 09:30 pushes the wake-up past the due time.
    let cooling = TaskStore::new(vec![
        TaskBuilder::new("cooling").times("08:00", "12:00").restricted_at(at("09:00")).build(),
    ]);
    assert_eq!(scheduler.next_wake(&cooling), Duration::from_secs(30 * 60));

    let done = TaskStore::new(vec![TaskBuilder::new("done").completed().build()]);
    assert_eq!(scheduler.next_wake(&done), Duration::from_secs(3600));
}

#[tokio::test(start_paused = true)]
async fn test_idle_wait_wakes_in_time_to_refresh_the_session() {
    init_tracing();
    let fakes = Fakes::new(at("08:00"));
    let mut builder = SettingsBuilder::new().session_timing(240, 270);
    builder.raw_mut().schedule.idle_interval_secs = 300;
    let settings = builder.build();
    let mut scheduler = fakes.scheduler(&settings);
    let store = TaskStore::new(vec![TaskBuilder::new("afternoon").times("13:00", "17:00").build()]);

    with_timeout(scheduler.session_mut().login(true)).await.unwrap();

    let wait = scheduler.next_wake(&store);
    assert_eq!(wait, Duration::from_secs(240));

    fakes.clock.advance(ChronoDuration::from_std(wait).unwrap());
    assert_eq!(
        with_timeout(scheduler.session_mut().keep_alive()).await,
        KeepAlive::Refreshed
    );

    // Freshly refreshed: the next wait is again bounded by the refresh age.
    assert_eq!(scheduler.next_wake(&store), Duration::from_secs(240));
}
