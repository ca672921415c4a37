//! Tests for trigger evaluation and the polling driver.

use std::sync::Mutex;

use super::*;
use rstest::rstest;

fn offset() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).expect("offset")
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
    offset()
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .single()
        .expect("valid time")
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
}

#[derive(Default)]
struct RecordingHandler {
    actions: Mutex<Vec<Action>>,
}

impl RecordingHandler {
    fn actions(&self) -> Vec<Action> {
        self.actions.lock().expect("lock").clone()
    }
}

impl ActionHandler for RecordingHandler {
    fn handle(&self, action: Action) -> HandlerFuture<'_> {
        Box::pin(async move {
            self.actions.lock().expect("lock").push(action);
        })
    }
}

// 2024-06-02 is a Sunday.
#[rstest]
#[case(Cadence::Daily(hm(2, 0)), at(2024, 6, 2, 1, 0), at(2024, 6, 2, 2, 0))]
#[case(Cadence::Daily(hm(2, 0)), at(2024, 6, 2, 2, 0), at(2024, 6, 3, 2, 0))]
#[case(Cadence::Daily(hm(2, 0)), at(2024, 6, 2, 23, 59), at(2024, 6, 3, 2, 0))]
#[case(Cadence::Weekly(Weekday::Sun, hm(1, 0)), at(2024, 6, 2, 0, 30), at(2024, 6, 2, 1, 0))]
#[case(Cadence::Weekly(Weekday::Sun, hm(1, 0)), at(2024, 6, 2, 1, 0), at(2024, 6, 9, 1, 0))]
#[case(Cadence::Weekly(Weekday::Mon, hm(3, 0)), at(2024, 6, 2, 12, 0), at(2024, 6, 3, 3, 0))]
#[case(Cadence::Weekly(Weekday::Sat, hm(3, 0)), at(2024, 6, 2, 12, 0), at(2024, 6, 8, 3, 0))]
fn next_after_is_strictly_later(
    #[case] cadence: Cadence,
    #[case] after: DateTime<FixedOffset>,
    #[case] expected: DateTime<FixedOffset>,
) {
    assert_eq!(cadence.next_after(&after), Some(expected));
}

#[test]
fn trigger_fires_once_per_occurrence() {
    let mut scheduler = Scheduler::new();
    scheduler
        .register("daily", Cadence::Daily(hm(2, 0)), Action::Backup, &at(2024, 6, 1, 12, 0))
        .expect("register");

    assert!(scheduler.due(&at(2024, 6, 2, 1, 59)).is_empty());
    assert_eq!(scheduler.due(&at(2024, 6, 2, 2, 0)), [Action::Backup]);
    assert!(scheduler.due(&at(2024, 6, 2, 2, 1)).is_empty());
    assert_eq!(scheduler.due(&at(2024, 6, 3, 2, 0)), [Action::Backup]);
}

#[test]
fn overdue_occurrences_collapse_into_one_run() {
    let mut scheduler = Scheduler::new();
    scheduler
        .register("daily", Cadence::Daily(hm(2, 0)), Action::Backup, &at(2024, 6, 1, 12, 0))
        .expect("register");

    assert_eq!(scheduler.due(&at(2024, 6, 5, 9, 0)), [Action::Backup]);
    assert!(scheduler.due(&at(2024, 6, 5, 9, 1)).is_empty());
    let next = scheduler.triggers().first().expect("trigger").next_due();
    assert_eq!(next, at(2024, 6, 6, 2, 0));
}

#[test]
fn triggers_due_together_run_in_registration_order() {
    let settings = ScheduleSettings {
        daily_backup_at: hm(3, 0),
        weekly_backup_day: Weekday::Mon,
        weekly_backup_at: hm(3, 0),
        cleanup_day: Weekday::Mon,
        cleanup_at: hm(3, 0),
        poll_interval: Duration::from_secs(60),
    };
    let mut scheduler =
        Scheduler::from_settings(&settings, &at(2024, 6, 2, 12, 0)).expect("scheduler");

    let actions = scheduler.due(&at(2024, 6, 3, 3, 0));

    assert_eq!(actions, [Action::Backup, Action::Backup, Action::Cleanup]);
}

#[test]
fn default_settings_register_three_triggers() {
    let settings = crate::test_support::baseline_config()
        .schedule()
        .expect("schedule");
    let scheduler =
        Scheduler::from_settings(&settings, &at(2024, 6, 2, 12, 0)).expect("scheduler");

    let summary: Vec<(String, Action, DateTime<FixedOffset>)> = scheduler
        .triggers()
        .iter()
        .map(|trigger| (trigger.label.clone(), trigger.action, trigger.next_due()))
        .collect();
    assert_eq!(
        summary,
        [
            (String::from("daily backup"), Action::Backup, at(2024, 6, 3, 2, 0)),
            (String::from("weekly backup"), Action::Backup, at(2024, 6, 9, 1, 0)),
            (String::from("cleanup"), Action::Cleanup, at(2024, 6, 3, 3, 0)),
        ]
    );
}

#[tokio::test]
async fn tick_runs_due_actions_through_handler() {
    let mut scheduler = Scheduler::new();
    scheduler
        .register("sweep", Cadence::Weekly(Weekday::Mon, hm(3, 0)), Action::Cleanup, &at(2024, 6, 2, 12, 0))
        .expect("register");
    let handler = RecordingHandler::default();

    assert_eq!(scheduler.tick(&at(2024, 6, 2, 13, 0), &handler).await, 0);
    assert_eq!(scheduler.tick(&at(2024, 6, 3, 3, 0), &handler).await, 1);

    assert_eq!(handler.actions(), [Action::Cleanup]);
}

#[tokio::test]
async fn driver_fires_overdue_trigger_once_then_stops_on_shutdown() {
    let clock = Clock::new(offset());
    let two_days_ago = clock.now() - chrono::TimeDelta::days(2);
    let mut scheduler = Scheduler::new();
    scheduler
        .register("daily", Cadence::Daily(hm(2, 0)), Action::Backup, &two_days_ago)
        .expect("register");
    let handler = RecordingHandler::default();

    scheduler
        .run_until(
            clock,
            Duration::from_millis(10),
            &handler,
            tokio::time::sleep(Duration::from_millis(80)),
        )
        .await;

    assert_eq!(handler.actions(), [Action::Backup]);
}

#[rstest]
#[case(Cadence::Daily(hm(2, 0)), "daily at 02:00")]
#[case(Cadence::Weekly(Weekday::Sun, hm(1, 0)), "Sunday at 01:00")]
fn cadence_describes_itself(#[case] cadence: Cadence, #[case] expected: &str) {
    assert_eq!(cadence.describe(), expected);
}
