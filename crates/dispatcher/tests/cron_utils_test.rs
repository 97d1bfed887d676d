use automator_dispatcher::cron_utils::*;

use chrono::{Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

#[test]
fn test_five_field_expression_runs_on_minute_boundaries() {
    let scheduler = CronScheduler::new("*/15 * * * *").unwrap();
    assert_eq!(scheduler.expression(), "*/15 * * * *");

    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 7, 42).unwrap();
    let next = scheduler.next_execution_time(now).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 12, 15, 0).unwrap());
}

#[test]
fn test_six_field_expression_still_accepted() {
    let scheduler = CronScheduler::new("30 0 * * * *").unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let next = scheduler.next_execution_time(now).unwrap();
    assert_eq!(next.second(), 30);
}

#[test]
fn test_validate_cron_expression() {
    assert!(CronScheduler::validate_cron_expression("0 2 * * *").is_ok());
    assert!(CronScheduler::validate_cron_expression("0 0 0 * * *").is_ok());
    assert!(CronScheduler::validate_cron_expression("invalid").is_err());
    assert!(CronScheduler::validate_cron_expression("").is_err());
    assert!(CronScheduler::validate_cron_expression("61 * * * *").is_err());
}

#[test]
fn test_upcoming_times() {
    let scheduler = CronScheduler::new("0 * * * *").unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
    let upcoming = scheduler.upcoming_times(now, 3);
    let hours: Vec<u32> = upcoming.iter().map(|t| t.hour()).collect();
    assert_eq!(hours, vec![13, 14, 15]);
}

#[test]
fn test_due_tick_none_before_next_boundary() {
    let scheduler = CronScheduler::new("* * * * *").unwrap();
    let since = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 59).unwrap();
    assert!(scheduler.due_tick(since, now).is_none());
}

#[test]
fn test_due_tick_collapses_missed_ticks() {
    let scheduler = CronScheduler::new("* * * * *").unwrap();
    let since = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap();

    let due = scheduler.due_tick(since, now).unwrap();
    assert_eq!(due.tick, now);
    assert_eq!(due.earliest, Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 0).unwrap());
    assert_eq!(due.missed, 4);

    assert!(due.is_overdue(now, Duration::minutes(2)));
    assert!(!due.is_overdue(now, Duration::minutes(5)));
}

#[test]
fn test_single_due_tick_is_never_overdue() {
    let scheduler = CronScheduler::new("* * * * *").unwrap();
    let since = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 10).unwrap();

    let due = scheduler.due_tick(since, now).unwrap();
    assert_eq!(due.missed, 0);
    assert!(!due.is_overdue(now, Duration::seconds(1)));
}

#[test]
fn test_due_tick_lookback_is_bounded() {
    let scheduler = CronScheduler::new("0 * * * *").unwrap();
    let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 4, 12, 30, 0).unwrap();

    let due = scheduler.due_tick(since, now).unwrap();
    assert_eq!(due.tick, Utc.with_ymd_and_hms(2024, 1, 4, 12, 0, 0).unwrap());
    assert_eq!(due.earliest, Utc.with_ymd_and_hms(2024, 1, 3, 13, 0, 0).unwrap());
    assert_eq!(due.missed, 23);
}

#[test]
fn test_local_midnight_tick_falls_on_previous_utc_day() {
    let tokyo = CronScheduler::new("0 2 * * *").unwrap().in_timezone(Tz::Asia__Tokyo);
    assert_eq!(tokyo.timezone(), Tz::Asia__Tokyo);

    // 东京 2024-01-01 21:00 至 2024-01-02 03:00
    let since = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 18, 0, 0).unwrap();

    let due = tokyo.due_tick(since, now).unwrap();
    assert_eq!(due.tick, Utc.with_ymd_and_hms(2024, 1, 1, 17, 0, 0).unwrap());
    assert_eq!(due.missed, 0);

    let utc = CronScheduler::new("0 2 * * *").unwrap();
    assert!(utc.due_tick(since, now).is_none());
}

#[test]
fn test_timezone_follows_daylight_saving() {
    let new_york = CronScheduler::new("0 9 * * *")
        .unwrap()
        .in_timezone(Tz::America__New_York);

    // 2024-03-10 切换到夏令时
    let from = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
    assert_eq!(
        new_york.upcoming_times(from, 3),
        vec![
            Utc.with_ymd_and_hms(2024, 3, 9, 14, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 13, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 11, 13, 0, 0).unwrap(),
        ]
    );
    assert_eq!(
        new_york.next_execution_time(from),
        Some(Utc.with_ymd_and_hms(2024, 3, 9, 14, 0, 0).unwrap())
    );
}
