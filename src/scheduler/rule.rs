//! Schedule Matching
//!
//! Decides whether a schedule fires at a given wall-clock minute.
//!
//! A weekly schedule fires when the minute's weekday is enabled and its
//! hour and minute equal the schedule's. A cron schedule fires when its
//! expression selects the minute. Cron expressions have five fields
//! (`minute hour day-of-month month day-of-week`); day-of-week is
//! numbered 1 (Sunday) to 7 (Saturday), so day names such as `Mon-Fri`
//! are clearer.

use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::model::JobSchedule;

/// Parses a five-field cron expression.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, String> {
    let fields = expression.split_whitespace().count();
    if fields != 5 {
        return Err(format!(
            "cron expression '{}' has {} fields, expected 5",
            expression, fields
        ));
    }

    // The cron crate expects a leading seconds field.
    cron::Schedule::from_str(&format!("0 {}", expression.trim()))
        .map_err(|e| format!("invalid cron expression '{}': {}", expression, e))
}

/// Truncates a timestamp to the start of its minute.
pub fn truncate_to_minute(time: NaiveDateTime) -> NaiveDateTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

/// True when `schedule` fires at `minute`.
///
/// The schedule's `active` flag is not consulted here.
pub fn matches(schedule: &JobSchedule, minute: NaiveDateTime) -> Result<bool, String> {
    let minute = truncate_to_minute(minute);

    match &schedule.cron {
        Some(expression) => {
            let cron = parse_cron(expression)?;
            // Wall-clock minutes are compared as naive times, so a fixed zone is enough.
            let at = Utc.from_utc_datetime(&minute);
            Ok(cron.after(&(at - Duration::seconds(1))).next() == Some(at))
        }
        // Out-of-range times are compared as if clamped.
        None => Ok(schedule.days.contains(minute.weekday())
            && schedule.hour.min(23) == minute.hour()
            && schedule.minute.min(59) == minute.minute()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WeekDays;
    use chrono::{NaiveDate, Weekday};

    /// 2024-01-01 is a Monday.
    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_weekly_matches_day_hour_and_minute() {
        let schedule = JobSchedule::weekly(1, WeekDays::of(&[Weekday::Mon]), 9, 0);

        assert!(matches(&schedule, at(1, 9, 0)).unwrap());
        assert!(!matches(&schedule, at(1, 9, 1)).unwrap());
        assert!(!matches(&schedule, at(1, 10, 0)).unwrap());
        assert!(!matches(&schedule, at(2, 9, 0)).unwrap());
        assert!(matches(&schedule, at(8, 9, 0)).unwrap());
    }

    #[test]
    fn test_seconds_are_ignored() {
        let schedule = JobSchedule::weekly(1, WeekDays::every_day(), 9, 0);
        let late = at(3, 9, 0) + Duration::seconds(42);
        assert!(matches(&schedule, late).unwrap());
    }

    #[test]
    fn test_no_days_never_matches() {
        let schedule = JobSchedule::weekly(1, WeekDays::none(), 9, 0);
        assert!(!matches(&schedule, at(1, 9, 0)).unwrap());
    }

    #[test]
    fn test_clamped_time_matches_clamped_value() {
        let schedule = JobSchedule::weekly(1, WeekDays::every_day(), 30, -5);
        assert!(matches(&schedule, at(1, 23, 0)).unwrap());
    }

    #[test]
    fn test_deserialized_out_of_range_time_fires_at_clamped_minute() {
        let schedule: JobSchedule = serde_json::from_str(
            r#"{"id":1,"job_id":1,"hour":24,"minute":75,"days":{"monday":true}}"#,
        )
        .unwrap();
        assert!(matches(&schedule, at(1, 23, 59)).unwrap());
        assert!(!matches(&schedule, at(2, 23, 59)).unwrap());
    }

    #[test]
    fn test_cron_every_quarter_hour() {
        let schedule = JobSchedule::cron(1, "*/15 * * * *");
        assert!(matches(&schedule, at(4, 13, 45)).unwrap());
        assert!(!matches(&schedule, at(4, 13, 46)).unwrap());
    }

    #[test]
    fn test_cron_weekday_names() {
        let schedule = JobSchedule::cron(1, "30 6 * * Mon-Fri");
        assert!(matches(&schedule, at(5, 6, 30)).unwrap());
        assert!(!matches(&schedule, at(6, 6, 30)).unwrap());
    }

    #[test]
    fn test_cron_overrides_weekly_fields() {
        let mut schedule = JobSchedule::cron(1, "0 12 * * *");
        schedule.days = WeekDays::every_day();
        schedule.set_time(9, 0);
        assert!(!matches(&schedule, at(1, 9, 0)).unwrap());
        assert!(matches(&schedule, at(1, 12, 0)).unwrap());
    }

    #[test]
    fn test_invalid_cron() {
        assert!(parse_cron("* * *").is_err());
        assert!(parse_cron("0 0 * * * *").is_err());
        assert!(parse_cron("61 * * * *").is_err());
        assert!(matches(&JobSchedule::cron(1, "nonsense here a b c"), at(1, 0, 0)).is_err());
    }
}
