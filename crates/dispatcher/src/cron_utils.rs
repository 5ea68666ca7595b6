use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use taskhub_errors::{TaskHubError, TaskHubResult};

/// A parsed cron expression.
///
/// Entries are written in standard 5-field form (minute, hour, day-of-month,
/// month, day-of-week). The underlying parser wants a seconds field, so
/// 5-field expressions are normalized by prepending `0`; 6- and 7-field
/// expressions are accepted as-is.
pub struct CronSchedule {
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> TaskHubResult<Self> {
        let normalized = normalize(expr);
        let schedule = Schedule::from_str(&normalized).map_err(|e| TaskHubError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { schedule })
    }

    /// Validate without keeping the schedule around.
    pub fn validate(expr: &str) -> TaskHubResult<()> {
        Self::parse(expr).map(|_| ())
    }

    /// The next fire time strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// The next `count` fire times after `from`.
    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }
}

fn normalize(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_five_field_expressions() {
        assert!(CronSchedule::validate("* * * * *").is_ok());
        assert!(CronSchedule::validate("*/5 * * * *").is_ok());
        assert!(CronSchedule::validate("0 3 * * 1,3,5").is_ok());
        assert!(CronSchedule::validate("30 2 1 * *").is_ok());
    }

    #[test]
    fn accepts_explicit_seconds_field() {
        assert!(CronSchedule::validate("0 * * * * *").is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(CronSchedule::validate("every tuesday").is_err());
        assert!(CronSchedule::validate("61 * * * *").is_err());
        let err = CronSchedule::validate("bogus * * * *").unwrap_err();
        assert!(matches!(err, TaskHubError::InvalidCron { .. }));
    }

    #[test]
    fn every_minute_fires_at_minute_boundaries() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        let next = schedule.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 12, 31, 0).unwrap());
    }

    #[test]
    fn step_expression_advances_by_step() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 0).unwrap();
        let fires = schedule.upcoming(from, 3);
        assert_eq!(fires[0], Utc.with_ymd_and_hms(2024, 5, 1, 12, 15, 0).unwrap());
        assert_eq!(fires[1], Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap());
        assert_eq!(fires[2], Utc.with_ymd_and_hms(2024, 5, 1, 12, 45, 0).unwrap());
    }

    #[test]
    fn next_from_now_coalesces_missed_ticks() {
        // However long the scheduler was down, the next fire computed from
        // "now" is always in the future: no backfill.
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        let next = schedule.next_after(now).unwrap();
        assert!(next > now);
        assert!((next - now) <= chrono::Duration::minutes(1));
    }
}
