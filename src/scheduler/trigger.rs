//! Schedule parsing and next-firing computation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;

use crate::error::{Error, Result};
use crate::model::{MIN_INTERVAL_MS, Schedule};

/// A parsed, ready-to-run schedule.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fires every period, first one period after installation.
    Interval(Duration),
    /// Fires on the cron calendar in `tz`.
    Cron { cron: Box<Cron>, tz: Tz },
}

impl Trigger {
    /// Parse a schedule. Cron jobs without a timezone use `default_tz`.
    pub fn from_schedule(schedule: &Schedule, default_tz: Tz) -> Result<Self> {
        match schedule {
            Schedule::Interval { interval_ms } => {
                if *interval_ms < MIN_INTERVAL_MS {
                    return Err(Error::Validation(format!(
                        "schedule.intervalMs must be at least {MIN_INTERVAL_MS} (got {interval_ms})"
                    )));
                }
                Ok(Trigger::Interval(Duration::from_millis(*interval_ms)))
            }
            Schedule::Cron {
                expression,
                timezone,
            } => {
                let tz = match timezone.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                    Some(name) => parse_timezone(name)?,
                    None => default_tz,
                };
                Ok(Trigger::Cron {
                    cron: Box::new(parse_cron(expression)?),
                    tz,
                })
            }
        }
    }

    /// Next cron firing strictly after `now`. `None` for intervals.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval(_) => None,
            Trigger::Cron { cron, tz } => cron
                .find_next_occurrence(&now.with_timezone(tz), false)
                .ok()
                .map(|at| at.with_timezone(&Utc)),
        }
    }

    /// Next cron firing after both `now` and the occurrence that fired last.
    ///
    /// Sleeps run on the monotonic clock; if the wall clock lags it, `now`
    /// can still sit before the occurrence that just fired.
    pub fn next_firing(
        &self,
        now: DateTime<Utc>,
        last_fired: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let from = last_fired.map_or(now, |last| last.max(now));
        self.next_after(from)
    }
}

/// Parse a 5-field cron expression, or 6 fields with leading seconds.
pub fn parse_cron(expression: &str) -> Result<Cron> {
    let fields = expression.split_whitespace().count();
    if !(5..=6).contains(&fields) {
        return Err(Error::Validation(format!(
            "cron expression must have 5 or 6 fields (got {fields})"
        )));
    }
    Cron::new(expression.trim())
        .with_seconds_optional()
        .parse()
        .map_err(|e| Error::Validation(format!("invalid cron expression {expression:?}: {e}")))
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::Validation(format!("unknown timezone: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cron(expression: &str, timezone: Option<&str>) -> Schedule {
        Schedule::Cron {
            expression: expression.to_string(),
            timezone: timezone.map(str::to_string),
        }
    }

    #[test]
    fn interval_floor_is_enforced() {
        let short = Schedule::Interval { interval_ms: 30_000 };
        assert!(Trigger::from_schedule(&short, Tz::UTC).is_err());
        let ok = Schedule::Interval { interval_ms: 60_000 };
        assert!(matches!(
            Trigger::from_schedule(&ok, Tz::UTC).unwrap(),
            Trigger::Interval(d) if d == Duration::from_secs(60)
        ));
    }

    #[test]
    fn cron_accepts_five_or_six_fields() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("0 */5 * * * *").is_ok());
        assert!(parse_cron("* * * *").is_err());
        assert!(parse_cron("0 0 0 * * * 2030").is_err());
        assert!(parse_cron("61 * * * *").is_err());
    }

    #[test]
    fn cron_fires_in_job_timezone() {
        // 09:00 in New York is 13:00 UTC during daylight saving time.
        let trigger = Trigger::from_schedule(&cron("0 9 * * *", Some("America/New_York")), Tz::UTC)
            .unwrap();
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(now).unwrap(),
            Utc.with_ymd_and_hms(2026, 7, 1, 13, 0, 0).unwrap()
        );
    }

    #[test]
    fn lagging_clock_does_not_refire_an_occurrence() {
        let trigger = Trigger::from_schedule(&cron("*/5 * * * *", None), Tz::UTC).unwrap();
        let fired = Utc.with_ymd_and_hms(2026, 7, 1, 12, 5, 0).unwrap();
        let lagging_now = fired - chrono::Duration::milliseconds(20);
        assert_eq!(trigger.next_after(lagging_now).unwrap(), fired);
        assert_eq!(
            trigger.next_firing(lagging_now, Some(fired)).unwrap(),
            Utc.with_ymd_and_hms(2026, 7, 1, 12, 10, 0).unwrap()
        );
        assert_eq!(trigger.next_firing(lagging_now, None).unwrap(), fired);
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(Trigger::from_schedule(&cron("0 9 * * *", Some("Mars/Olympus")), Tz::UTC).is_err());
    }
}
