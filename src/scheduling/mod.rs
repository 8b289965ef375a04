//! Schedule computation for monitors.
//!
//! A monitor is either on a fixed interval or on a cron expression evaluated
//! in the monitor's configured timezone. Schedule definitions are validated
//! when a monitor is created or updated; evaluation assumes a valid spec.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;

use crate::db::entities::monitor;
use crate::db::enums::ScheduleType;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("intervalSec is required for INTERVAL schedules")]
    MissingInterval,
    #[error("intervalSec must be positive, got {0}")]
    NonPositiveInterval(i32),
    #[error("cronExpr is required for CRON schedules")]
    MissingCronExpr,
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),
    #[error("cron expression has no upcoming occurrence: {0}")]
    NoUpcomingOccurrence(String),
}

/// A validated schedule definition, ready for evaluation.
pub enum ScheduleSpec {
    Interval {
        interval_sec: i64,
    },
    Cron {
        schedule: Box<Schedule>,
        expr: String,
        tz: Tz,
    },
}

impl ScheduleSpec {
    pub fn from_parts(
        schedule_type: ScheduleType,
        interval_sec: Option<i32>,
        cron_expr: Option<&str>,
        timezone: &str,
    ) -> Result<Self, ScheduleError> {
        match schedule_type {
            ScheduleType::Interval => {
                let secs = interval_sec.ok_or(ScheduleError::MissingInterval)?;
                if secs <= 0 {
                    return Err(ScheduleError::NonPositiveInterval(secs));
                }
                Ok(ScheduleSpec::Interval {
                    interval_sec: secs as i64,
                })
            }
            ScheduleType::Cron => {
                let expr = cron_expr.ok_or(ScheduleError::MissingCronExpr)?;
                let normalized = normalize_cron(expr);
                let schedule = Schedule::from_str(&normalized)
                    .map_err(|_| ScheduleError::InvalidCron(expr.to_string()))?;
                let tz: Tz = timezone
                    .parse()
                    .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))?;
                Ok(ScheduleSpec::Cron {
                    schedule: Box::new(schedule),
                    expr: expr.to_string(),
                    tz,
                })
            }
        }
    }

    pub fn for_monitor(monitor: &monitor::Model) -> Result<Self, ScheduleError> {
        Self::from_parts(
            monitor.schedule_type,
            monitor.interval_sec,
            monitor.cron_expr.as_deref(),
            &monitor.timezone,
        )
    }

    /// Computes the next due timestamp strictly after `from`.
    ///
    /// INTERVAL: `from + interval_sec` in UTC; the timezone field is
    /// display-only. CRON: next occurrence in the monitor's timezone, so DST
    /// transitions shift localized wall-clock schedules, not UTC offsets.
    pub fn next_due_at(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match self {
            ScheduleSpec::Interval { interval_sec } => {
                Ok(from + Duration::seconds(*interval_sec))
            }
            ScheduleSpec::Cron { schedule, expr, tz } => {
                let local_from = from.with_timezone(tz);
                let next = schedule
                    .after(&local_from)
                    .next()
                    .ok_or_else(|| ScheduleError::NoUpcomingOccurrence(expr.clone()))?;
                Ok(next.with_timezone(&Utc))
            }
        }
    }
}

/// Normalize a 5-field cron expression to the 6-field form the `cron` crate
/// expects by prepending a seconds field.
fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Validates a schedule definition without keeping the parsed form.
/// Surfaces configuration errors at monitor create/update time.
pub fn validate_schedule(
    schedule_type: ScheduleType,
    interval_sec: Option<i32>,
    cron_expr: Option<&str>,
    timezone: &str,
) -> Result<(), ScheduleError> {
    ScheduleSpec::from_parts(schedule_type, interval_sec, cron_expr, timezone).map(|_| ())
}

/// True when `now` is past the due time plus the grace period.
pub fn is_run_late(next_due_at: DateTime<Utc>, grace_sec: i32, now: DateTime<Utc>) -> bool {
    now > next_due_at + Duration::seconds(grace_sec as i64)
}
