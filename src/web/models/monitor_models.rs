use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::entities::{monitor, monitor_dependency, run};
use crate::db::enums::{MonitorStatus, RunOutcome, ScheduleType};

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_grace_sec() -> i32 {
    300
}

fn default_capture_limit_kb() -> i32 {
    32
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMonitor {
    pub name: String,
    pub schedule_type: ScheduleType,
    pub interval_sec: Option<i32>,
    pub cron_expr: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_grace_sec")]
    pub grace_sec: i32,
    #[serde(default)]
    pub capture_output: bool,
    #[serde(default = "default_capture_limit_kb")]
    pub capture_limit_kb: i32,
}

/// Partial update; absent fields are left untouched. Changing any schedule
/// field revalidates the schedule and recomputes `next_due_at`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMonitor {
    pub name: Option<String>,
    pub schedule_type: Option<ScheduleType>,
    pub interval_sec: Option<i32>,
    pub cron_expr: Option<String>,
    pub timezone: Option<String>,
    pub grace_sec: Option<i32>,
    pub capture_output: Option<bool>,
    pub capture_limit_kb: Option<i32>,
    pub status: Option<MonitorStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationStatsResponse {
    pub count: i64,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResponse {
    pub id: i32,
    pub name: String,
    pub token: String,
    pub schedule_type: ScheduleType,
    pub interval_sec: Option<i32>,
    pub cron_expr: Option<String>,
    pub timezone: String,
    pub grace_sec: i32,
    pub status: MonitorStatus,
    pub next_due_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<i64>,
    pub last_exit_code: Option<i32>,
    pub capture_output: bool,
    pub capture_limit_kb: i32,
    pub duration_stats: DurationStatsResponse,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<monitor::Model> for MonitorResponse {
    fn from(m: monitor::Model) -> Self {
        let stats = crate::analytics::welford::DurationStats::from_monitor(&m);
        Self {
            id: m.id,
            name: m.name,
            token: m.token,
            schedule_type: m.schedule_type,
            interval_sec: m.interval_sec,
            cron_expr: m.cron_expr,
            timezone: m.timezone,
            grace_sec: m.grace_sec,
            status: m.status,
            next_due_at: m.next_due_at,
            last_run_at: m.last_run_at,
            last_duration_ms: m.last_duration_ms,
            last_exit_code: m.last_exit_code,
            capture_output: m.capture_output,
            capture_limit_kb: m.capture_limit_kb,
            duration_stats: DurationStatsResponse {
                count: stats.count,
                mean: stats.mean,
                stddev: stats.stddev(),
                min: stats.min,
                max: stats.max,
                median: stats.median,
            },
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub id: i64,
    pub monitor_id: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub outcome: RunOutcome,
    pub output_key: Option<String>,
    pub size_bytes: Option<i64>,
}

impl From<run::Model> for RunResponse {
    fn from(r: run::Model) -> Self {
        Self {
            id: r.id,
            monitor_id: r.monitor_id,
            started_at: r.started_at,
            finished_at: r.finished_at,
            duration_ms: r.duration_ms,
            exit_code: r.exit_code,
            outcome: r.outcome,
            output_key: r.output_key,
            size_bytes: r.size_bytes,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDependency {
    pub depends_on_id: i32,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyResponse {
    pub monitor_id: i32,
    pub depends_on_id: i32,
    pub required: bool,
}

impl From<monitor_dependency::Model> for DependencyResponse {
    fn from(d: monitor_dependency::Model) -> Self {
        Self {
            monitor_id: d.monitor_id,
            depends_on_id: d.depends_on_id,
            required: d.required,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_monitor_defaults() {
        let payload: CreateMonitor = serde_json::from_str(
            r#"{"name":"backup","scheduleType":"INTERVAL","intervalSec":3600}"#,
        )
        .unwrap();
        assert_eq!(payload.schedule_type, ScheduleType::Interval);
        assert_eq!(payload.timezone, "UTC");
        assert_eq!(payload.grace_sec, 300);
        assert!(!payload.capture_output);
        assert_eq!(payload.capture_limit_kb, 32);
    }
}
