//! Service for managing monitors.
//!
//! Provides CRUD operations plus the versioned read-modify-write used by the
//! ping path: every ping update is guarded by the monitor's `version` column
//! so two racing pings for the same token cannot lose a statistics update.

use chrono::{DateTime, Utc};
use rand::{distr::Alphanumeric, Rng};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, DeleteResult, EntityTrait,
    QueryFilter, Set,
};

use crate::analytics::welford::DurationStats;
use crate::db::entities::{monitor, prelude::*};
use crate::db::enums::{MonitorStatus, ScheduleType};

/// Length of generated ping tokens.
const TOKEN_LEN: usize = 32;

pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Fields resolved by the caller before insertion. Schedule validation and
/// the initial `next_due_at` computation happen at the web boundary.
pub struct NewMonitor {
    pub org_id: i32,
    pub name: String,
    pub schedule_type: ScheduleType,
    pub interval_sec: Option<i32>,
    pub cron_expr: Option<String>,
    pub timezone: String,
    pub grace_sec: i32,
    pub capture_output: bool,
    pub capture_limit_kb: i32,
    pub next_due_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MonitorChanges {
    pub name: Option<String>,
    pub schedule_type: Option<ScheduleType>,
    pub interval_sec: Option<Option<i32>>,
    pub cron_expr: Option<Option<String>>,
    pub timezone: Option<String>,
    pub grace_sec: Option<i32>,
    pub capture_output: Option<bool>,
    pub capture_limit_kb: Option<i32>,
    pub status: Option<MonitorStatus>,
    pub next_due_at: Option<DateTime<Utc>>,
}

/// The single read-modify-write applied per finished ping: status, schedule,
/// last-run snapshot and (for successful runs) streaming statistics.
pub struct PingUpdate {
    pub status: MonitorStatus,
    pub next_due_at: DateTime<Utc>,
    pub last_run_at: DateTime<Utc>,
    pub last_duration_ms: Option<i64>,
    pub last_exit_code: Option<i32>,
    pub last_output_key: Option<String>,
    pub stats: Option<DurationStats>,
}

pub async fn create_monitor(
    db: &DatabaseConnection,
    data: NewMonitor,
) -> Result<monitor::Model, DbErr> {
    let now = Utc::now();
    let new_monitor = monitor::ActiveModel {
        org_id: Set(data.org_id),
        name: Set(data.name),
        token: Set(generate_token()),
        schedule_type: Set(data.schedule_type),
        interval_sec: Set(data.interval_sec),
        cron_expr: Set(data.cron_expr),
        timezone: Set(data.timezone),
        grace_sec: Set(data.grace_sec),
        status: Set(MonitorStatus::Ok),
        next_due_at: Set(Some(data.next_due_at)),
        capture_output: Set(data.capture_output),
        capture_limit_kb: Set(data.capture_limit_kb),
        duration_count: Set(0),
        version: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    new_monitor.insert(db).await
}

pub async fn get_monitor_by_id(
    db: &DatabaseConnection,
    id: i32,
) -> Result<Option<monitor::Model>, DbErr> {
    Monitor::find_by_id(id).one(db).await
}

pub async fn get_monitor_by_token(
    db: &DatabaseConnection,
    token: &str,
) -> Result<Option<monitor::Model>, DbErr> {
    Monitor::find()
        .filter(monitor::Column::Token.eq(token))
        .one(db)
        .await
}

pub async fn list_monitors(db: &DatabaseConnection) -> Result<Vec<monitor::Model>, DbErr> {
    Monitor::find().all(db).await
}

pub async fn update_monitor(
    db: &DatabaseConnection,
    id: i32,
    changes: MonitorChanges,
) -> Result<Option<monitor::Model>, DbErr> {
    let Some(existing) = Monitor::find_by_id(id).one(db).await? else {
        return Ok(None);
    };

    let mut am: monitor::ActiveModel = existing.into();
    if let Some(name) = changes.name {
        am.name = Set(name);
    }
    if let Some(schedule_type) = changes.schedule_type {
        am.schedule_type = Set(schedule_type);
    }
    if let Some(interval_sec) = changes.interval_sec {
        am.interval_sec = Set(interval_sec);
    }
    if let Some(cron_expr) = changes.cron_expr {
        am.cron_expr = Set(cron_expr);
    }
    if let Some(timezone) = changes.timezone {
        am.timezone = Set(timezone);
    }
    if let Some(grace_sec) = changes.grace_sec {
        am.grace_sec = Set(grace_sec);
    }
    if let Some(capture_output) = changes.capture_output {
        am.capture_output = Set(capture_output);
    }
    if let Some(capture_limit_kb) = changes.capture_limit_kb {
        am.capture_limit_kb = Set(capture_limit_kb);
    }
    if let Some(status) = changes.status {
        am.status = Set(status);
    }
    if let Some(next_due_at) = changes.next_due_at {
        am.next_due_at = Set(Some(next_due_at));
    }
    am.updated_at = Set(Utc::now());
    am.update(db).await.map(Some)
}

pub async fn delete_monitor(db: &DatabaseConnection, id: i32) -> Result<DeleteResult, DbErr> {
    Monitor::delete_by_id(id).exec(db).await
}

/// Applies a ping update with optimistic concurrency: the write only lands if
/// the monitor row still carries the version the caller read. Returns `false`
/// when a concurrent ping won the race; callers re-read and retry.
pub async fn apply_ping_update(
    db: &DatabaseConnection,
    snapshot: &monitor::Model,
    update: PingUpdate,
) -> Result<bool, DbErr> {
    let mut am = monitor::ActiveModel {
        status: Set(update.status),
        next_due_at: Set(Some(update.next_due_at)),
        last_run_at: Set(Some(update.last_run_at)),
        last_duration_ms: Set(update.last_duration_ms),
        last_exit_code: Set(update.last_exit_code),
        last_output_key: Set(update.last_output_key),
        version: Set(snapshot.version + 1),
        updated_at: Set(update.last_run_at),
        ..Default::default()
    };
    if let Some(stats) = update.stats {
        am.duration_count = Set(stats.count);
        am.duration_mean = Set(stats.mean);
        am.duration_m2 = Set(stats.m2);
        am.duration_min = Set(stats.min);
        am.duration_max = Set(stats.max);
        am.duration_median = Set(stats.median);
    }

    let result = Monitor::update_many()
        .set(am)
        .filter(monitor::Column::Id.eq(snapshot.id))
        .filter(monitor::Column::Version.eq(snapshot.version))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Transitions an overdue monitor to MISSED. Guarded on the current status so
/// the sweeper is idempotent and never clobbers a ping that raced it.
pub async fn mark_missed(db: &DatabaseConnection, id: i32) -> Result<bool, DbErr> {
    let result = Monitor::update_many()
        .col_expr(monitor::Column::Status, Expr::value(MonitorStatus::Missed))
        .col_expr(
            monitor::Column::Version,
            Expr::col(monitor::Column::Version).add(1),
        )
        .col_expr(monitor::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(monitor::Column::Id.eq(id))
        .filter(
            monitor::Column::Status.is_in([MonitorStatus::Ok, MonitorStatus::Late]),
        )
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Candidates for the MISSED sweep: enabled monitors whose due time has
/// passed. The grace period is applied by the caller (it is per-monitor).
pub async fn find_overdue_candidates(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
) -> Result<Vec<monitor::Model>, DbErr> {
    Monitor::find()
        .filter(monitor::Column::Status.is_in([MonitorStatus::Ok, MonitorStatus::Late]))
        .filter(monitor::Column::NextDueAt.lt(now))
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn snapshot(version: i64) -> monitor::Model {
        monitor::Model {
            id: 1,
            org_id: 1,
            name: "db-backup".to_string(),
            token: "t".to_string(),
            schedule_type: ScheduleType::Interval,
            interval_sec: Some(3600),
            cron_expr: None,
            timezone: "UTC".to_string(),
            grace_sec: 300,
            status: MonitorStatus::Ok,
            next_due_at: None,
            last_run_at: None,
            last_duration_ms: None,
            last_exit_code: None,
            last_output_key: None,
            capture_output: false,
            capture_limit_kb: 32,
            duration_count: 10,
            duration_mean: Some(1000.0),
            duration_m2: Some(90_000.0),
            duration_min: Some(900.0),
            duration_max: Some(1100.0),
            duration_median: Some(1000.0),
            version,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ping_update() -> PingUpdate {
        PingUpdate {
            status: MonitorStatus::Ok,
            next_due_at: Utc::now(),
            last_run_at: Utc::now(),
            last_duration_ms: Some(1200),
            last_exit_code: Some(0),
            last_output_key: None,
            stats: None,
        }
    }

    #[tokio::test]
    async fn ping_update_lands_when_the_version_still_matches() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        assert!(apply_ping_update(&db, &snapshot(3), ping_update())
            .await
            .unwrap());
        // The write is guarded on both id and the version the caller read.
        let log = db.into_transaction_log();
        assert!(format!("{log:?}").contains("version"));
    }

    #[tokio::test]
    async fn ping_update_reports_a_lost_version_race() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        assert!(!apply_ping_update(&db, &snapshot(3), ping_update())
            .await
            .unwrap());
    }
}
