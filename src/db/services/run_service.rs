//! Service for run records.
//!
//! A run is either opened by a `start` ping (outcome STARTED, finished in
//! place later) or created directly in a terminal state when no start ping
//! preceded the finish. Terminal runs are immutable.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};

use crate::db::entities::{prelude::*, run};
use crate::db::enums::RunOutcome;

pub async fn create_started_run(
    db: &DatabaseConnection,
    monitor_id: i32,
    now: DateTime<Utc>,
) -> Result<run::Model, DbErr> {
    run::ActiveModel {
        monitor_id: Set(monitor_id),
        started_at: Set(now),
        outcome: Set(RunOutcome::Started),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// The most recent STARTED run with no matching finish, newest first.
pub async fn latest_unfinished_run(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Option<run::Model>, DbErr> {
    Run::find()
        .filter(run::Column::MonitorId.eq(monitor_id))
        .filter(run::Column::Outcome.eq(RunOutcome::Started))
        .filter(run::Column::FinishedAt.is_null())
        .order_by_desc(run::Column::StartedAt)
        .one(db)
        .await
}

pub struct RunCompletion {
    pub finished_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub outcome: RunOutcome,
    pub output_key: Option<String>,
    pub size_bytes: Option<i64>,
}

/// Finishes a STARTED run in place.
pub async fn finish_run(
    db: &DatabaseConnection,
    started: run::Model,
    completion: RunCompletion,
) -> Result<run::Model, DbErr> {
    let mut am: run::ActiveModel = started.into();
    am.finished_at = Set(Some(completion.finished_at));
    am.duration_ms = Set(completion.duration_ms);
    am.exit_code = Set(completion.exit_code);
    am.outcome = Set(completion.outcome);
    am.output_key = Set(completion.output_key);
    am.size_bytes = Set(completion.size_bytes);
    am.update(db).await
}

/// Creates a run directly in a terminal state (no preceding start ping).
pub async fn create_terminal_run(
    db: &DatabaseConnection,
    monitor_id: i32,
    started_at: DateTime<Utc>,
    completion: RunCompletion,
) -> Result<run::Model, DbErr> {
    run::ActiveModel {
        monitor_id: Set(monitor_id),
        started_at: Set(started_at),
        finished_at: Set(Some(completion.finished_at)),
        duration_ms: Set(completion.duration_ms),
        exit_code: Set(completion.exit_code),
        outcome: Set(completion.outcome),
        output_key: Set(completion.output_key),
        size_bytes: Set(completion.size_bytes),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// Durations of the most recent successful runs, for the windowed median.
pub async fn recent_success_durations(
    db: &DatabaseConnection,
    monitor_id: i32,
    window: u64,
) -> Result<Vec<i64>, DbErr> {
    let runs = Run::find()
        .filter(run::Column::MonitorId.eq(monitor_id))
        .filter(run::Column::Outcome.eq(RunOutcome::Success))
        .filter(run::Column::DurationMs.is_not_null())
        .order_by_desc(run::Column::StartedAt)
        .limit(window)
        .all(db)
        .await?;
    Ok(runs.into_iter().filter_map(|r| r.duration_ms).collect())
}

/// Output sizes of the most recent runs that recorded one.
pub async fn recent_output_sizes(
    db: &DatabaseConnection,
    monitor_id: i32,
    window: u64,
) -> Result<Vec<i64>, DbErr> {
    let runs = Run::find()
        .filter(run::Column::MonitorId.eq(monitor_id))
        .filter(run::Column::SizeBytes.is_not_null())
        .order_by_desc(run::Column::StartedAt)
        .limit(window)
        .all(db)
        .await?;
    Ok(runs.into_iter().filter_map(|r| r.size_bytes).collect())
}

pub async fn list_runs(
    db: &DatabaseConnection,
    monitor_id: i32,
    limit: u64,
) -> Result<Vec<run::Model>, DbErr> {
    Run::find()
        .filter(run::Column::MonitorId.eq(monitor_id))
        .order_by_desc(run::Column::StartedAt)
        .limit(limit)
        .all(db)
        .await
}
