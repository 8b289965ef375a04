use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{MonitorStatus, ScheduleType};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monitors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub org_id: i32,
    pub name: String,
    /// Opaque secret used as the ping credential.
    #[sea_orm(unique)]
    pub token: String,
    pub schedule_type: ScheduleType,
    pub interval_sec: Option<i32>,
    pub cron_expr: Option<String>,
    /// IANA timezone. Display-only for INTERVAL schedules.
    pub timezone: String,
    pub grace_sec: i32,
    pub status: MonitorStatus,
    pub next_due_at: Option<ChronoDateTimeUtc>,
    pub last_run_at: Option<ChronoDateTimeUtc>,
    pub last_duration_ms: Option<i64>,
    pub last_exit_code: Option<i32>,
    pub last_output_key: Option<String>,
    pub capture_output: bool,
    pub capture_limit_kb: i32,
    // Streaming duration statistics (Welford accumulators).
    pub duration_count: i64,
    pub duration_mean: Option<f64>,
    pub duration_m2: Option<f64>,
    pub duration_min: Option<f64>,
    pub duration_max: Option<f64>,
    pub duration_median: Option<f64>,
    /// Optimistic-lock counter, bumped by every ping update.
    pub version: i64,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::run::Entity")]
    Run,
    #[sea_orm(has_many = "super::incident::Entity")]
    Incident,
}

impl Related<super::run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Run.def()
    }
}

impl Related<super::incident::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Incident.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
