use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{IncidentKind, IncidentStatus};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "incidents")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub monitor_id: i32,
    pub kind: IncidentKind,
    pub status: IncidentStatus,
    pub summary: String,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub details: Option<Json>,
    pub opened_at: ChronoDateTimeUtc,
    pub acked_at: Option<ChronoDateTimeUtc>,
    pub resolved_at: Option<ChronoDateTimeUtc>,
    /// Mute window. Suppresses outbound notification, not status.
    pub suppress_until: Option<ChronoDateTimeUtc>,
    pub dedupe_hash: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::monitor::Entity",
        from = "Column::MonitorId",
        to = "super::monitor::Column::Id",
        on_delete = "Cascade"
    )]
    Monitor,
    #[sea_orm(has_many = "super::incident_event::Entity")]
    IncidentEvent,
}

impl Related<super::monitor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Monitor.def()
    }
}

impl Related<super::incident_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IncidentEvent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
