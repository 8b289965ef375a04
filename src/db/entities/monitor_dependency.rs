use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Directed edge: `monitor_id` depends on `depends_on_id`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monitor_dependencies")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub monitor_id: i32,
    #[sea_orm(primary_key, auto_increment = false)]
    pub depends_on_id: i32,
    pub required: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::monitor::Entity",
        from = "Column::MonitorId",
        to = "super::monitor::Column::Id",
        on_delete = "Cascade",
        on_update = "Cascade"
    )]
    Monitor,
    #[sea_orm(
        belongs_to = "super::monitor::Entity",
        from = "Column::DependsOnId",
        to = "super::monitor::Column::Id",
        on_delete = "Cascade",
        on_update = "Cascade"
    )]
    DependsOn,
}

impl ActiveModelBehavior for ActiveModel {}
