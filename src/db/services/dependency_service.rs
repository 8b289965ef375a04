//! Service for monitor dependency edges.
//!
//! Edges are what the cascade suppressor traverses; cycle-creating writes are
//! rejected here so traversal bounds are a backstop, not the only defense.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, DeleteResult, EntityTrait,
    QueryFilter, Set,
};
use thiserror::Error;

use crate::cascade;
use crate::db::entities::{monitor_dependency, prelude::*};

#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("monitor {0} not found")]
    MonitorNotFound(i32),
    #[error("dependency from {monitor_id} to {depends_on_id} would create a cycle")]
    CycleDetected { monitor_id: i32, depends_on_id: i32 },
}

pub async fn list_dependencies(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Vec<monitor_dependency::Model>, DbErr> {
    MonitorDependency::find()
        .filter(monitor_dependency::Column::MonitorId.eq(monitor_id))
        .all(db)
        .await
}

pub async fn add_dependency(
    db: &DatabaseConnection,
    monitor_id: i32,
    depends_on_id: i32,
    required: bool,
) -> Result<monitor_dependency::Model, DependencyError> {
    if Monitor::find_by_id(depends_on_id).one(db).await?.is_none() {
        return Err(DependencyError::MonitorNotFound(depends_on_id));
    }
    if cascade::would_create_cycle(db, monitor_id, depends_on_id).await? {
        return Err(DependencyError::CycleDetected {
            monitor_id,
            depends_on_id,
        });
    }

    let edge = monitor_dependency::ActiveModel {
        monitor_id: Set(monitor_id),
        depends_on_id: Set(depends_on_id),
        required: Set(required),
    }
    .insert(db)
    .await?;
    Ok(edge)
}

pub async fn remove_dependency(
    db: &DatabaseConnection,
    monitor_id: i32,
    depends_on_id: i32,
) -> Result<DeleteResult, DbErr> {
    MonitorDependency::delete_many()
        .filter(monitor_dependency::Column::MonitorId.eq(monitor_id))
        .filter(monitor_dependency::Column::DependsOnId.eq(depends_on_id))
        .exec(db)
        .await
}
