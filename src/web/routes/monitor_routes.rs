use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;

use crate::db::services::monitor_service::{self, MonitorChanges, NewMonitor};
use crate::db::services::{dependency_service, run_service};
use crate::scheduling::ScheduleSpec;
use crate::web::models::monitor_models::{
    CreateDependency, CreateMonitor, DependencyResponse, ListRunsQuery, MonitorResponse,
    RunResponse, UpdateMonitor,
};
use crate::web::{AppError, AppState};

const DEFAULT_RUN_LIMIT: u64 = 50;

pub fn create_monitor_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_monitors).post(create_monitor))
        .route(
            "/{id}",
            get(get_monitor).put(update_monitor).delete(delete_monitor),
        )
        .route("/{id}/runs", get(list_runs))
        .route(
            "/{id}/dependencies",
            get(list_dependencies).post(add_dependency),
        )
        .route(
            "/{id}/dependencies/{depends_on_id}",
            delete(remove_dependency),
        )
}

#[axum::debug_handler]
async fn list_monitors(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<MonitorResponse>>, AppError> {
    let monitors = monitor_service::list_monitors(&app_state.db).await?;
    Ok(Json(monitors.into_iter().map(Into::into).collect()))
}

#[axum::debug_handler]
async fn create_monitor(
    State(app_state): State<Arc<AppState>>,
    // TODO: Add org extraction
    Json(payload): Json<CreateMonitor>,
) -> Result<(StatusCode, Json<MonitorResponse>), AppError> {
    let org_id = 1; // Hardcoded org_id
    if payload.name.trim().is_empty() {
        return Err(AppError::InvalidInput("Name must not be empty".to_string()));
    }

    let spec = ScheduleSpec::from_parts(
        payload.schedule_type,
        payload.interval_sec,
        payload.cron_expr.as_deref(),
        &payload.timezone,
    )?;
    let next_due_at = spec.next_due_at(Utc::now())?;

    let created = monitor_service::create_monitor(
        &app_state.db,
        NewMonitor {
            org_id,
            name: payload.name,
            schedule_type: payload.schedule_type,
            interval_sec: payload.interval_sec,
            cron_expr: payload.cron_expr,
            timezone: payload.timezone,
            grace_sec: payload.grace_sec,
            capture_output: payload.capture_output,
            capture_limit_kb: payload.capture_limit_kb,
            next_due_at,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

#[axum::debug_handler]
async fn get_monitor(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<MonitorResponse>, AppError> {
    let monitor = monitor_service::get_monitor_by_id(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Monitor not found".to_string()))?;
    Ok(Json(monitor.into()))
}

#[axum::debug_handler]
async fn update_monitor(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateMonitor>,
) -> Result<Json<MonitorResponse>, AppError> {
    let existing = monitor_service::get_monitor_by_id(&app_state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Monitor not found".to_string()))?;

    let schedule_changed = payload.schedule_type.is_some()
        || payload.interval_sec.is_some()
        || payload.cron_expr.is_some()
        || payload.timezone.is_some();

    let mut changes = MonitorChanges {
        name: payload.name,
        grace_sec: payload.grace_sec,
        capture_output: payload.capture_output,
        capture_limit_kb: payload.capture_limit_kb,
        status: payload.status,
        ..Default::default()
    };

    if schedule_changed {
        let schedule_type = payload.schedule_type.unwrap_or(existing.schedule_type);
        let interval_sec = payload.interval_sec.or(existing.interval_sec);
        let cron_expr = payload.cron_expr.or(existing.cron_expr);
        let timezone = payload.timezone.unwrap_or(existing.timezone);

        let spec = ScheduleSpec::from_parts(
            schedule_type,
            interval_sec,
            cron_expr.as_deref(),
            &timezone,
        )?;
        changes.next_due_at = Some(spec.next_due_at(Utc::now())?);
        changes.schedule_type = Some(schedule_type);
        changes.interval_sec = Some(interval_sec);
        changes.cron_expr = Some(cron_expr);
        changes.timezone = Some(timezone);
    }

    let updated = monitor_service::update_monitor(&app_state.db, id, changes)
        .await?
        .ok_or_else(|| AppError::NotFound("Monitor not found".to_string()))?;
    Ok(Json(updated.into()))
}

#[axum::debug_handler]
async fn delete_monitor(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let result = monitor_service::delete_monitor(&app_state.db, id).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound("Monitor not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn list_runs(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<Vec<RunResponse>>, AppError> {
    if monitor_service::get_monitor_by_id(&app_state.db, id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("Monitor not found".to_string()));
    }
    let runs = run_service::list_runs(
        &app_state.db,
        id,
        query.limit.unwrap_or(DEFAULT_RUN_LIMIT),
    )
    .await?;
    Ok(Json(runs.into_iter().map(Into::into).collect()))
}

#[axum::debug_handler]
async fn list_dependencies(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<DependencyResponse>>, AppError> {
    let edges = dependency_service::list_dependencies(&app_state.db, id).await?;
    Ok(Json(edges.into_iter().map(Into::into).collect()))
}

#[axum::debug_handler]
async fn add_dependency(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<CreateDependency>,
) -> Result<(StatusCode, Json<DependencyResponse>), AppError> {
    if monitor_service::get_monitor_by_id(&app_state.db, id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("Monitor not found".to_string()));
    }
    let edge = dependency_service::add_dependency(
        &app_state.db,
        id,
        payload.depends_on_id,
        payload.required,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(edge.into())))
}

#[axum::debug_handler]
async fn remove_dependency(
    State(app_state): State<Arc<AppState>>,
    Path((id, depends_on_id)): Path<(i32, i32)>,
) -> Result<StatusCode, AppError> {
    let result = dependency_service::remove_dependency(&app_state.db, id, depends_on_id).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound("Dependency not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}
