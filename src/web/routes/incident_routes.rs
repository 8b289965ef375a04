use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::web::models::incident_models::{
    AckRequest, IncidentEventResponse, IncidentResponse, ListIncidentsQuery, ResolveRequest,
    SnoozeRequest,
};
use crate::web::{AppError, AppState};

const DEFAULT_INCIDENT_LIMIT: u64 = 50;

/// Snooze bounds in minutes (one minute to seven days).
const SNOOZE_MIN_MINUTES: i64 = 1;
const SNOOZE_MAX_MINUTES: i64 = 10_080;

pub fn create_incident_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_incidents))
        .route("/{id}", get(get_incident))
        .route("/{id}/events", get(list_events))
        .route("/{id}/ack", post(ack_incident))
        .route("/{id}/resolve", post(resolve_incident))
        .route("/{id}/snooze", post(snooze_incident))
}

#[axum::debug_handler]
async fn list_incidents(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ListIncidentsQuery>,
) -> Result<Json<Vec<IncidentResponse>>, AppError> {
    let incidents = app_state
        .incident_service
        .list_incidents(
            query.monitor_id,
            query.limit.unwrap_or(DEFAULT_INCIDENT_LIMIT),
        )
        .await?;
    Ok(Json(incidents.into_iter().map(Into::into).collect()))
}

#[axum::debug_handler]
async fn get_incident(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<IncidentResponse>, AppError> {
    let incident = app_state
        .incident_service
        .get_incident(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Incident not found".to_string()))?;
    Ok(Json(incident.into()))
}

#[axum::debug_handler]
async fn list_events(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<IncidentEventResponse>>, AppError> {
    if app_state.incident_service.get_incident(id).await?.is_none() {
        return Err(AppError::NotFound("Incident not found".to_string()));
    }
    let events = app_state.incident_service.list_events(id).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

#[axum::debug_handler]
async fn ack_incident(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<AckRequest>,
) -> Result<Json<IncidentResponse>, AppError> {
    let incident = app_state
        .incident_service
        .acknowledge(id, &payload.actor)
        .await?
        .ok_or_else(|| AppError::NotFound("Incident not found or not open".to_string()))?;
    Ok(Json(incident.into()))
}

#[axum::debug_handler]
async fn resolve_incident(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<ResolveRequest>,
) -> Result<Json<IncidentResponse>, AppError> {
    let incident = app_state
        .incident_service
        .resolve(id, &payload.actor, payload.note)
        .await?
        .ok_or_else(|| AppError::NotFound("Incident not found or already resolved".to_string()))?;
    Ok(Json(incident.into()))
}

#[axum::debug_handler]
async fn snooze_incident(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<SnoozeRequest>,
) -> Result<Json<IncidentResponse>, AppError> {
    if !(SNOOZE_MIN_MINUTES..=SNOOZE_MAX_MINUTES).contains(&payload.minutes) {
        return Err(AppError::InvalidInput(format!(
            "Snooze duration must be between {SNOOZE_MIN_MINUTES} and {SNOOZE_MAX_MINUTES} minutes"
        )));
    }
    let incident = app_state
        .incident_service
        .mute(id, payload.minutes, &payload.actor)
        .await?
        .ok_or_else(|| AppError::NotFound("Incident not found".to_string()))?;
    Ok(Json(incident.into()))
}
