use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::db::enums::MonitorStatus;
use crate::db::services::monitor_service;
use crate::ingest::rate_limit::{DEFAULT_LIMIT, DEFAULT_WINDOW};
use crate::ingest::PingRequest;
use crate::web::models::ping_models::{PingQuery, PingResponse};
use crate::web::{AppError, AppState};

pub fn create_ping_router() -> Router<Arc<AppState>> {
    Router::new().route("/{token}", get(ping_get).post(ping_post))
}

#[axum::debug_handler]
async fn ping_get(
    State(app_state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(query): Query<PingQuery>,
) -> Result<Json<PingResponse>, AppError> {
    handle_ping(app_state, token, query, None).await
}

#[axum::debug_handler]
async fn ping_post(
    State(app_state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(query): Query<PingQuery>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<PingResponse>, AppError> {
    // Only a text/plain body is treated as capturable job output.
    let output_body = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|ct| ct.starts_with("text/plain"))
        .map(|_| body);
    handle_ping(app_state, token, query, output_body).await
}

async fn handle_ping(
    app_state: Arc<AppState>,
    token: String,
    query: PingQuery,
    output_body: Option<String>,
) -> Result<Json<PingResponse>, AppError> {
    // Rate limiting is keyed by token and runs before the monitor lookup.
    let limit = app_state
        .rate_limiter
        .check(&token, DEFAULT_LIMIT, DEFAULT_WINDOW);
    if !limit.allowed {
        return Err(AppError::RateLimited(limit));
    }

    let monitor = monitor_service::get_monitor_by_token(&app_state.db, &token)
        .await?
        .ok_or_else(|| AppError::NotFound("Monitor not found".to_string()))?;
    if monitor.status == MonitorStatus::Disabled {
        return Err(AppError::Forbidden("Monitor is disabled".to_string()));
    }

    let outcome = app_state
        .ping_processor
        .handle_ping(
            monitor,
            PingRequest {
                state: query.state.unwrap_or_default(),
                duration_ms: query.duration_ms,
                exit_code: query.exit_code,
                output_body,
            },
        )
        .await?;

    Ok(Json(PingResponse {
        status: "ok",
        message: outcome.message,
        next_due_at: outcome.next_due_at.map(|t| t.to_rfc3339()),
    }))
}
