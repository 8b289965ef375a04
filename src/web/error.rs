use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::db::services::DependencyError;
use crate::ingest::{PingError, RateLimitResult};
use crate::scheduling::ScheduleError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Rate limit exceeded")]
    RateLimited(RateLimitResult),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::RateLimited(result) => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({
                        "error": "Rate limit exceeded",
                        "limit": result.limit,
                        "resetAt": result.reset_at.to_rfc3339(),
                    })),
                )
                    .into_response();
                let headers = response.headers_mut();
                headers.insert("X-RateLimit-Limit", header_value(result.limit));
                headers.insert("X-RateLimit-Remaining", header_value(result.remaining));
                headers.insert(
                    "X-RateLimit-Reset",
                    header_value(result.reset_at.timestamp()),
                );
                return response;
            }
            // 500-class detail is logged, never echoed to the caller.
            AppError::DatabaseError(msg) => {
                error!("Database error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::InternalServerError(msg) => {
                error!("Internal server error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

fn header_value(value: impl ToString) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

impl From<PingError> for AppError {
    fn from(err: PingError) -> Self {
        match err {
            PingError::Database(e) => AppError::DatabaseError(e.to_string()),
            other => AppError::InternalServerError(other.to_string()),
        }
    }
}

impl From<DependencyError> for AppError {
    fn from(err: DependencyError) -> Self {
        match err {
            DependencyError::Database(e) => AppError::DatabaseError(e.to_string()),
            DependencyError::MonitorNotFound(id) => {
                AppError::NotFound(format!("Monitor {id} not found"))
            }
            cycle @ DependencyError::CycleDetected { .. } => {
                AppError::InvalidInput(cycle.to_string())
            }
        }
    }
}
