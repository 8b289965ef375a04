use axum::{http::Method, routing::get, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::db::services::IncidentService;
use crate::ingest::{PingProcessor, RateLimiter};
use crate::server::config::ServerConfig;

pub mod error;
pub mod models;
pub mod routes;

pub use error::AppError;

use routes::{incident_routes, monitor_routes, ping_routes};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<ServerConfig>,
    pub rate_limiter: Arc<RateLimiter>,
    pub ping_processor: Arc<PingProcessor>,
    pub incident_service: Arc<IncidentService>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(
    db: Arc<DatabaseConnection>,
    config: Arc<ServerConfig>,
    rate_limiter: Arc<RateLimiter>,
    ping_processor: Arc<PingProcessor>,
    incident_service: Arc<IncidentService>,
) -> Router {
    let app_state = Arc::new(AppState {
        db,
        config,
        rate_limiter,
        ping_processor,
        incident_service,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest("/ping", ping_routes::create_ping_router())
        .nest("/api/monitors", monitor_routes::create_monitor_router())
        .nest("/api/incidents", incident_routes::create_incident_router())
        .with_state(app_state)
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::output::LocalOutputStore;
    use crate::notifications::NotificationService;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sea_orm::{DatabaseBackend, MockDatabase};
    use tower::util::ServiceExt;

    fn test_config() -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            database_url: "postgres://unused".to_string(),
            listen_addr: "127.0.0.1:0".to_string(),
            output_dir: "outputs".to_string(),
            alert_webhook_url: None,
            sweep_interval_secs: 60,
            notification_queue_size: 8,
            analytics_queue_size: 8,
        })
    }

    fn test_router(db: DatabaseConnection, rate_limiter: Arc<RateLimiter>) -> Router {
        let db = Arc::new(db);
        let (notifications, _handle) = NotificationService::start(Vec::new(), 8);
        let incidents = Arc::new(IncidentService::new(db.clone()));
        let (analytics_tx, _analytics_rx) = tokio::sync::mpsc::channel(8);
        let processor = Arc::new(PingProcessor::new(
            db.clone(),
            incidents.clone(),
            notifications,
            Arc::new(LocalOutputStore::new(std::env::temp_dir())),
            analytics_tx,
        ));
        create_axum_router(db, test_config(), rate_limiter, processor, incidents)
    }

    #[tokio::test]
    async fn health_check_responds_ok() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let router = test_router(db, Arc::new(RateLimiter::new()));

        let response = router
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_ping_token_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<crate::db::entities::monitor::Model>::new()])
            .into_connection();
        let router = test_router(db, Arc::new(RateLimiter::new()));

        let response = router
            .oneshot(Request::get("/ping/nosuchtoken").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn exhausted_rate_limit_returns_429_with_headers() {
        use crate::ingest::rate_limit::{DEFAULT_LIMIT, DEFAULT_WINDOW};

        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let rate_limiter = Arc::new(RateLimiter::new());
        for _ in 0..DEFAULT_LIMIT {
            rate_limiter.check("tok", DEFAULT_LIMIT, DEFAULT_WINDOW);
        }
        let router = test_router(db, rate_limiter);

        let response = router
            .oneshot(Request::get("/ping/tok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("X-RateLimit-Remaining").unwrap(),
            "0"
        );
        assert!(response.headers().contains_key("X-RateLimit-Reset"));
    }

    #[tokio::test]
    async fn missing_monitor_lookup_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<crate::db::entities::monitor::Model>::new()])
            .into_connection();
        let router = test_router(db, Arc::new(RateLimiter::new()));

        let response = router
            .oneshot(Request::get("/api/monitors/999").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
