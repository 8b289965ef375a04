use clap::Parser;
use sea_orm::Database;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pulsewatch::alerting::MissedSweeper;
use pulsewatch::analytics::AnalyticsWorker;
use pulsewatch::db::services::IncidentService;
use pulsewatch::ingest::output::LocalOutputStore;
use pulsewatch::ingest::{PingProcessor, RateLimiter};
use pulsewatch::notifications::senders::webhook::WebhookSender;
use pulsewatch::notifications::senders::NotificationSender;
use pulsewatch::notifications::NotificationService;
use pulsewatch::server::config::ServerConfig;
use pulsewatch::web::create_axum_router;

#[derive(Parser, Debug)]
#[command(name = "pulsewatch-server", about = "Scheduled-job monitoring server")]
struct Args {
    /// Override LISTEN_ADDR from the environment.
    #[arg(long)]
    listen: Option<String>,
}

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info` level if RUST_LOG is not set.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    init_logging();

    let args = Args::parse();
    let mut config = ServerConfig::from_env()?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    let config = Arc::new(config);

    let db = Arc::new(Database::connect(&config.database_url).await?);
    info!("Connected to database");

    let mut senders: Vec<Arc<dyn NotificationSender>> = Vec::new();
    if let Some(url) = config.alert_webhook_url.clone() {
        senders.push(Arc::new(WebhookSender::new(url)));
    }
    let (notification_service, notification_handle) =
        NotificationService::start(senders, config.notification_queue_size);

    let incident_service = Arc::new(IncidentService::new(db.clone()));
    let output_store = Arc::new(LocalOutputStore::new(config.output_dir.clone()));
    let rate_limiter = Arc::new(RateLimiter::new());

    let (analytics_tx, analytics_rx) = mpsc::channel(config.analytics_queue_size);
    let analytics_handle = AnalyticsWorker::new(
        db.clone(),
        incident_service.clone(),
        notification_service.clone(),
    )
    .spawn(analytics_rx);

    let sweeper_handle = MissedSweeper::new(
        db.clone(),
        incident_service.clone(),
        notification_service.clone(),
        config.sweep_interval_secs,
    )
    .spawn();

    let ping_processor = Arc::new(PingProcessor::new(
        db.clone(),
        incident_service.clone(),
        notification_service.clone(),
        output_store,
        analytics_tx,
    ));

    let app_router = create_axum_router(
        db,
        config.clone(),
        rate_limiter,
        ping_processor,
        incident_service,
    );

    info!("HTTP server listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app_router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down background workers");
    sweeper_handle.abort();
    analytics_handle.abort();
    notification_handle.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
