use std::env;

#[derive(Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub listen_addr: String,
    pub output_dir: String,
    pub alert_webhook_url: Option<String>,
    pub sweep_interval_secs: u64,
    pub notification_queue_size: usize,
    pub analytics_queue_size: usize,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let listen_addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let output_dir = env::var("OUTPUT_DIR").unwrap_or_else(|_| "outputs".to_string());
        let alert_webhook_url = env::var("ALERT_WEBHOOK_URL").ok();

        let sweep_interval_secs = env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        let notification_queue_size = env::var("NOTIFICATION_QUEUE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);
        let analytics_queue_size = env::var("ANALYTICS_QUEUE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);

        Ok(ServerConfig {
            database_url,
            listen_addr,
            output_dir,
            alert_webhook_url,
            sweep_interval_secs,
            notification_queue_size,
            analytics_queue_size,
        })
    }
}
