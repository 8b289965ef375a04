//! Background anomaly detection.
//!
//! The ping path enqueues a task per successful run onto a bounded channel;
//! this worker drains it off the request path. Detection failures are logged
//! and never surface to the job runner.

use sea_orm::{DatabaseConnection, DbErr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::anomaly::{self, Anomaly, OUTPUT_SAMPLE_WINDOW};
use super::welford::DurationStats;
use crate::db::services::{monitor_service, run_service, IncidentService};
use crate::notifications::{NotificationMessage, NotificationService};

/// Work item queued by the ping path after a successful run is persisted.
#[derive(Debug, Clone)]
pub struct AnalyticsTask {
    pub monitor_id: i32,
    pub run_id: i64,
    pub duration_ms: i64,
    pub size_bytes: Option<i64>,
}

pub struct AnalyticsWorker {
    db: Arc<DatabaseConnection>,
    incidents: Arc<IncidentService>,
    notifications: Arc<NotificationService>,
}

impl AnalyticsWorker {
    pub fn new(
        db: impl Into<Arc<DatabaseConnection>>,
        incidents: Arc<IncidentService>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            db: db.into(),
            incidents,
            notifications,
        }
    }

    pub fn spawn(self, rx: mpsc::Receiver<AnalyticsTask>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: mpsc::Receiver<AnalyticsTask>) {
        info!("Analytics worker started");
        while let Some(task) = rx.recv().await {
            if let Err(e) = self.process(&task).await {
                error!(
                    monitor_id = task.monitor_id,
                    run_id = task.run_id,
                    "Anomaly detection failed: {}",
                    e
                );
            }
        }
        info!("Analytics worker stopped");
    }

    async fn process(&self, task: &AnalyticsTask) -> Result<(), DbErr> {
        let Some(monitor) = monitor_service::get_monitor_by_id(&self.db, task.monitor_id).await?
        else {
            debug!(monitor_id = task.monitor_id, "Monitor deleted before analysis");
            return Ok(());
        };

        let stats = DurationStats::from_monitor(&monitor);
        let mut anomalies: Vec<Anomaly> = Vec::new();

        if let Some(found) = anomaly::detect_duration_anomaly(&stats, task.duration_ms) {
            anomalies.push(found);
        }

        if let Some(size_bytes) = task.size_bytes {
            // Newest entry is this run's own size; compare against the rest.
            let recent =
                run_service::recent_output_sizes(&self.db, task.monitor_id, OUTPUT_SAMPLE_WINDOW + 1)
                    .await?;
            let history: Vec<i64> = recent.into_iter().skip(1).collect();
            if let Some(found) = anomaly::detect_output_size_anomaly(&history, size_bytes) {
                anomalies.push(found);
            }
        }

        for found in anomalies {
            let (incident, created) = self
                .incidents
                .open_or_update_anomaly(task.monitor_id, task.run_id, &found)
                .await?;
            info!(
                monitor_id = task.monitor_id,
                incident_id = incident.id,
                severity = ?found.severity,
                created,
                "Anomaly detected: {}",
                found.message
            );
            if created {
                self.notifications.enqueue(NotificationMessage::Incident {
                    monitor: monitor.clone(),
                    incident,
                });
            }
        }
        Ok(())
    }
}
