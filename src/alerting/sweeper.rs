//! Periodic sweep that detects monitors whose runs never arrived.
//!
//! A monitor with no ping past `next_due_at + grace` transitions to MISSED,
//! gets a synthetic MISSED run for the audit trail and a MISSED incident
//! through the cascade path. The status transition is guarded, so a ping
//! racing the sweep wins and the sweep skips that monitor.

use chrono::Utc;
use sea_orm::{DatabaseConnection, DbErr};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db::enums::{IncidentKind, RunOutcome};
use crate::db::services::run_service::{self, RunCompletion};
use crate::db::services::{monitor_service, IncidentService};
use crate::notifications::NotificationService;
use crate::scheduling;

pub struct MissedSweeper {
    db: Arc<DatabaseConnection>,
    incidents: Arc<IncidentService>,
    notifications: Arc<NotificationService>,
    interval: Duration,
}

impl MissedSweeper {
    pub fn new(
        db: impl Into<Arc<DatabaseConnection>>,
        incidents: Arc<IncidentService>,
        notifications: Arc<NotificationService>,
        interval_secs: u64,
    ) -> Self {
        Self {
            db: db.into(),
            incidents,
            notifications,
            interval: Duration::from_secs(interval_secs),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Missed-run sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(0) => {}
                Ok(count) => info!(count, "Marked monitors as MISSED"),
                Err(e) => error!("Missed-run sweep failed: {}", e),
            }
        }
    }

    /// One sweep cycle. Returns how many monitors were newly marked MISSED.
    pub async fn sweep(&self) -> Result<usize, DbErr> {
        let now = Utc::now();
        let candidates = monitor_service::find_overdue_candidates(&self.db, now).await?;

        let mut missed = 0usize;
        for monitor in candidates {
            let Some(due) = monitor.next_due_at else {
                continue;
            };
            // Grace is per-monitor; the query only pre-filters on due time.
            if !scheduling::is_run_late(due, monitor.grace_sec, now) {
                continue;
            }
            if !monitor_service::mark_missed(&self.db, monitor.id).await? {
                continue;
            }

            run_service::create_terminal_run(
                &self.db,
                monitor.id,
                due,
                RunCompletion {
                    finished_at: now,
                    duration_ms: None,
                    exit_code: None,
                    outcome: RunOutcome::Missed,
                    output_key: None,
                    size_bytes: None,
                },
            )
            .await?;

            let summary = format!("No ping received: run due {} was missed", due.to_rfc3339());
            self.incidents
                .open_with_cascade(
                    &self.notifications,
                    &monitor,
                    IncidentKind::Missed,
                    summary,
                    Some(json!({ "dueAt": due })),
                )
                .await?;
            missed += 1;
        }
        Ok(missed)
    }
}
