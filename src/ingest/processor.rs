//! Ping processing: the write path driven by job runners.
//!
//! A ping either opens a run (`start`) or closes one (`success`/`fail`).
//! Closing a run classifies the outcome, persists the run record, applies the
//! versioned monitor update, drives incident transitions and hands analytics
//! off to the background worker.

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::output::{output_key, truncate_output, OutputStore, Redactor};
use crate::analytics::welford::{median_of, DurationStats, MEDIAN_WINDOW};
use crate::analytics::AnalyticsTask;
use crate::db::entities::{monitor, run};
use crate::db::enums::{IncidentKind, MonitorStatus, RunOutcome};
use crate::db::services::monitor_service::{self, PingUpdate};
use crate::db::services::run_service::{self, RunCompletion};
use crate::db::services::IncidentService;
use crate::notifications::NotificationService;
use crate::scheduling::{self, ScheduleError, ScheduleSpec};

/// Attempts at the versioned monitor update before giving up.
const MAX_UPDATE_ATTEMPTS: usize = 5;

/// Output uploads are bounded so storage latency cannot stall the ping.
const OUTPUT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingState {
    Start,
    #[default]
    Success,
    Fail,
}

#[derive(Debug, Default)]
pub struct PingRequest {
    pub state: PingState,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub output_body: Option<String>,
}

#[derive(Debug)]
pub struct PingOutcome {
    pub run: run::Model,
    pub monitor_status: MonitorStatus,
    pub next_due_at: Option<DateTime<Utc>>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum PingError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("stored schedule is invalid: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("monitor update contended beyond retry budget")]
    UpdateContended,
}

pub struct PingProcessor {
    db: Arc<DatabaseConnection>,
    incidents: Arc<IncidentService>,
    notifications: Arc<NotificationService>,
    output_store: Arc<dyn OutputStore>,
    redactor: Redactor,
    analytics_tx: mpsc::Sender<AnalyticsTask>,
}

impl PingProcessor {
    pub fn new(
        db: impl Into<Arc<DatabaseConnection>>,
        incidents: Arc<IncidentService>,
        notifications: Arc<NotificationService>,
        output_store: Arc<dyn OutputStore>,
        analytics_tx: mpsc::Sender<AnalyticsTask>,
    ) -> Self {
        Self {
            db: db.into(),
            incidents,
            notifications,
            output_store,
            redactor: Redactor::new(),
            analytics_tx,
        }
    }

    pub async fn handle_ping(
        &self,
        monitor: monitor::Model,
        request: PingRequest,
    ) -> Result<PingOutcome, PingError> {
        let now = Utc::now();

        if request.state == PingState::Start {
            let run = run_service::create_started_run(&self.db, monitor.id, now).await?;
            debug!(monitor_id = monitor.id, run_id = run.id, "Start ping recorded");
            return Ok(PingOutcome {
                run,
                monitor_status: monitor.status,
                next_due_at: monitor.next_due_at,
                message: "Run started".to_string(),
            });
        }

        let started = run_service::latest_unfinished_run(&self.db, monitor.id).await?;

        // Explicit duration wins; otherwise derive it from the start ping.
        let duration_ms = request.duration_ms.or_else(|| {
            started
                .as_ref()
                .map(|r| (now - r.started_at).num_milliseconds().max(0))
        });
        let exit_code = request
            .exit_code
            .unwrap_or(if request.state == PingState::Fail { 1 } else { 0 });

        let output_capture = self.capture_output(&monitor, request.output_body, now).await;

        let outcome = if request.state == PingState::Fail {
            RunOutcome::Fail
        } else if monitor
            .next_due_at
            .is_some_and(|due| scheduling::is_run_late(due, monitor.grace_sec, now))
        {
            RunOutcome::Late
        } else {
            RunOutcome::Success
        };

        let completion = RunCompletion {
            finished_at: now,
            duration_ms,
            exit_code: Some(exit_code),
            outcome,
            output_key: output_capture.key.clone(),
            size_bytes: output_capture.size_bytes,
        };
        let run = match started {
            Some(started) => run_service::finish_run(&self.db, started, completion).await?,
            None => run_service::create_terminal_run(&self.db, monitor.id, now, completion).await?,
        };

        let status = match outcome {
            RunOutcome::Fail => MonitorStatus::Failing,
            RunOutcome::Late => MonitorStatus::Late,
            _ => MonitorStatus::Ok,
        };
        let next_due_at = ScheduleSpec::for_monitor(&monitor)?.next_due_at(now)?;

        self.apply_update_with_retry(&monitor, &run, status, next_due_at, now)
            .await?;

        match outcome {
            RunOutcome::Success => {
                self.incidents.auto_resolve_failures(monitor.id).await?;
            }
            RunOutcome::Fail => {
                let summary = format!("Job failed with exit code {exit_code}");
                let details = run.output_key.as_ref().map(|key| json!({ "outputKey": key }));
                self.incidents
                    .open_with_cascade(&self.notifications, &monitor, IncidentKind::Fail, summary, details)
                    .await?;
            }
            RunOutcome::Late => {
                let lateness_sec = monitor
                    .next_due_at
                    .map(|due| (now - due).num_seconds().max(0))
                    .unwrap_or(0);
                let summary = format!("Job completed but was late by {lateness_sec}s");
                self.incidents
                    .open_with_cascade(&self.notifications, &monitor, IncidentKind::Late, summary, None)
                    .await?;
            }
            _ => {}
        }

        if outcome == RunOutcome::Success {
            if let Some(duration_ms) = duration_ms.filter(|d| *d > 0) {
                let task = AnalyticsTask {
                    monitor_id: monitor.id,
                    run_id: run.id,
                    duration_ms,
                    size_bytes: output_capture.size_bytes,
                };
                if let Err(e) = self.analytics_tx.try_send(task) {
                    warn!(monitor_id = monitor.id, "Analytics queue full, skipping: {}", e);
                }
            }
        }

        info!(
            monitor_id = monitor.id,
            run_id = run.id,
            outcome = %outcome,
            "Ping processed"
        );
        Ok(PingOutcome {
            run,
            monitor_status: status,
            next_due_at: Some(next_due_at),
            message: match outcome {
                RunOutcome::Fail => "Failure recorded".to_string(),
                RunOutcome::Late => "Run recorded (late)".to_string(),
                _ => "Run recorded".to_string(),
            },
        })
    }

    /// Redacts, truncates and stores the request body when the monitor has
    /// capture enabled. Storage failures degrade to an uncaptured run.
    async fn capture_output(
        &self,
        monitor: &monitor::Model,
        body: Option<String>,
        now: DateTime<Utc>,
    ) -> OutputCapture {
        let Some(body) = body.filter(|b| monitor.capture_output && !b.is_empty()) else {
            return OutputCapture::default();
        };

        let size_bytes = body.len() as i64;
        let redacted = self.redactor.redact(&body);
        let stored = truncate_output(&redacted, monitor.capture_limit_kb);
        let key = output_key(monitor.id, now.timestamp_millis());

        match tokio::time::timeout(
            OUTPUT_UPLOAD_TIMEOUT,
            self.output_store.upload(&key, stored.as_bytes()),
        )
        .await
        {
            Ok(Ok(())) => OutputCapture {
                key: Some(key),
                size_bytes: Some(size_bytes),
            },
            Ok(Err(e)) => {
                warn!(monitor_id = monitor.id, "Output upload failed: {}", e);
                OutputCapture {
                    key: None,
                    size_bytes: Some(size_bytes),
                }
            }
            Err(_) => {
                warn!(monitor_id = monitor.id, "Output upload timed out");
                OutputCapture {
                    key: None,
                    size_bytes: Some(size_bytes),
                }
            }
        }
    }

    /// Versioned monitor update with bounded retry. Each attempt recomputes
    /// the streaming statistics from the freshest snapshot so a racing ping
    /// cannot make this one fold its sample into stale aggregates.
    async fn apply_update_with_retry(
        &self,
        monitor: &monitor::Model,
        run: &run::Model,
        status: MonitorStatus,
        next_due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), PingError> {
        let mut snapshot = monitor.clone();

        for attempt in 0..MAX_UPDATE_ATTEMPTS {
            let stats = if run.outcome == RunOutcome::Success {
                match run.duration_ms.filter(|d| *d > 0) {
                    Some(duration_ms) => {
                        let mut stats =
                            DurationStats::from_monitor(&snapshot).update(duration_ms as f64);
                        let window =
                            run_service::recent_success_durations(&self.db, monitor.id, MEDIAN_WINDOW)
                                .await?;
                        stats.median = median_of(&window).or(stats.median);
                        Some(stats)
                    }
                    None => None,
                }
            } else {
                None
            };

            let update = PingUpdate {
                status,
                next_due_at,
                last_run_at: now,
                last_duration_ms: run.duration_ms,
                last_exit_code: run.exit_code,
                last_output_key: run.output_key.clone(),
                stats,
            };
            if monitor_service::apply_ping_update(&self.db, &snapshot, update).await? {
                return Ok(());
            }

            debug!(
                monitor_id = monitor.id,
                attempt, "Lost monitor update race, re-reading"
            );
            snapshot = monitor_service::get_monitor_by_id(&self.db, monitor.id)
                .await?
                .ok_or_else(|| DbErr::RecordNotFound(format!("monitor {}", monitor.id)))?;
        }

        warn!(monitor_id = monitor.id, "Monitor update contended beyond retry budget");
        Err(PingError::UpdateContended)
    }
}

#[derive(Debug, Default)]
struct OutputCapture {
    key: Option<String>,
    size_bytes: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::incident;
    use crate::db::enums::ScheduleType;
    use crate::ingest::output::LocalOutputStore;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase, MockExecResult};

    fn monitor_fixture(version: i64) -> monitor::Model {
        monitor::Model {
            id: 1,
            org_id: 1,
            name: "db-backup".to_string(),
            token: "t".to_string(),
            schedule_type: ScheduleType::Interval,
            interval_sec: Some(3600),
            cron_expr: None,
            timezone: "UTC".to_string(),
            grace_sec: 300,
            status: MonitorStatus::Ok,
            next_due_at: None,
            last_run_at: None,
            last_duration_ms: None,
            last_exit_code: None,
            last_output_key: None,
            capture_output: false,
            capture_limit_kb: 32,
            duration_count: 10,
            duration_mean: Some(1000.0),
            duration_m2: Some(90_000.0),
            duration_min: Some(900.0),
            duration_max: Some(1100.0),
            duration_median: Some(1000.0),
            version,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn success_run(id: i64, duration_ms: i64) -> run::Model {
        let now = Utc::now();
        run::Model {
            id,
            monitor_id: 1,
            started_at: now,
            finished_at: Some(now),
            duration_ms: Some(duration_ms),
            exit_code: Some(0),
            outcome: RunOutcome::Success,
            output_key: None,
            size_bytes: None,
        }
    }

    fn processor_with(
        db: Arc<DatabaseConnection>,
        analytics_tx: mpsc::Sender<AnalyticsTask>,
    ) -> PingProcessor {
        let (notifications, _handle) = NotificationService::start(Vec::new(), 8);
        PingProcessor::new(
            db.clone(),
            Arc::new(IncidentService::new(db)),
            notifications,
            Arc::new(LocalOutputStore::new(std::env::temp_dir())),
            analytics_tx,
        )
    }

    // A ping that loses the versioned update race re-reads the monitor,
    // recomputes the statistics from the fresh snapshot and lands the write
    // on the next attempt.
    #[tokio::test]
    async fn lost_update_race_is_retried_with_a_fresh_snapshot() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                // no unfinished start run
                .append_query_results([Vec::<run::Model>::new()])
                // terminal run insert
                .append_query_results([vec![success_run(42, 1200)]])
                // median window, first attempt
                .append_query_results([vec![success_run(41, 1000)]])
                // re-read after the lost race
                .append_query_results([vec![monitor_fixture(4)]])
                // median window, second attempt
                .append_query_results([vec![success_run(41, 1000)]])
                // no open incidents to auto-resolve
                .append_query_results([Vec::<incident::Model>::new()])
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                ])
                .into_connection(),
        );
        let (analytics_tx, mut analytics_rx) = mpsc::channel(8);
        let processor = processor_with(db, analytics_tx);

        let outcome = processor
            .handle_ping(
                monitor_fixture(3),
                PingRequest {
                    state: PingState::Success,
                    duration_ms: Some(1200),
                    exit_code: Some(0),
                    output_body: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.monitor_status, MonitorStatus::Ok);
        assert!(outcome.next_due_at.is_some());
        let task = analytics_rx.try_recv().unwrap();
        assert_eq!(task.run_id, 42);
        assert_eq!(task.duration_ms, 1200);
    }

    // Five straight version losses exhaust the retry budget.
    #[tokio::test]
    async fn contention_beyond_the_retry_budget_is_an_error() {
        let mut mock = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<run::Model>::new()])
            .append_query_results([vec![success_run(42, 1200)]]);
        for attempt in 0..MAX_UPDATE_ATTEMPTS {
            mock = mock
                .append_query_results([vec![success_run(41, 1000)]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .append_query_results([vec![monitor_fixture(attempt as i64 + 4)]]);
        }
        let db = Arc::new(mock.into_connection());
        let (analytics_tx, _analytics_rx) = mpsc::channel(8);
        let processor = processor_with(db, analytics_tx);

        let err = processor
            .handle_ping(
                monitor_fixture(3),
                PingRequest {
                    state: PingState::Success,
                    duration_ms: Some(1200),
                    exit_code: Some(0),
                    output_body: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PingError::UpdateContended));
    }
}
