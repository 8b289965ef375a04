//! Incident lifecycle management.
//!
//! Owns dedup (at most one OPEN/ACKED incident of a kind per monitor),
//! open/acknowledge/resolve/mute transitions and the append-only audit trail.
//! Incidents are never deleted.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::analytics::anomaly::Anomaly;
use crate::cascade;
use crate::db::entities::{incident, incident_event, monitor, prelude::*};
use crate::db::enums::{IncidentKind, IncidentStatus};
use crate::notifications::{NotificationMessage, NotificationService};

/// Suppressed incidents stay muted this long; the upstream resolution path
/// normally resolves them well before the window lapses.
const SUPPRESSED_MUTE_HOURS: i64 = 24;

/// Dedupe window for ANOMALY incidents: within it, new anomalies update the
/// open incident in place instead of churning summaries.
const ANOMALY_DEDUPE_MINUTES: i64 = 60;

pub struct OpenIncident {
    pub kind: IncidentKind,
    pub summary: String,
    pub details: Option<serde_json::Value>,
    pub suppress_until: Option<DateTime<Utc>>,
    pub dedupe_hash: Option<String>,
}

pub struct IncidentService {
    db: Arc<DatabaseConnection>,
}

impl IncidentService {
    pub fn new(db: impl Into<Arc<DatabaseConnection>>) -> Self {
        Self { db: db.into() }
    }

    /// Opens an incident unless an OPEN/ACKED one of the same kind already
    /// exists for the monitor, in which case the existing incident is
    /// returned unchanged. Check and insert run in one transaction holding
    /// the monitor row lock, so racing pings cannot create duplicates.
    pub async fn open(
        &self,
        monitor_id: i32,
        req: OpenIncident,
    ) -> Result<(incident::Model, bool), DbErr> {
        let txn = self.db.begin().await?;

        // The dedupe check below is check-then-insert; lock the monitor row
        // so two racing opens for the same monitor serialize on it.
        Monitor::find_by_id(monitor_id)
            .lock_exclusive()
            .one(&txn)
            .await?;

        if let Some(existing) = Incident::find()
            .filter(incident::Column::MonitorId.eq(monitor_id))
            .filter(incident::Column::Kind.eq(req.kind))
            .filter(
                incident::Column::Status.is_in([IncidentStatus::Open, IncidentStatus::Acked]),
            )
            .one(&txn)
            .await?
        {
            txn.commit().await?;
            return Ok((existing, false));
        }

        let now = Utc::now();
        let opened = incident::ActiveModel {
            monitor_id: Set(monitor_id),
            kind: Set(req.kind),
            status: Set(IncidentStatus::Open),
            summary: Set(req.summary.clone()),
            details: Set(req.details),
            opened_at: Set(now),
            suppress_until: Set(req.suppress_until),
            dedupe_hash: Set(req.dedupe_hash),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        log_event(&txn, opened.id, "created", req.summary, None).await?;
        txn.commit().await?;

        info!(monitor_id, incident_id = opened.id, kind = %opened.kind, "Incident opened");
        Ok((opened, true))
    }

    /// Opens a low-noise suppressed incident attributed to an upstream
    /// failure. Long mute window, no outbound notification.
    pub async fn open_suppressed(
        &self,
        monitor_id: i32,
        kind: IncidentKind,
        check: &cascade::CascadeCheck,
    ) -> Result<(incident::Model, bool), DbErr> {
        let reason = check
            .reason
            .clone()
            .unwrap_or_else(|| "Suppressed due to upstream dependency failure".to_string());
        self.open(
            monitor_id,
            OpenIncident {
                kind,
                summary: format!("[SUPPRESSED] {reason}"),
                details: Some(json!({
                    "suppressed": true,
                    "reason": reason,
                    "upstreamMonitorId": check.upstream_monitor_id,
                    "upstreamIncidentId": check.upstream_incident_id,
                    "timestamp": Utc::now(),
                })),
                suppress_until: Some(Utc::now() + Duration::hours(SUPPRESSED_MUTE_HOURS)),
                dedupe_hash: None,
            },
        )
        .await
    }

    /// Folds composite-alert context (root cause plus the downstream monitors
    /// it affects) into the root-cause incident, so operators get one grouped
    /// notification instead of N.
    pub async fn annotate_composite(
        &self,
        incident_id: i64,
        root: &monitor::Model,
        affected: &[monitor::Model],
    ) -> Result<incident::Model, DbErr> {
        let affected_list: Vec<serde_json::Value> = affected
            .iter()
            .map(|m| json!({ "id": m.id, "name": m.name }))
            .collect();
        let incident = Incident::find_by_id(incident_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("incident {incident_id}")))?;

        let mut details = incident
            .details
            .clone()
            .unwrap_or_else(|| json!({}));
        if let Some(map) = details.as_object_mut() {
            map.insert("composite".to_string(), json!(true));
            map.insert(
                "rootMonitor".to_string(),
                json!({ "id": root.id, "name": root.name }),
            );
            map.insert("affectedMonitors".to_string(), json!(affected_list));
            map.insert("affectedCount".to_string(), json!(affected.len()));
        }

        let mut am: incident::ActiveModel = incident.into();
        am.details = Set(Some(details));
        let updated = am.update(self.db.as_ref()).await?;

        log_event(
            self.db.as_ref(),
            updated.id,
            "composite",
            format!(
                "Cascading failure: {} failure affected {} downstream monitor(s)",
                root.name,
                affected.len()
            ),
            Some(json!({ "affectedCount": affected.len() })),
        )
        .await?;
        Ok(updated)
    }

    /// OPEN -> ACKED. Returns `None` (no-op) unless the incident is OPEN.
    pub async fn acknowledge(
        &self,
        incident_id: i64,
        actor: &str,
    ) -> Result<Option<incident::Model>, DbErr> {
        let Some(incident) = Incident::find_by_id(incident_id).one(self.db.as_ref()).await? else {
            return Ok(None);
        };
        if incident.status != IncidentStatus::Open {
            return Ok(None);
        }

        let now = Utc::now();
        let mut am: incident::ActiveModel = incident.into();
        am.status = Set(IncidentStatus::Acked);
        am.acked_at = Set(Some(now));
        let updated = am.update(self.db.as_ref()).await?;

        log_event(
            self.db.as_ref(),
            updated.id,
            "acknowledged",
            format!("Acknowledged by {actor}"),
            Some(json!({ "actor": actor })),
        )
        .await?;
        Ok(Some(updated))
    }

    /// Any non-RESOLVED -> RESOLVED. Also resolves downstream suppressed
    /// incidents that reference this incident as their upstream cause.
    pub async fn resolve(
        &self,
        incident_id: i64,
        actor: &str,
        note: Option<String>,
    ) -> Result<Option<incident::Model>, DbErr> {
        let Some(incident) = Incident::find_by_id(incident_id).one(self.db.as_ref()).await? else {
            return Ok(None);
        };
        if incident.status == IncidentStatus::Resolved {
            return Ok(None);
        }

        let monitor_id = incident.monitor_id;
        let now = Utc::now();
        let mut am: incident::ActiveModel = incident.into();
        am.status = Set(IncidentStatus::Resolved);
        am.resolved_at = Set(Some(now));
        let updated = am.update(self.db.as_ref()).await?;

        log_event(
            self.db.as_ref(),
            updated.id,
            "resolved",
            note.clone()
                .unwrap_or_else(|| format!("Resolved by {actor}")),
            Some(json!({ "actor": actor, "note": note })),
        )
        .await?;

        self.resolve_downstream_suppressed(monitor_id, updated.id)
            .await?;
        Ok(Some(updated))
    }

    /// Sets the mute window. Status is untouched; notification is suppressed
    /// while `suppress_until` is in the future.
    pub async fn mute(
        &self,
        incident_id: i64,
        duration_minutes: i64,
        actor: &str,
    ) -> Result<Option<incident::Model>, DbErr> {
        let Some(incident) = Incident::find_by_id(incident_id).one(self.db.as_ref()).await? else {
            return Ok(None);
        };

        let until = Utc::now() + Duration::minutes(duration_minutes);
        let mut am: incident::ActiveModel = incident.into();
        am.suppress_until = Set(Some(until));
        let updated = am.update(self.db.as_ref()).await?;

        log_event(
            self.db.as_ref(),
            updated.id,
            "snoozed",
            format!("Incident snoozed until {}", until.to_rfc3339()),
            Some(json!({ "actor": actor, "minutes": duration_minutes })),
        )
        .await?;
        Ok(Some(updated))
    }

    /// Auto-recovery: a successful, on-time run resolves any OPEN/ACKED
    /// failure-class incidents (FAIL, LATE, MISSED) for the monitor. ANOMALY
    /// incidents are excluded; they live on their own dedupe window. The
    /// dominant resolution path.
    pub async fn auto_resolve_failures(
        &self,
        monitor_id: i32,
    ) -> Result<Vec<incident::Model>, DbErr> {
        let open = Incident::find()
            .filter(incident::Column::MonitorId.eq(monitor_id))
            .filter(incident::Column::Kind.is_in([
                IncidentKind::Fail,
                IncidentKind::Late,
                IncidentKind::Missed,
            ]))
            .filter(
                incident::Column::Status.is_in([IncidentStatus::Open, IncidentStatus::Acked]),
            )
            .all(self.db.as_ref())
            .await?;

        let now = Utc::now();
        let mut resolved = Vec::with_capacity(open.len());
        for incident in open {
            let id = incident.id;
            let mut am: incident::ActiveModel = incident.into();
            am.status = Set(IncidentStatus::Resolved);
            am.resolved_at = Set(Some(now));
            let updated = am.update(self.db.as_ref()).await?;

            log_event(
                self.db.as_ref(),
                id,
                "resolved",
                "Resolved automatically by a successful run".to_string(),
                Some(json!({ "actor": "system", "auto": true })),
            )
            .await?;
            self.resolve_downstream_suppressed(monitor_id, id).await?;
            resolved.push(updated);
        }
        Ok(resolved)
    }

    /// Opens an ANOMALY incident, or updates the open one in place when it
    /// was opened within the dedupe window (spam suppression).
    pub async fn open_or_update_anomaly(
        &self,
        monitor_id: i32,
        run_id: i64,
        anomaly: &Anomaly,
    ) -> Result<(incident::Model, bool), DbErr> {
        let now = Utc::now();
        let details = json!({
            "type": anomaly.kind,
            "severity": anomaly.severity,
            "expected": anomaly.expected,
            "actual": anomaly.actual,
            "zScore": anomaly.z_score,
            "runId": run_id,
            "timestamp": now,
        });

        let recent = Incident::find()
            .filter(incident::Column::MonitorId.eq(monitor_id))
            .filter(incident::Column::Kind.eq(IncidentKind::Anomaly))
            .filter(
                incident::Column::Status.is_in([IncidentStatus::Open, IncidentStatus::Acked]),
            )
            .filter(
                incident::Column::OpenedAt.gte(now - Duration::minutes(ANOMALY_DEDUPE_MINUTES)),
            )
            .one(self.db.as_ref())
            .await?;

        if let Some(existing) = recent {
            let mut am: incident::ActiveModel = existing.into();
            am.summary = Set(anomaly.message.clone());
            am.details = Set(Some(details));
            let updated = am.update(self.db.as_ref()).await?;
            return Ok((updated, false));
        }

        self.open(
            monitor_id,
            OpenIncident {
                kind: IncidentKind::Anomaly,
                summary: anomaly.message.clone(),
                details: Some(details),
                suppress_until: None,
                dedupe_hash: Some(format!(
                    "anomaly-{monitor_id}-{:?}-{}",
                    anomaly.kind,
                    now.timestamp_millis()
                )),
            },
        )
        .await
    }

    /// The one entry point for new failure-class incidents (FAIL, LATE,
    /// MISSED): runs the cascade check, opens either a suppressed or a
    /// regular incident, folds in composite context when the failing monitor
    /// has downstream dependents, and enqueues the notification decision.
    pub async fn open_with_cascade(
        &self,
        notifications: &NotificationService,
        monitor: &monitor::Model,
        kind: IncidentKind,
        summary: String,
        details: Option<serde_json::Value>,
    ) -> Result<(incident::Model, bool), DbErr> {
        let check =
            cascade::check_cascade_suppression(self.db.as_ref(), monitor.id, cascade::DEFAULT_LOOKBACK_MINUTES)
                .await?;
        if check.should_suppress {
            return self.open_suppressed(monitor.id, kind, &check).await;
        }

        let (incident, created) = self
            .open(
                monitor.id,
                OpenIncident {
                    kind,
                    summary,
                    details,
                    suppress_until: None,
                    dedupe_hash: None,
                },
            )
            .await?;
        if !created {
            return Ok((incident, false));
        }

        let affected = cascade::find_affected_downstream(self.db.as_ref(), monitor.id).await?;
        if affected.is_empty() {
            notifications.enqueue(NotificationMessage::Incident {
                monitor: monitor.clone(),
                incident: incident.clone(),
            });
            return Ok((incident, true));
        }

        let annotated = self.annotate_composite(incident.id, monitor, &affected).await?;
        notifications.enqueue(NotificationMessage::Composite {
            monitor: monitor.clone(),
            incident: annotated.clone(),
            affected,
        });
        Ok((annotated, true))
    }

    pub async fn get_incident(
        &self,
        incident_id: i64,
    ) -> Result<Option<incident::Model>, DbErr> {
        Incident::find_by_id(incident_id).one(self.db.as_ref()).await
    }

    pub async fn list_incidents(
        &self,
        monitor_id: Option<i32>,
        limit: u64,
    ) -> Result<Vec<incident::Model>, DbErr> {
        let mut query = Incident::find();
        if let Some(monitor_id) = monitor_id {
            query = query.filter(incident::Column::MonitorId.eq(monitor_id));
        }
        query
            .order_by_desc(incident::Column::OpenedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
    }

    pub async fn list_events(
        &self,
        incident_id: i64,
    ) -> Result<Vec<incident_event::Model>, DbErr> {
        IncidentEvent::find()
            .filter(incident_event::Column::IncidentId.eq(incident_id))
            .order_by_desc(incident_event::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
    }

    /// Resolves suppressed incidents on downstream monitors whose recorded
    /// upstream cause is the just-resolved incident.
    async fn resolve_downstream_suppressed(
        &self,
        monitor_id: i32,
        upstream_incident_id: i64,
    ) -> Result<(), DbErr> {
        let downstream = cascade::downstream_monitor_ids(self.db.as_ref(), monitor_id, false).await?;
        if downstream.is_empty() {
            return Ok(());
        }

        let candidates = Incident::find()
            .filter(incident::Column::MonitorId.is_in(downstream))
            .filter(
                incident::Column::Status.is_in([IncidentStatus::Open, IncidentStatus::Acked]),
            )
            .all(self.db.as_ref())
            .await?;

        let now = Utc::now();
        for candidate in candidates {
            let references_upstream = candidate
                .details
                .as_ref()
                .and_then(|d| d.get("upstreamIncidentId"))
                .and_then(|v| v.as_i64())
                == Some(upstream_incident_id);
            if !references_upstream {
                continue;
            }
            let id = candidate.id;
            let mut am: incident::ActiveModel = candidate.into();
            am.status = Set(IncidentStatus::Resolved);
            am.resolved_at = Set(Some(now));
            am.update(self.db.as_ref()).await?;
            log_event(
                self.db.as_ref(),
                id,
                "resolved",
                "Resolved automatically: upstream incident resolved".to_string(),
                Some(json!({ "actor": "system", "upstreamIncidentId": upstream_incident_id })),
            )
            .await?;
        }
        Ok(())
    }
}

async fn log_event<C: ConnectionTrait>(
    conn: &C,
    incident_id: i64,
    event_type: &str,
    message: String,
    metadata: Option<serde_json::Value>,
) -> Result<incident_event::Model, DbErr> {
    incident_event::ActiveModel {
        incident_id: Set(incident_id),
        event_type: Set(event_type.to_string()),
        message: Set(message),
        metadata: Set(metadata),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::monitor_dependency;
    use crate::db::enums::{MonitorStatus, ScheduleType};
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn monitor_fixture(id: i32) -> monitor::Model {
        monitor::Model {
            id,
            org_id: 1,
            name: "db-backup".to_string(),
            token: "t".to_string(),
            schedule_type: ScheduleType::Interval,
            interval_sec: Some(3600),
            cron_expr: None,
            timezone: "UTC".to_string(),
            grace_sec: 300,
            status: MonitorStatus::Failing,
            next_due_at: None,
            last_run_at: None,
            last_duration_ms: None,
            last_exit_code: None,
            last_output_key: None,
            capture_output: false,
            capture_limit_kb: 32,
            duration_count: 0,
            duration_mean: None,
            duration_m2: None,
            duration_min: None,
            duration_max: None,
            duration_median: None,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn open_incident(id: i64, monitor_id: i32, kind: IncidentKind) -> incident::Model {
        incident::Model {
            id,
            monitor_id,
            kind,
            status: IncidentStatus::Open,
            summary: "Job failed with exit code 1".to_string(),
            details: None,
            opened_at: Utc::now(),
            acked_at: None,
            resolved_at: None,
            suppress_until: None,
            dedupe_hash: None,
        }
    }

    #[tokio::test]
    async fn open_is_a_noop_when_same_kind_is_open() {
        let existing = open_incident(5, 1, IncidentKind::Fail);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![monitor_fixture(1)]])
            .append_query_results([vec![existing.clone()]])
            .into_connection();
        let service = IncidentService::new(db);

        let (incident, created) = service
            .open(
                1,
                OpenIncident {
                    kind: IncidentKind::Fail,
                    summary: "Job failed with exit code 2".to_string(),
                    details: None,
                    suppress_until: None,
                    dedupe_hash: None,
                },
            )
            .await
            .unwrap();

        assert!(!created);
        assert_eq!(incident.id, existing.id);
        assert_eq!(incident.summary, existing.summary);
    }

    #[tokio::test]
    async fn acknowledge_rejects_non_open_incidents() {
        let mut acked = open_incident(6, 1, IncidentKind::Late);
        acked.status = IncidentStatus::Acked;
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![acked]])
            .into_connection();
        let service = IncidentService::new(db);

        assert!(service.acknowledge(6, "ops@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_is_a_noop_for_resolved_incidents() {
        let mut resolved = open_incident(7, 1, IncidentKind::Fail);
        resolved.status = IncidentStatus::Resolved;
        resolved.resolved_at = Some(Utc::now());
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![resolved]])
            .into_connection();
        let service = IncidentService::new(db);

        assert!(service
            .resolve(7, "ops@example.com", None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn open_locks_the_monitor_row_for_update() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![monitor_fixture(1)]])
                .append_query_results([vec![open_incident(5, 1, IncidentKind::Fail)]])
                .into_connection(),
        );
        let service = IncidentService::new(db.clone());

        service
            .open(
                1,
                OpenIncident {
                    kind: IncidentKind::Fail,
                    summary: "Job failed with exit code 1".to_string(),
                    details: None,
                    suppress_until: None,
                    dedupe_hash: None,
                },
            )
            .await
            .unwrap();

        drop(service);
        let Ok(db) = Arc::try_unwrap(db) else {
            panic!("connection still shared");
        };
        let log = db.into_transaction_log();
        assert!(format!("{log:?}").contains("FOR UPDATE"));
    }

    #[tokio::test]
    async fn successful_run_auto_resolves_missed_incidents() {
        let missed = open_incident(9, 1, IncidentKind::Missed);
        let mut after_update = missed.clone();
        after_update.status = IncidentStatus::Resolved;
        after_update.resolved_at = Some(Utc::now());
        let event = incident_event::Model {
            id: 1,
            incident_id: 9,
            event_type: "resolved".to_string(),
            message: "Resolved automatically by a successful run".to_string(),
            metadata: None,
            created_at: Utc::now(),
        };

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![missed]])
            .append_query_results([vec![after_update]])
            .append_query_results([vec![event]])
            .append_query_results([Vec::<monitor_dependency::Model>::new()])
            .into_connection();
        let service = IncidentService::new(db);

        let resolved = service.auto_resolve_failures(1).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].kind, IncidentKind::Missed);
        assert_eq!(resolved[0].status, IncidentStatus::Resolved);
        assert!(resolved[0].resolved_at.is_some());
    }
}
