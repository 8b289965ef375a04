//! Dependency graph traversal and cascade suppression.
//!
//! When a monitor fails while a required upstream dependency is already
//! failing, the new incident is suppressed (recorded low-noise, no outbound
//! notification) and tied to the upstream incident. The edge set is a
//! directed graph that is not structurally guaranteed acyclic, so every
//! traversal carries a visited set and a depth bound.

use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};
use std::collections::HashSet;

use crate::db::entities::{incident, monitor, monitor_dependency, prelude::*};
use crate::db::enums::{IncidentKind, IncidentStatus};

/// Maximum depth for chain traversals over the dependency graph.
pub const MAX_TRAVERSAL_DEPTH: usize = 5;

/// How far back an upstream incident may have opened and still suppress.
pub const DEFAULT_LOOKBACK_MINUTES: i64 = 60;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeCheck {
    pub should_suppress: bool,
    pub reason: Option<String>,
    pub upstream_monitor_id: Option<i32>,
    pub upstream_incident_id: Option<i64>,
}

/// Decides whether a new failure on `monitor_id` is attributable to an
/// already-failing required upstream dependency.
pub async fn check_cascade_suppression(
    db: &DatabaseConnection,
    monitor_id: i32,
    lookback_minutes: i64,
) -> Result<CascadeCheck, DbErr> {
    let lookback = Utc::now() - Duration::minutes(lookback_minutes);

    let edges = MonitorDependency::find()
        .filter(monitor_dependency::Column::MonitorId.eq(monitor_id))
        .filter(monitor_dependency::Column::Required.eq(true))
        .all(db)
        .await?;

    for edge in edges {
        let open_incident = Incident::find()
            .filter(incident::Column::MonitorId.eq(edge.depends_on_id))
            .filter(
                incident::Column::Status.is_in([IncidentStatus::Open, IncidentStatus::Acked]),
            )
            .filter(incident::Column::Kind.is_in([
                IncidentKind::Fail,
                IncidentKind::Missed,
                IncidentKind::Late,
            ]))
            .filter(incident::Column::OpenedAt.gte(lookback))
            .order_by_desc(incident::Column::OpenedAt)
            .one(db)
            .await?;

        if let Some(upstream) = open_incident {
            let upstream_name = Monitor::find_by_id(edge.depends_on_id)
                .one(db)
                .await?
                .map(|m| m.name)
                .unwrap_or_else(|| format!("monitor {}", edge.depends_on_id));
            return Ok(CascadeCheck {
                should_suppress: true,
                reason: Some(format!(
                    "Suppressed due to upstream dependency failure: {upstream_name} ({})",
                    upstream.kind
                )),
                upstream_monitor_id: Some(edge.depends_on_id),
                upstream_incident_id: Some(upstream.id),
            });
        }
    }

    Ok(CascadeCheck::default())
}

/// Monitors that declare `monitor_id` as a required dependency, for
/// composite-alert construction.
pub async fn find_affected_downstream(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Vec<monitor::Model>, DbErr> {
    let ids = downstream_monitor_ids(db, monitor_id, true).await?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    Monitor::find()
        .filter(monitor::Column::Id.is_in(ids))
        .all(db)
        .await
}

/// Immediate downstream monitor ids (reverse edges). `required_only` limits
/// to required edges.
pub async fn downstream_monitor_ids(
    db: &DatabaseConnection,
    monitor_id: i32,
    required_only: bool,
) -> Result<Vec<i32>, DbErr> {
    let mut query = MonitorDependency::find()
        .filter(monitor_dependency::Column::DependsOnId.eq(monitor_id));
    if required_only {
        query = query.filter(monitor_dependency::Column::Required.eq(true));
    }
    let edges = query.all(db).await?;
    Ok(edges.into_iter().map(|e| e.monitor_id).collect())
}

/// True when adding the edge `monitor_id -> depends_on_id` would close a
/// cycle, i.e. `monitor_id` is already reachable from `depends_on_id`.
pub async fn would_create_cycle(
    db: &DatabaseConnection,
    monitor_id: i32,
    depends_on_id: i32,
) -> Result<bool, DbErr> {
    if monitor_id == depends_on_id {
        return Ok(true);
    }

    let mut visited: HashSet<i32> = HashSet::new();
    let mut frontier = vec![depends_on_id];
    let mut depth = 0usize;

    while !frontier.is_empty() && depth <= MAX_TRAVERSAL_DEPTH {
        let edges = MonitorDependency::find()
            .filter(monitor_dependency::Column::MonitorId.is_in(frontier.clone()))
            .all(db)
            .await?;

        let mut next = Vec::new();
        for edge in edges {
            if edge.depends_on_id == monitor_id {
                return Ok(true);
            }
            if visited.insert(edge.depends_on_id) {
                next.push(edge.depends_on_id);
            }
        }
        frontier = next;
        depth += 1;
    }

    Ok(false)
}

/// Upstream dependency chain of a monitor, breadth-first, bounded by
/// [`MAX_TRAVERSAL_DEPTH`] and a visited set so cyclic data cannot loop.
pub async fn dependency_chain(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Vec<(i32, usize)>, DbErr> {
    let mut visited: HashSet<i32> = HashSet::new();
    let mut chain = Vec::new();
    let mut frontier = vec![monitor_id];
    visited.insert(monitor_id);

    for depth in 0..=MAX_TRAVERSAL_DEPTH {
        if frontier.is_empty() {
            break;
        }
        for id in &frontier {
            chain.push((*id, depth));
        }
        let edges = MonitorDependency::find()
            .filter(monitor_dependency::Column::MonitorId.is_in(frontier.clone()))
            .all(db)
            .await?;
        frontier = edges
            .into_iter()
            .filter(|e| visited.insert(e.depends_on_id))
            .map(|e| e.depends_on_id)
            .collect();
    }

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn edge(monitor_id: i32, depends_on_id: i32, required: bool) -> monitor_dependency::Model {
        monitor_dependency::Model {
            monitor_id,
            depends_on_id,
            required,
        }
    }

    #[tokio::test]
    async fn no_required_edges_means_no_suppression() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<monitor_dependency::Model>::new()])
            .into_connection();

        let check = check_cascade_suppression(&db, 1, DEFAULT_LOOKBACK_MINUTES)
            .await
            .unwrap();
        assert!(!check.should_suppress);
        assert_eq!(check.upstream_incident_id, None);
    }

    #[tokio::test]
    async fn open_upstream_incident_suppresses() {
        let upstream_incident = incident::Model {
            id: 77,
            monitor_id: 2,
            kind: IncidentKind::Fail,
            status: IncidentStatus::Open,
            summary: "Job failed with exit code 1".to_string(),
            details: None,
            opened_at: Utc::now(),
            acked_at: None,
            resolved_at: None,
            suppress_until: None,
            dedupe_hash: None,
        };
        let upstream_monitor = monitor::Model {
            id: 2,
            org_id: 1,
            name: "db-backup".to_string(),
            token: "t".to_string(),
            schedule_type: crate::db::enums::ScheduleType::Interval,
            interval_sec: Some(3600),
            cron_expr: None,
            timezone: "UTC".to_string(),
            grace_sec: 300,
            status: crate::db::enums::MonitorStatus::Failing,
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
        };

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![edge(1, 2, true)]])
            .append_query_results([vec![upstream_incident]])
            .append_query_results([vec![upstream_monitor]])
            .into_connection();

        let check = check_cascade_suppression(&db, 1, DEFAULT_LOOKBACK_MINUTES)
            .await
            .unwrap();
        assert!(check.should_suppress);
        assert_eq!(check.upstream_incident_id, Some(77));
        assert_eq!(check.upstream_monitor_id, Some(2));
        assert!(check.reason.unwrap().contains("db-backup"));
    }

    #[tokio::test]
    async fn self_edge_is_a_cycle() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        assert!(would_create_cycle(&db, 3, 3).await.unwrap());
    }

    #[tokio::test]
    async fn two_node_cycle_is_detected() {
        // Adding 1 -> 2 while 2 -> 1 exists.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![edge(2, 1, true)]])
            .into_connection();
        assert!(would_create_cycle(&db, 1, 2).await.unwrap());
    }

    #[tokio::test]
    async fn acyclic_edge_is_allowed() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![edge(2, 3, true)]])
            .append_query_results([Vec::<monitor_dependency::Model>::new()])
            .into_connection();
        assert!(!would_create_cycle(&db, 1, 2).await.unwrap());
    }

    #[tokio::test]
    async fn chain_traversal_survives_cyclic_data() {
        // 1 -> 2 -> 1 in stored data; visited set must terminate the walk.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![edge(1, 2, true)]])
            .append_query_results([vec![edge(2, 1, true)]])
            .append_query_results([Vec::<monitor_dependency::Model>::new()])
            .into_connection();

        let chain = dependency_chain(&db, 1).await.unwrap();
        assert_eq!(chain, vec![(1, 0), (2, 1)]);
    }
}
