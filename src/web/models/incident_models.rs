use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::entities::{incident, incident_event};
use crate::db::enums::{IncidentKind, IncidentStatus};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListIncidentsQuery {
    pub monitor_id: Option<i32>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub actor: String,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SnoozeRequest {
    pub actor: String,
    pub minutes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentResponse {
    pub id: i64,
    pub monitor_id: i32,
    pub kind: IncidentKind,
    pub status: IncidentStatus,
    pub summary: String,
    pub details: Option<serde_json::Value>,
    pub opened_at: DateTime<Utc>,
    pub acked_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub suppress_until: Option<DateTime<Utc>>,
}

impl From<incident::Model> for IncidentResponse {
    fn from(i: incident::Model) -> Self {
        Self {
            id: i.id,
            monitor_id: i.monitor_id,
            kind: i.kind,
            status: i.status,
            summary: i.summary,
            details: i.details,
            opened_at: i.opened_at,
            acked_at: i.acked_at,
            resolved_at: i.resolved_at,
            suppress_until: i.suppress_until,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentEventResponse {
    pub id: i64,
    pub incident_id: i64,
    pub event_type: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<incident_event::Model> for IncidentEventResponse {
    fn from(e: incident_event::Model) -> Self {
        Self {
            id: e.id,
            incident_id: e.incident_id,
            event_type: e.event_type,
            message: e.message,
            metadata: e.metadata,
            created_at: e.created_at,
        }
    }
}
