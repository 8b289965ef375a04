use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::enums::IncidentKind;

/// JSON body posted to configured notification channels.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub event: String,
    pub monitor_id: i32,
    pub monitor_name: String,
    pub incident_id: i64,
    pub kind: IncidentKind,
    pub summary: String,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_monitors: Option<Vec<AffectedMonitor>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AffectedMonitor {
    pub id: i32,
    pub name: String,
}
