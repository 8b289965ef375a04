//! Queued notification dispatch.
//!
//! Incident creation and outbound delivery are decoupled: callers enqueue a
//! message onto a bounded channel and a single worker drains it, so a slow or
//! down webhook endpoint cannot stall ping processing. Suppression (snoozed
//! or cascade-suppressed incidents) is checked at dispatch time.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::models::{AffectedMonitor, NotificationPayload};
use super::senders::NotificationSender;
use crate::db::entities::{incident, monitor};

#[derive(Debug)]
pub enum NotificationMessage {
    Incident {
        monitor: monitor::Model,
        incident: incident::Model,
    },
    Composite {
        monitor: monitor::Model,
        incident: incident::Model,
        affected: Vec<monitor::Model>,
    },
}

pub struct NotificationService {
    tx: mpsc::Sender<NotificationMessage>,
}

impl NotificationService {
    /// Spawns the dispatch worker and returns a handle for enqueueing.
    pub fn start(
        senders: Vec<Arc<dyn NotificationSender>>,
        queue_capacity: usize,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let handle = tokio::spawn(dispatch_loop(rx, senders));
        (Arc::new(Self { tx }), handle)
    }

    /// Non-blocking enqueue. A full queue drops the message with a warning;
    /// the incident record itself is already persisted.
    pub fn enqueue(&self, message: NotificationMessage) {
        if let Err(e) = self.tx.try_send(message) {
            warn!("Notification queue full, dropping message: {}", e);
        }
    }
}

/// Snoozed and cascade-suppressed incidents are recorded but not delivered.
fn should_notify(incident: &incident::Model) -> bool {
    if let Some(until) = incident.suppress_until {
        if until > Utc::now() {
            return false;
        }
    }
    let suppressed = incident
        .details
        .as_ref()
        .and_then(|d| d.get("suppressed"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    !suppressed
}

fn build_payload(
    event: &str,
    monitor: &monitor::Model,
    incident: &incident::Model,
    affected: Option<&[monitor::Model]>,
) -> NotificationPayload {
    NotificationPayload {
        event: event.to_string(),
        monitor_id: monitor.id,
        monitor_name: monitor.name.clone(),
        incident_id: incident.id,
        kind: incident.kind,
        summary: incident.summary.clone(),
        opened_at: incident.opened_at,
        affected_monitors: affected.map(|monitors| {
            monitors
                .iter()
                .map(|m| AffectedMonitor {
                    id: m.id,
                    name: m.name.clone(),
                })
                .collect()
        }),
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<NotificationMessage>,
    senders: Vec<Arc<dyn NotificationSender>>,
) {
    info!("Notification dispatch worker started");
    while let Some(message) = rx.recv().await {
        let payload = match &message {
            NotificationMessage::Incident { monitor, incident } => {
                if !should_notify(incident) {
                    debug!(incident_id = incident.id, "Notification suppressed");
                    continue;
                }
                build_payload("incident.opened", monitor, incident, None)
            }
            NotificationMessage::Composite {
                monitor,
                incident,
                affected,
            } => {
                if !should_notify(incident) {
                    debug!(incident_id = incident.id, "Notification suppressed");
                    continue;
                }
                build_payload("incident.composite", monitor, incident, Some(affected))
            }
        };

        for sender in &senders {
            if let Err(e) = sender.send(&payload).await {
                error!(
                    sender = sender.name(),
                    incident_id = payload.incident_id,
                    "Failed to send notification: {}",
                    e
                );
            }
        }
    }
    info!("Notification dispatch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::{IncidentKind, IncidentStatus};
    use chrono::Duration;
    use serde_json::json;

    fn incident(
        suppress_until: Option<chrono::DateTime<Utc>>,
        details: Option<serde_json::Value>,
    ) -> incident::Model {
        incident::Model {
            id: 1,
            monitor_id: 1,
            kind: IncidentKind::Fail,
            status: IncidentStatus::Open,
            summary: "Job failed with exit code 1".to_string(),
            details,
            opened_at: Utc::now(),
            acked_at: None,
            resolved_at: None,
            suppress_until,
            dedupe_hash: None,
        }
    }

    #[test]
    fn open_incident_notifies() {
        assert!(should_notify(&incident(None, None)));
    }

    #[test]
    fn active_snooze_blocks_notification() {
        let snoozed = incident(Some(Utc::now() + Duration::minutes(30)), None);
        assert!(!should_notify(&snoozed));
    }

    #[test]
    fn expired_snooze_notifies_again() {
        let lapsed = incident(Some(Utc::now() - Duration::minutes(1)), None);
        assert!(should_notify(&lapsed));
    }

    #[test]
    fn cascade_suppressed_incident_is_silent() {
        let suppressed = incident(None, Some(json!({ "suppressed": true })));
        assert!(!should_notify(&suppressed));
    }
}
