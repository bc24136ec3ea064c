use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::models::{Alert, AlertType, RiskLevel};

/// Payload handed to the notification subsystem on alert creation or
/// escalation. Emitted after the state transition commits; delivery is
/// someone else's problem.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub member_id: Uuid,
    pub alert_id: Uuid,
    pub alert_type: AlertType,
    pub severity: RiskLevel,
    pub assigned_coach_id: Option<Uuid>,
    pub trigger_snapshot: serde_json::Value,
}

impl AlertEvent {
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            member_id: alert.member_id,
            alert_id: alert.id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            assigned_coach_id: alert.assigned_coach_id,
            trigger_snapshot: alert.trigger_snapshot.clone(),
        }
    }
}

/// Emits events as structured log lines the notification fan-out tails.
pub fn dispatch(events: &[AlertEvent]) {
    for event in events {
        match serde_json::to_string(event) {
            Ok(payload) => info!(target: "retention::notify", %payload, "alert event"),
            Err(error) => tracing::warn!(
                alert_id = %event.alert_id,
                %error,
                "failed to encode alert event"
            ),
        }
    }
}
