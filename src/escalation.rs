use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Alert, AlertStatus, Escalation, RiskLevel, RiskScore};
use crate::notify::AlertEvent;
use crate::store;

/// Why the controller wants to raise an alert one severity step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationCause {
    /// Follow-up due time passed with no acknowledgement.
    OverdueUnacknowledged,
    /// The member's current risk bucket overtook the alert severity.
    RiskOvertookSeverity(RiskLevel),
}

impl EscalationCause {
    fn reason(&self) -> String {
        match self {
            Self::OverdueUnacknowledged => {
                "follow-up due time passed without acknowledgement".to_string()
            }
            Self::RiskOvertookSeverity(level) => {
                format!("member risk moved into the {level} bucket")
            }
        }
    }
}

/// Pure escalation decision for one alert. Severity only ever moves up,
/// one step at a time; `Critical` has nowhere to go.
pub fn escalation_cause(
    alert: &Alert,
    current_score: Option<&RiskScore>,
    now: DateTime<Utc>,
) -> Option<EscalationCause> {
    if !alert.status.is_open() || alert.severity == RiskLevel::Critical {
        return None;
    }

    if alert.status == AlertStatus::Active && alert.acknowledged_at.is_none() {
        if let Some(due) = alert.follow_up_due {
            if now > due {
                return Some(EscalationCause::OverdueUnacknowledged);
            }
        }
    }

    if let Some(score) = current_score {
        if score.risk_level.rank() > alert.severity.rank() {
            return Some(EscalationCause::RiskOvertookSeverity(score.risk_level));
        }
    }

    None
}

#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub examined: usize,
    pub escalated: usize,
    pub events: Vec<AlertEvent>,
}

/// Periodic sweep over every open alert, one keyset page at a time.
/// Alerts that cannot escalate still advance the cursor, so a head-of-
/// scan backlog never starves overdue alerts further in. Safe to re-run:
/// the store-level severity compare-and-swap makes concurrent sweeps
/// collapse to a single escalation, and a failure on one alert is logged
/// without aborting the rest of the scan.
pub async fn sweep(
    pool: &PgPool,
    now: DateTime<Utc>,
    page_size: i64,
) -> Result<SweepOutcome, EngineError> {
    let mut outcome = SweepOutcome::default();
    let mut cursor = None;

    loop {
        let alerts = store::open_alerts_page(pool, cursor, page_size).await?;
        outcome.examined += alerts.len();

        for alert in &alerts {
            match escalate_if_due(pool, alert, now).await {
                Ok(Some(event)) => {
                    outcome.escalated += 1;
                    outcome.events.push(event);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(alert_id = %alert.id, %error, "escalation check failed; continuing sweep");
                }
            }
        }

        cursor = store::page_cursor(&alerts, page_size, |a| (a.created_at, a.id));
        if cursor.is_none() {
            break;
        }
    }

    Ok(outcome)
}

async fn escalate_if_due(
    pool: &PgPool,
    alert: &Alert,
    now: DateTime<Utc>,
) -> Result<Option<AlertEvent>, EngineError> {
    let current_score = store::current_risk_score(pool, alert.member_id).await?;
    let Some(cause) = escalation_cause(alert, current_score.as_ref(), now) else {
        return Ok(None);
    };
    let Some(to_severity) = alert.severity.escalated() else {
        return Ok(None);
    };

    let escalation = Escalation {
        id: Uuid::new_v4(),
        alert_id: alert.id,
        from_severity: alert.severity,
        to_severity,
        reason: cause.reason(),
        auto_escalated: true,
        created_at: now,
    };

    if !store::record_escalation(pool, &escalation).await? {
        // Another sweep got here first.
        return Ok(None);
    }

    info!(
        alert_id = %alert.id,
        from = %escalation.from_severity,
        to = %escalation.to_severity,
        reason = %escalation.reason,
        "alert auto-escalated"
    );

    let escalated = store::fetch_alert(pool, alert.id).await?;
    Ok(Some(AlertEvent::from_alert(&escalated)))
}

/// Coach-triggered escalation: same one-step, never-down rules, recorded
/// with `auto_escalated = false`.
pub async fn escalate_manual(
    pool: &PgPool,
    alert_id: Uuid,
    coach_id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(Alert, AlertEvent), EngineError> {
    let alert = store::fetch_alert(pool, alert_id).await?;
    if alert.status.is_terminal() {
        return Err(EngineError::InvalidTransition {
            alert_id,
            from: alert.status,
            to: alert.status,
        });
    }
    let to_severity = alert
        .severity
        .escalated()
        .ok_or(EngineError::SeverityCeiling(alert_id))?;

    let escalation = Escalation {
        id: Uuid::new_v4(),
        alert_id,
        from_severity: alert.severity,
        to_severity,
        reason: format!("coach {coach_id}: {reason}"),
        auto_escalated: false,
        created_at: now,
    };

    if !store::record_escalation(pool, &escalation).await? {
        // Severity moved underneath the coach; surface as a conflict.
        let current = store::fetch_alert(pool, alert_id).await?;
        return Err(EngineError::InvalidTransition {
            alert_id,
            from: current.status,
            to: current.status,
        });
    }

    info!(alert_id = %alert_id, coach_id = %coach_id, to = %to_severity, "alert manually escalated");

    let escalated = store::fetch_alert(pool, alert_id).await?;
    let event = AlertEvent::from_alert(&escalated);
    Ok((escalated, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertType;
    use chrono::Duration;
    use serde_json::json;

    fn open_alert(severity: RiskLevel, status: AlertStatus, due_hours_ago: i64) -> Alert {
        let now = Utc::now();
        Alert {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            alert_type: AlertType::ChurnRisk,
            severity,
            status,
            assigned_coach_id: None,
            title: "t".to_string(),
            description: "d".to_string(),
            trigger_snapshot: json!({}),
            suggested_actions: vec![],
            acknowledged_by: None,
            acknowledged_at: (status == AlertStatus::Acknowledged).then_some(now),
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            follow_up_due: Some(now - Duration::hours(due_hours_ago)),
            reminder_count: 0,
            created_at: now - Duration::days(2),
            updated_at: now - Duration::days(1),
        }
    }

    fn score_at(level: RiskLevel) -> RiskScore {
        let now = Utc::now();
        RiskScore {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            composite_score: 50.0,
            risk_level: level,
            churn_probability: 0.5,
            attendance_score: 50.0,
            performance_score: 50.0,
            engagement_score: 50.0,
            wellness_score: 50.0,
            attendance_trend: 0.0,
            performance_trend: 0.0,
            engagement_trend: 0.0,
            wellness_trend: 0.0,
            days_since_last_visit: 0,
            days_since_last_checkin: 0,
            days_since_last_pr: 0,
            computed_at: now,
            valid_until: now + Duration::days(7),
        }
    }

    #[test]
    fn overdue_unacknowledged_alert_escalates() {
        let alert = open_alert(RiskLevel::Medium, AlertStatus::Active, 3);
        let cause = escalation_cause(&alert, None, Utc::now());
        assert_eq!(cause, Some(EscalationCause::OverdueUnacknowledged));
    }

    #[test]
    fn acknowledged_alert_does_not_escalate_on_sla() {
        let alert = open_alert(RiskLevel::Medium, AlertStatus::Acknowledged, 3);
        assert_eq!(escalation_cause(&alert, None, Utc::now()), None);
    }

    #[test]
    fn not_yet_due_alert_stays_put() {
        let alert = open_alert(RiskLevel::Medium, AlertStatus::Active, -3);
        assert_eq!(escalation_cause(&alert, None, Utc::now()), None);
    }

    #[test]
    fn bucket_overtake_escalates_even_when_acknowledged() {
        let alert = open_alert(RiskLevel::Medium, AlertStatus::Acknowledged, -3);
        let score = score_at(RiskLevel::Critical);
        assert_eq!(
            escalation_cause(&alert, Some(&score), Utc::now()),
            Some(EscalationCause::RiskOvertookSeverity(RiskLevel::Critical))
        );
    }

    #[test]
    fn lower_bucket_never_deescalates() {
        let alert = open_alert(RiskLevel::High, AlertStatus::Acknowledged, -3);
        let score = score_at(RiskLevel::Low);
        assert_eq!(escalation_cause(&alert, Some(&score), Utc::now()), None);
    }

    #[test]
    fn critical_alerts_have_no_headroom() {
        let alert = open_alert(RiskLevel::Critical, AlertStatus::Active, 10);
        assert_eq!(escalation_cause(&alert, None, Utc::now()), None);
    }

    #[test]
    fn escalation_is_exactly_one_step() {
        let alert = open_alert(RiskLevel::Low, AlertStatus::Active, 5);
        assert!(escalation_cause(&alert, None, Utc::now()).is_some());
        assert_eq!(alert.severity.escalated(), Some(RiskLevel::Medium));
    }

    #[test]
    fn to_severity_always_outranks_from_severity() {
        for from in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
            let to = from.escalated().unwrap();
            assert!(to.rank() > from.rank());
            assert_eq!(to.rank(), from.rank() + 1);
        }
    }
}
