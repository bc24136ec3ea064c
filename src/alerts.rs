use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Alert, AlertStatus, AlertType, Member, RiskLevel, RiskScore};
use crate::notify::AlertEvent;
use crate::policy::Policy;
use crate::store::{self, AlertUpsert};

/// What the policy decided to raise for one alert type.
#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub severity: RiskLevel,
    pub title: String,
    pub description: String,
    pub suggested_actions: Vec<String>,
}

fn churn_risk_draft(policy: &Policy, score: &RiskScore) -> Option<AlertDraft> {
    if score.composite_score < policy.alerts.churn_composite_floor {
        return None;
    }
    Some(AlertDraft {
        alert_type: AlertType::ChurnRisk,
        severity: score.risk_level,
        title: "Member at risk of churning".to_string(),
        description: format!(
            "Composite risk score {:.1} ({}), churn probability {:.0}%.",
            score.composite_score,
            score.risk_level,
            score.churn_probability * 100.0
        ),
        suggested_actions: vec![
            "Call the member this week".to_string(),
            "Offer a goal-setting session".to_string(),
            "Review membership plan fit".to_string(),
        ],
    })
}

fn poor_attendance_draft(policy: &Policy, score: &RiskScore) -> Option<AlertDraft> {
    let low_score = score.attendance_score <= policy.alerts.attendance_score_floor;
    let long_absence = score.days_since_last_visit >= policy.alerts.attendance_days_ceiling;
    if !low_score && !long_absence {
        return None;
    }
    Some(AlertDraft {
        alert_type: AlertType::PoorAttendance,
        severity: score.risk_level,
        title: "Attendance has dropped off".to_string(),
        description: format!(
            "Attendance score {:.1}, last visit {} days ago.",
            score.attendance_score, score.days_since_last_visit
        ),
        suggested_actions: vec![
            "Send a check-in message".to_string(),
            "Invite to a favorite class".to_string(),
        ],
    })
}

fn declining_performance_draft(policy: &Policy, score: &RiskScore) -> Option<AlertDraft> {
    let low_score = score.performance_score <= policy.alerts.performance_score_floor;
    let falling = score.performance_trend <= policy.alerts.performance_trend_floor;
    if !low_score && !falling {
        return None;
    }
    Some(AlertDraft {
        alert_type: AlertType::DecliningPerformance,
        severity: score.risk_level,
        title: "Performance is declining".to_string(),
        description: format!(
            "Performance score {:.1}, trend {:+.1}% over the trailing period.",
            score.performance_score, score.performance_trend
        ),
        suggested_actions: vec![
            "Review recent benchmark results together".to_string(),
            "Adjust programming or scaling".to_string(),
        ],
    })
}

fn wellness_concern_draft(policy: &Policy, score: &RiskScore) -> Option<AlertDraft> {
    let low_score = score.wellness_score <= policy.alerts.wellness_score_floor;
    let falling = score.wellness_trend <= policy.alerts.wellness_trend_floor;
    if !low_score && !falling {
        return None;
    }
    Some(AlertDraft {
        alert_type: AlertType::WellnessConcern,
        severity: score.risk_level,
        title: "Wellness check-ins look concerning".to_string(),
        description: format!(
            "Wellness score {:.1}, trend {:+.1}%.",
            score.wellness_score, score.wellness_trend
        ),
        suggested_actions: vec![
            "Have a private wellness conversation".to_string(),
            "Suggest recovery-focused sessions".to_string(),
        ],
    })
}

/// Pure trigger evaluation: which alert types the latest score warrants,
/// each at the severity of the score's bucket. Thresholds come from
/// policy, not code.
pub fn triggered_alerts(policy: &Policy, score: &RiskScore) -> Vec<AlertDraft> {
    [
        poor_attendance_draft(policy, score),
        declining_performance_draft(policy, score),
        wellness_concern_draft(policy, score),
        churn_risk_draft(policy, score),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Snapshot of the data that caused an alert, stored on the alert row.
pub fn trigger_snapshot(score: &RiskScore) -> serde_json::Value {
    json!({
        "risk_score_id": score.id,
        "composite_score": score.composite_score,
        "risk_level": score.risk_level.as_str(),
        "churn_probability": score.churn_probability,
        "attendance_score": score.attendance_score,
        "performance_score": score.performance_score,
        "engagement_score": score.engagement_score,
        "wellness_score": score.wellness_score,
        "attendance_trend": score.attendance_trend,
        "performance_trend": score.performance_trend,
        "engagement_trend": score.engagement_trend,
        "wellness_trend": score.wellness_trend,
        "days_since_last_visit": score.days_since_last_visit,
        "days_since_last_checkin": score.days_since_last_checkin,
        "days_since_last_pr": score.days_since_last_pr,
        "computed_at": score.computed_at,
    })
}

/// One member's evaluation result: what was raised or refreshed, plus
/// the notification events to dispatch after commit.
#[derive(Debug)]
pub struct Evaluation {
    pub upserts: Vec<AlertUpsert>,
    pub events: Vec<AlertEvent>,
}

/// Evaluates the latest risk score against alert policy. Each triggered
/// type is inserted-or-refreshed through the active-alert uniqueness
/// guarantee, so re-running within a validity window updates the
/// existing alert instead of duplicating it. Events are only emitted
/// for newly created alerts.
pub async fn evaluate(
    pool: &PgPool,
    policy: &Policy,
    member: &Member,
    score: &RiskScore,
    now: DateTime<Utc>,
) -> Result<Evaluation, EngineError> {
    let snapshot = trigger_snapshot(score);
    let mut upserts = Vec::new();
    let mut events = Vec::new();

    for draft in triggered_alerts(policy, score) {
        let alert = Alert {
            id: Uuid::new_v4(),
            tenant_id: member.tenant_id,
            member_id: member.id,
            alert_type: draft.alert_type,
            severity: draft.severity,
            status: AlertStatus::Active,
            assigned_coach_id: member.assigned_coach_id,
            title: draft.title,
            description: draft.description,
            trigger_snapshot: snapshot.clone(),
            suggested_actions: draft.suggested_actions,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            follow_up_due: Some(now + policy.alerts.follow_up_lead(draft.severity)),
            reminder_count: 0,
            created_at: now,
            updated_at: now,
        };

        let upsert = store::upsert_active_alert(pool, &alert).await?;
        info!(
            member_id = %member.id,
            alert_id = %upsert.alert.id,
            alert_type = %upsert.alert.alert_type,
            severity = %upsert.alert.severity,
            created = upsert.created,
            "alert evaluated"
        );
        if upsert.created {
            events.push(AlertEvent::from_alert(&upsert.alert));
        }
        upserts.push(upsert);
    }

    Ok(Evaluation { upserts, events })
}

/// Legal only from `active`; severity is untouched.
pub async fn acknowledge(
    pool: &PgPool,
    alert_id: Uuid,
    coach_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Alert, EngineError> {
    let current = store::fetch_alert(pool, alert_id).await?;
    if current.status != AlertStatus::Active {
        return Err(EngineError::InvalidTransition {
            alert_id,
            from: current.status,
            to: AlertStatus::Acknowledged,
        });
    }
    store::transition_alert(
        pool,
        alert_id,
        AlertStatus::Active,
        AlertStatus::Acknowledged,
        coach_id,
        None,
        now,
    )
    .await
}

/// Terminal; legal from `active` or `acknowledged`.
pub async fn resolve(
    pool: &PgPool,
    alert_id: Uuid,
    coach_id: Uuid,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Alert, EngineError> {
    close_alert(pool, alert_id, coach_id, notes, AlertStatus::Resolved, now).await
}

/// Marks a false positive; terminal, never deleted.
pub async fn dismiss(
    pool: &PgPool,
    alert_id: Uuid,
    coach_id: Uuid,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Alert, EngineError> {
    close_alert(pool, alert_id, coach_id, notes, AlertStatus::Dismissed, now).await
}

async fn close_alert(
    pool: &PgPool,
    alert_id: Uuid,
    coach_id: Uuid,
    notes: Option<&str>,
    to: AlertStatus,
    now: DateTime<Utc>,
) -> Result<Alert, EngineError> {
    let current = store::fetch_alert(pool, alert_id).await?;
    current.status.transition(alert_id, to)?;
    store::transition_alert(pool, alert_id, current.status, to, coach_id, notes, now).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn score_with(
        composite: f64,
        attendance: f64,
        performance: f64,
        wellness: f64,
        performance_trend: f64,
        days_since_last_visit: i32,
    ) -> RiskScore {
        let policy = Policy::default();
        let now = Utc::now();
        RiskScore {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            composite_score: composite,
            risk_level: policy.scoring.bucket(composite),
            churn_probability: policy.scoring.churn_probability(composite),
            attendance_score: attendance,
            performance_score: performance,
            engagement_score: 50.0,
            wellness_score: wellness,
            attendance_trend: 0.0,
            performance_trend,
            engagement_trend: 0.0,
            wellness_trend: 0.0,
            days_since_last_visit,
            days_since_last_checkin: 0,
            days_since_last_pr: 0,
            computed_at: now,
            valid_until: now + Duration::days(7),
        }
    }

    #[test]
    fn struggling_member_triggers_churn_and_performance_alerts() {
        let policy = Policy::default();
        let score = score_with(85.0, 20.0, 40.0, 25.0, -15.0, 10);
        let drafts = triggered_alerts(&policy, &score);
        let types: Vec<AlertType> = drafts.iter().map(|d| d.alert_type).collect();
        assert!(types.contains(&AlertType::ChurnRisk));
        assert!(types.contains(&AlertType::DecliningPerformance));
        for draft in &drafts {
            assert_eq!(draft.severity, score.risk_level);
        }
        assert!(matches!(
            score.risk_level,
            RiskLevel::High | RiskLevel::Critical
        ));
    }

    #[test]
    fn healthy_member_triggers_nothing() {
        let policy = Policy::default();
        let score = score_with(12.0, 90.0, 85.0, 88.0, 3.0, 1);
        assert!(triggered_alerts(&policy, &score).is_empty());
    }

    #[test]
    fn long_absence_triggers_attendance_even_with_decent_score() {
        let policy = Policy::default();
        let score = score_with(45.0, 55.0, 70.0, 70.0, 0.0, 21);
        let drafts = triggered_alerts(&policy, &score);
        assert!(drafts
            .iter()
            .any(|d| d.alert_type == AlertType::PoorAttendance));
    }

    #[test]
    fn wellness_slide_triggers_on_trend_alone() {
        let policy = Policy::default();
        let mut score = score_with(40.0, 60.0, 60.0, 60.0, 0.0, 2);
        score.wellness_trend = -20.0;
        let drafts = triggered_alerts(&policy, &score);
        assert!(drafts
            .iter()
            .any(|d| d.alert_type == AlertType::WellnessConcern));
    }

    #[test]
    fn repeated_evaluation_of_one_score_is_stable() {
        // Trigger decisions are a pure function of (policy, score):
        // re-evaluating within a validity window yields the same drafts,
        // and the active-alert unique index collapses the second round
        // into a refresh of the existing row rather than a duplicate.
        let policy = Policy::default();
        let score = score_with(85.0, 20.0, 40.0, 25.0, -15.0, 10);
        let first = triggered_alerts(&policy, &score);
        let second = triggered_alerts(&policy, &score);
        assert!(!first.is_empty());
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.alert_type, b.alert_type);
            assert_eq!(a.severity, b.severity);
        }
    }

    #[test]
    fn snapshot_carries_the_triggering_data() {
        let score = score_with(70.0, 30.0, 40.0, 50.0, -5.0, 8);
        let snapshot = trigger_snapshot(&score);
        assert_eq!(snapshot["composite_score"], 70.0);
        assert_eq!(snapshot["risk_level"], "high");
        assert_eq!(snapshot["days_since_last_visit"], 8);
    }
}
