use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Ordinal risk bucket shared by risk scores and alert severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    /// One bucket up, or `None` when already at the ceiling.
    pub fn escalated(&self) -> Option<Self> {
        match self {
            Self::Low => Some(Self::Medium),
            Self::Medium => Some(Self::High),
            Self::High => Some(Self::Critical),
            Self::Critical => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PoorAttendance,
    DecliningPerformance,
    WellnessConcern,
    ChurnRisk,
}

impl AlertType {
    pub const ALL: [AlertType; 4] = [
        Self::PoorAttendance,
        Self::DecliningPerformance,
        Self::WellnessConcern,
        Self::ChurnRisk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PoorAttendance => "poor_attendance",
            Self::DecliningPerformance => "declining_performance",
            Self::WellnessConcern => "wellness_concern",
            Self::ChurnRisk => "churn_risk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "poor_attendance" => Some(Self::PoorAttendance),
            "declining_performance" => Some(Self::DecliningPerformance),
            "wellness_concern" => Some(Self::WellnessConcern),
            "churn_risk" => Some(Self::ChurnRisk),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "acknowledged" => Some(Self::Acknowledged),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Dismissed)
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// States this status may legally move to.
    pub fn valid_transitions(&self) -> &'static [AlertStatus] {
        match self {
            Self::Active => &[Self::Acknowledged, Self::Resolved, Self::Dismissed],
            Self::Acknowledged => &[Self::Resolved, Self::Dismissed],
            Self::Resolved | Self::Dismissed => &[],
        }
    }

    pub fn can_transition_to(&self, to: AlertStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Pure transition check: `Ok(to)` when legal, conflict otherwise.
    pub fn transition(self, alert_id: Uuid, to: AlertStatus) -> Result<AlertStatus, EngineError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(EngineError::InvalidTransition {
                alert_id,
                from: self,
                to,
            })
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coach-observed outcome noted on the intervention itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Positive,
    Neutral,
    Negative,
    NoResponse,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
            Self::NoResponse => "no_response",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Self::Positive),
            "neutral" => Some(Self::Neutral),
            "negative" => Some(Self::Negative),
            "no_response" => Some(Self::NoResponse),
            _ => None,
        }
    }
}

/// Measured effectiveness category assigned by the outcome evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effectiveness {
    Positive,
    Neutral,
    Negative,
}

impl Effectiveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Self::Positive),
            "neutral" => Some(Self::Neutral),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Member {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub assigned_coach_id: Option<Uuid>,
}

/// One scoring snapshot. Append-only: a recompute inserts a new row and
/// the current-score rule picks the latest by computed_at.
#[derive(Debug, Clone)]
pub struct RiskScore {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub member_id: Uuid,
    pub composite_score: f64,
    pub risk_level: RiskLevel,
    pub churn_probability: f64,
    pub attendance_score: f64,
    pub performance_score: f64,
    pub engagement_score: f64,
    pub wellness_score: f64,
    pub attendance_trend: f64,
    pub performance_trend: f64,
    pub engagement_trend: f64,
    pub wellness_trend: f64,
    pub days_since_last_visit: i32,
    pub days_since_last_checkin: i32,
    pub days_since_last_pr: i32,
    pub computed_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl RiskScore {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_until
    }
}

/// Weighted contributor behind a risk score, kept for explainability.
#[derive(Debug, Clone)]
pub struct RiskFactor {
    pub id: Uuid,
    pub risk_score_id: Uuid,
    pub factor_type: String,
    pub factor_value: f64,
    pub weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub member_id: Uuid,
    pub alert_type: AlertType,
    pub severity: RiskLevel,
    pub status: AlertStatus,
    pub assigned_coach_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub trigger_snapshot: serde_json::Value,
    pub suggested_actions: Vec<String>,
    pub acknowledged_by: Option<Uuid>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub follow_up_due: Option<DateTime<Utc>>,
    pub reminder_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one severity raise on an alert.
#[derive(Debug, Clone)]
pub struct Escalation {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub from_severity: RiskLevel,
    pub to_severity: RiskLevel,
    pub reason: String,
    pub auto_escalated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Intervention {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub member_id: Uuid,
    pub coach_id: Uuid,
    pub alert_id: Option<Uuid>,
    pub intervention_type: String,
    pub title: String,
    pub description: String,
    pub outcome_kind: Option<OutcomeKind>,
    pub member_response: Option<String>,
    pub coach_notes: Option<String>,
    pub follow_up_required: bool,
    pub follow_up_due: Option<DateTime<Utc>>,
    pub follow_up_completed: bool,
    pub intervened_at: DateTime<Utc>,
}

/// Measured effect of one intervention over its observation window.
/// Written exactly once; the UNIQUE(intervention_id) constraint backs
/// that up under concurrent sweeps.
#[derive(Debug, Clone)]
pub struct InterventionOutcome {
    pub id: Uuid,
    pub intervention_id: Uuid,
    pub risk_score_delta: f64,
    pub attendance_rate_delta: f64,
    pub checkin_rate_delta: f64,
    pub wellness_delta: f64,
    pub pr_activity_delta: i32,
    pub effectiveness_score: f64,
    pub effectiveness: Effectiveness,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub measured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ranks_are_ordered() {
        assert!(RiskLevel::Low.rank() < RiskLevel::Medium.rank());
        assert!(RiskLevel::Medium.rank() < RiskLevel::High.rank());
        assert!(RiskLevel::High.rank() < RiskLevel::Critical.rank());
    }

    #[test]
    fn escalation_steps_up_and_stops_at_critical() {
        assert_eq!(RiskLevel::Low.escalated(), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::High.escalated(), Some(RiskLevel::Critical));
        assert_eq!(RiskLevel::Critical.escalated(), None);
    }

    #[test]
    fn active_alert_can_move_to_any_next_state() {
        let id = Uuid::new_v4();
        for to in [
            AlertStatus::Acknowledged,
            AlertStatus::Resolved,
            AlertStatus::Dismissed,
        ] {
            assert_eq!(AlertStatus::Active.transition(id, to).unwrap(), to);
        }
    }

    #[test]
    fn acknowledged_cannot_be_reacknowledged() {
        let id = Uuid::new_v4();
        let err = AlertStatus::Acknowledged
            .transition(id, AlertStatus::Acknowledged)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_states_permit_nothing() {
        let id = Uuid::new_v4();
        for from in [AlertStatus::Resolved, AlertStatus::Dismissed] {
            for to in [
                AlertStatus::Active,
                AlertStatus::Acknowledged,
                AlertStatus::Resolved,
                AlertStatus::Dismissed,
            ] {
                let err = from.transition(id, to).unwrap_err();
                assert!(matches!(err, EngineError::InvalidTransition { .. }));
                assert!(err.is_conflict());
            }
        }
    }

    #[test]
    fn resolve_on_dismissed_is_a_conflict_not_a_noop() {
        let id = Uuid::new_v4();
        let result = AlertStatus::Dismissed.transition(id, AlertStatus::Resolved);
        assert!(result.is_err());
    }

    #[test]
    fn enum_strings_round_trip() {
        for level in [
            RiskLevel::Low,
            RiskLevel::Medium,
            RiskLevel::High,
            RiskLevel::Critical,
        ] {
            assert_eq!(RiskLevel::parse(level.as_str()), Some(level));
        }
        for ty in AlertType::ALL {
            assert_eq!(AlertType::parse(ty.as_str()), Some(ty));
        }
        for status in [
            AlertStatus::Active,
            AlertStatus::Acknowledged,
            AlertStatus::Resolved,
            AlertStatus::Dismissed,
        ] {
            assert_eq!(AlertStatus::parse(status.as_str()), Some(status));
        }
    }
}
