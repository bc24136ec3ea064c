use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::RiskLevel;

/// Penalty curve for one recency counter: free for `grace_days`, then
/// `per_day` points per day, capped at `cap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecencyPenalty {
    pub grace_days: i32,
    pub per_day: f64,
    pub cap: f64,
    pub weight: f64,
}

impl RecencyPenalty {
    pub fn penalty(&self, days: i32) -> f64 {
        let over = (days - self.grace_days).max(0) as f64;
        (over * self.per_day).min(self.cap) * self.weight
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub attendance_weight: f64,
    pub performance_weight: f64,
    pub engagement_weight: f64,
    pub wellness_weight: f64,
    /// Component score a "neutral" member would hold; the composite of an
    /// all-neutral member equals this value, which anchors factor
    /// contribution reconciliation.
    pub neutral_component_score: f64,
    /// Multiplier applied to (capped) trend declines.
    pub trend_sensitivity: f64,
    /// Per-period trend change considered beyond which movement is noise-capped.
    pub trend_cap: f64,
    pub visit_recency: RecencyPenalty,
    pub checkin_recency: RecencyPenalty,
    pub pr_recency: RecencyPenalty,
    pub critical_threshold: f64,
    pub high_threshold: f64,
    pub medium_threshold: f64,
    /// Logistic churn calibration: p = 1 / (1 + e^(-steepness * (score - midpoint))).
    pub churn_midpoint: f64,
    pub churn_steepness: f64,
    pub validity_days: i64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            attendance_weight: 0.35,
            performance_weight: 0.25,
            engagement_weight: 0.25,
            wellness_weight: 0.15,
            neutral_component_score: 50.0,
            trend_sensitivity: 0.6,
            trend_cap: 25.0,
            visit_recency: RecencyPenalty {
                grace_days: 7,
                per_day: 0.6,
                cap: 15.0,
                weight: 1.0,
            },
            checkin_recency: RecencyPenalty {
                grace_days: 7,
                per_day: 0.5,
                cap: 12.0,
                weight: 1.0,
            },
            pr_recency: RecencyPenalty {
                grace_days: 30,
                per_day: 0.1,
                cap: 6.0,
                weight: 1.0,
            },
            critical_threshold: 80.0,
            high_threshold: 60.0,
            medium_threshold: 35.0,
            churn_midpoint: 55.0,
            churn_steepness: 0.08,
            validity_days: 7,
        }
    }
}

impl ScoringPolicy {
    pub fn bucket(&self, composite: f64) -> RiskLevel {
        if composite >= self.critical_threshold {
            RiskLevel::Critical
        } else if composite >= self.high_threshold {
            RiskLevel::High
        } else if composite >= self.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn churn_probability(&self, composite: f64) -> f64 {
        let p = 1.0 / (1.0 + (-self.churn_steepness * (composite - self.churn_midpoint)).exp());
        p.clamp(0.0, 1.0)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let weight_sum = self.attendance_weight
            + self.performance_weight
            + self.engagement_weight
            + self.wellness_weight;
        if (weight_sum - 1.0).abs() > 0.01 {
            return Err(EngineError::InvalidPolicy(format!(
                "component weights sum to {weight_sum:.3}, expected 1.0"
            )));
        }
        if !(self.medium_threshold < self.high_threshold
            && self.high_threshold < self.critical_threshold)
        {
            return Err(EngineError::InvalidPolicy(
                "bucket thresholds must satisfy medium < high < critical".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.neutral_component_score) {
            return Err(EngineError::InvalidPolicy(
                "neutral component score must lie in [0, 100]".to_string(),
            ));
        }
        if self.validity_days <= 0 {
            return Err(EngineError::InvalidPolicy(
                "validity window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trigger thresholds per alert type. These are business policy, sourced
/// from product configuration rather than baked into the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// churn_risk fires at or above this composite score.
    pub churn_composite_floor: f64,
    pub attendance_score_floor: f64,
    pub attendance_days_ceiling: i32,
    pub performance_score_floor: f64,
    pub performance_trend_floor: f64,
    pub wellness_score_floor: f64,
    pub wellness_trend_floor: f64,
    /// Hours until follow-up is due, by severity rank (low..critical).
    pub follow_up_hours: [i64; 4],
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            churn_composite_floor: 60.0,
            attendance_score_floor: 40.0,
            attendance_days_ceiling: 14,
            performance_score_floor: 40.0,
            performance_trend_floor: -10.0,
            wellness_score_floor: 35.0,
            wellness_trend_floor: -15.0,
            follow_up_hours: [168, 96, 48, 24],
        }
    }
}

impl AlertPolicy {
    pub fn follow_up_lead(&self, severity: RiskLevel) -> chrono::Duration {
        chrono::Duration::hours(self.follow_up_hours[severity.rank() as usize])
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.attendance_days_ceiling <= 0 {
            return Err(EngineError::InvalidPolicy(
                "attendance days ceiling must be positive".to_string(),
            ));
        }
        if self.follow_up_hours.iter().any(|hours| *hours <= 0) {
            return Err(EngineError::InvalidPolicy(
                "follow-up hours must all be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomePolicy {
    pub observation_days: i64,
    pub risk_delta_weight: f64,
    pub attendance_delta_weight: f64,
    pub checkin_delta_weight: f64,
    pub wellness_delta_weight: f64,
    pub pr_delta_weight: f64,
    /// Effectiveness score at or above which the category is positive.
    pub positive_cutoff: f64,
    /// Effectiveness score at or below which the category is negative.
    pub negative_cutoff: f64,
}

impl Default for OutcomePolicy {
    fn default() -> Self {
        Self {
            observation_days: 30,
            risk_delta_weight: 1.0,
            attendance_delta_weight: 40.0,
            checkin_delta_weight: 25.0,
            wellness_delta_weight: 0.5,
            pr_delta_weight: 3.0,
            positive_cutoff: 5.0,
            negative_cutoff: -5.0,
        }
    }
}

impl OutcomePolicy {
    fn validate(&self) -> Result<(), EngineError> {
        if self.observation_days <= 0 {
            return Err(EngineError::InvalidPolicy(
                "observation window must be positive".to_string(),
            ));
        }
        if self.negative_cutoff >= self.positive_cutoff {
            return Err(EngineError::InvalidPolicy(
                "negative cutoff must be below positive cutoff".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub scoring: ScoringPolicy,
    pub alerts: AlertPolicy,
    pub outcomes: OutcomePolicy,
}

impl Policy {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let policy: Policy = serde_json::from_str(&raw)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.scoring.validate()?;
        self.alerts.validate()?;
        self.outcomes.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_valid() {
        Policy::default().validate().unwrap();
    }

    #[test]
    fn buckets_follow_thresholds() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.bucket(85.0), RiskLevel::Critical);
        assert_eq!(policy.bucket(80.0), RiskLevel::Critical);
        assert_eq!(policy.bucket(70.0), RiskLevel::High);
        assert_eq!(policy.bucket(40.0), RiskLevel::Medium);
        assert_eq!(policy.bucket(10.0), RiskLevel::Low);
    }

    #[test]
    fn churn_probability_is_monotone_and_bounded() {
        let policy = ScoringPolicy::default();
        let mut previous = 0.0;
        for score in 0..=100 {
            let p = policy.churn_probability(score as f64);
            assert!((0.0..=1.0).contains(&p));
            assert!(p >= previous);
            previous = p;
        }
    }

    #[test]
    fn recency_penalty_is_monotone_and_capped() {
        let penalty = ScoringPolicy::default().checkin_recency;
        assert_eq!(penalty.penalty(0), 0.0);
        assert_eq!(penalty.penalty(7), 0.0);
        let mut previous = 0.0;
        for days in 0..200 {
            let p = penalty.penalty(days);
            assert!(p >= previous);
            assert!(p <= penalty.cap * penalty.weight);
            previous = p;
        }
    }

    #[test]
    fn rejects_unnormalized_weights() {
        let mut policy = Policy::default();
        policy.scoring.attendance_weight = 0.9;
        assert!(matches!(
            policy.validate(),
            Err(EngineError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn rejects_unordered_thresholds() {
        let mut policy = Policy::default();
        policy.scoring.high_threshold = 90.0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn rejects_nonpositive_follow_up_hours() {
        let mut policy = Policy::default();
        policy.alerts.follow_up_hours[2] = 0;
        assert!(matches!(
            policy.validate(),
            Err(EngineError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn rejects_zero_attendance_days_ceiling() {
        let mut policy = Policy::default();
        policy.alerts.attendance_days_ceiling = 0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn follow_up_lead_shrinks_with_severity() {
        let policy = AlertPolicy::default();
        assert!(
            policy.follow_up_lead(RiskLevel::Critical) < policy.follow_up_lead(RiskLevel::Low)
        );
    }
}
