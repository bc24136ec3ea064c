use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{RiskFactor, RiskScore};
use crate::policy::ScoringPolicy;
use crate::signals::MemberSignals;

/// One contributing signal in the factor breakdown.
#[derive(Debug, Clone)]
pub struct FactorInput {
    pub factor_type: &'static str,
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
}

/// Composite plus its explainability breakdown. `composite_raw` is the
/// pre-clamp value: raw minus the neutral baseline equals the
/// contribution sum exactly, which is what the factor rows must
/// reconcile against.
#[derive(Debug, Clone)]
pub struct Composite {
    pub composite_raw: f64,
    pub composite: f64,
    pub factors: Vec<FactorInput>,
}

fn component_factor(
    factor_type: &'static str,
    score: f64,
    weight: f64,
    neutral: f64,
) -> FactorInput {
    FactorInput {
        factor_type,
        value: score,
        weight,
        contribution: weight * (neutral - score),
    }
}

fn trend_factor(
    factor_type: &'static str,
    delta: f64,
    weight: f64,
    policy: &ScoringPolicy,
) -> FactorInput {
    // A decline (negative delta) raises risk; an improvement credits it.
    let capped = (-delta).clamp(-policy.trend_cap, policy.trend_cap);
    FactorInput {
        factor_type,
        value: delta,
        weight,
        contribution: weight * capped * policy.trend_sensitivity,
    }
}

fn recency_factor(
    factor_type: &'static str,
    days: i32,
    penalty: &crate::policy::RecencyPenalty,
) -> FactorInput {
    FactorInput {
        factor_type,
        value: days as f64,
        weight: penalty.weight,
        contribution: penalty.penalty(days),
    }
}

/// Weighted composite over the eleven input signals. Each signal emits
/// exactly one factor; the composite is the neutral baseline plus the
/// contribution sum, clamped to [0, 100] only at the very end.
pub fn compute_composite(policy: &ScoringPolicy, signals: &MemberSignals) -> Composite {
    let neutral = policy.neutral_component_score;
    let factors = vec![
        component_factor(
            "attendance_score",
            signals.attendance_score,
            policy.attendance_weight,
            neutral,
        ),
        component_factor(
            "performance_score",
            signals.performance_score,
            policy.performance_weight,
            neutral,
        ),
        component_factor(
            "engagement_score",
            signals.engagement_score,
            policy.engagement_weight,
            neutral,
        ),
        component_factor(
            "wellness_score",
            signals.wellness_score,
            policy.wellness_weight,
            neutral,
        ),
        trend_factor(
            "attendance_trend",
            signals.attendance_trend,
            policy.attendance_weight,
            policy,
        ),
        trend_factor(
            "performance_trend",
            signals.performance_trend,
            policy.performance_weight,
            policy,
        ),
        trend_factor(
            "engagement_trend",
            signals.engagement_trend,
            policy.engagement_weight,
            policy,
        ),
        trend_factor(
            "wellness_trend",
            signals.wellness_trend,
            policy.wellness_weight,
            policy,
        ),
        recency_factor(
            "days_since_last_visit",
            signals.days_since_last_visit,
            &policy.visit_recency,
        ),
        recency_factor(
            "days_since_last_checkin",
            signals.days_since_last_checkin,
            &policy.checkin_recency,
        ),
        recency_factor(
            "days_since_last_pr",
            signals.days_since_last_pr,
            &policy.pr_recency,
        ),
    ];

    let contribution_sum: f64 = factors.iter().map(|f| f.contribution).sum();
    let composite_raw = neutral + contribution_sum;

    Composite {
        composite_raw,
        composite: composite_raw.clamp(0.0, 100.0),
        factors,
    }
}

/// Scores one member: a fresh RiskScore snapshot plus its factor rows,
/// ready to insert append-only.
pub fn score_member(
    policy: &ScoringPolicy,
    tenant_id: Uuid,
    signals: &MemberSignals,
    now: DateTime<Utc>,
) -> (RiskScore, Vec<RiskFactor>) {
    let composite = compute_composite(policy, signals);
    let score_id = Uuid::new_v4();

    let score = RiskScore {
        id: score_id,
        tenant_id,
        member_id: signals.member_id,
        composite_score: composite.composite,
        risk_level: policy.bucket(composite.composite),
        churn_probability: policy.churn_probability(composite.composite),
        attendance_score: signals.attendance_score,
        performance_score: signals.performance_score,
        engagement_score: signals.engagement_score,
        wellness_score: signals.wellness_score,
        attendance_trend: signals.attendance_trend,
        performance_trend: signals.performance_trend,
        engagement_trend: signals.engagement_trend,
        wellness_trend: signals.wellness_trend,
        days_since_last_visit: signals.days_since_last_visit,
        days_since_last_checkin: signals.days_since_last_checkin,
        days_since_last_pr: signals.days_since_last_pr,
        computed_at: now,
        valid_until: now + Duration::days(policy.validity_days),
    };

    let factors = composite
        .factors
        .into_iter()
        .map(|f| RiskFactor {
            id: Uuid::new_v4(),
            risk_score_id: score_id,
            factor_type: f.factor_type.to_string(),
            factor_value: f.value,
            weight: f.weight,
            contribution: f.contribution.clamp(-100.0, 100.0),
        })
        .collect();

    (score, factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;

    const EPSILON: f64 = 1e-9;

    fn signals(
        attendance: f64,
        performance: f64,
        engagement: f64,
        wellness: f64,
        trend: f64,
        days_checkin: i32,
    ) -> MemberSignals {
        MemberSignals {
            member_id: Uuid::new_v4(),
            as_of: Utc::now(),
            attendance_score: attendance,
            performance_score: performance,
            engagement_score: engagement,
            wellness_score: wellness,
            attendance_trend: trend,
            performance_trend: trend,
            engagement_trend: trend,
            wellness_trend: trend,
            days_since_last_visit: 0,
            days_since_last_checkin: days_checkin,
            days_since_last_pr: 0,
            attendance_rate: 0.5,
            checkin_rate: 0.5,
            pr_count: 1,
        }
    }

    #[test]
    fn contributions_reconcile_with_composite_deviation() {
        let policy = ScoringPolicy::default();
        let composite = compute_composite(&policy, &signals(62.0, 48.0, 55.0, 71.0, -8.0, 10));
        let sum: f64 = composite.factors.iter().map(|f| f.contribution).sum();
        let deviation = composite.composite_raw - policy.neutral_component_score;
        assert!((sum - deviation).abs() < EPSILON);
    }

    #[test]
    fn all_neutral_member_scores_at_baseline() {
        let policy = ScoringPolicy::default();
        let neutral = policy.neutral_component_score;
        let composite =
            compute_composite(&policy, &signals(neutral, neutral, neutral, neutral, 0.0, 0));
        assert!((composite.composite - neutral).abs() < EPSILON);
        for factor in &composite.factors {
            assert!(factor.contribution.abs() < EPSILON);
        }
    }

    #[test]
    fn emits_one_factor_per_input_signal() {
        let policy = ScoringPolicy::default();
        let composite = compute_composite(&policy, &signals(40.0, 40.0, 40.0, 40.0, -5.0, 3));
        assert_eq!(composite.factors.len(), 11);
    }

    #[test]
    fn declining_member_lands_in_a_high_bucket() {
        // Struggling on every component, every trend falling, three weeks
        // since the last check-in: this profile must not read as medium.
        let policy = ScoringPolicy::default();
        let (score, factors) =
            score_member(&policy, Uuid::new_v4(), &signals(20.0, 40.0, 30.0, 25.0, -15.0, 20), Utc::now());
        assert!(
            matches!(score.risk_level, RiskLevel::High | RiskLevel::Critical),
            "got {:?} at composite {}",
            score.risk_level,
            score.composite_score
        );
        assert_eq!(factors.len(), 11);
        assert!(score.churn_probability > 0.5);
    }

    #[test]
    fn healthy_member_scores_low() {
        let policy = ScoringPolicy::default();
        let (score, _) = score_member(
            &policy,
            Uuid::new_v4(),
            &signals(90.0, 85.0, 88.0, 92.0, 5.0, 1),
            Utc::now(),
        );
        assert_eq!(score.risk_level, RiskLevel::Low);
        assert!(score.churn_probability < 0.2);
    }

    #[test]
    fn composite_stays_within_bounds_at_extremes() {
        let policy = ScoringPolicy::default();
        let worst = compute_composite(&policy, &signals(0.0, 0.0, 0.0, 0.0, -100.0, 365));
        assert!(worst.composite <= 100.0);
        let best = compute_composite(&policy, &signals(100.0, 100.0, 100.0, 100.0, 100.0, 0));
        assert!(best.composite >= 0.0);
        for factor in worst.factors.iter().chain(best.factors.iter()) {
            assert!((-100.0..=100.0).contains(&factor.contribution));
        }
    }

    #[test]
    fn trend_adjustment_is_capped() {
        let policy = ScoringPolicy::default();
        let capped = compute_composite(&policy, &signals(50.0, 50.0, 50.0, 50.0, -policy.trend_cap, 0));
        let beyond = compute_composite(&policy, &signals(50.0, 50.0, 50.0, 50.0, -80.0, 0));
        assert!((capped.composite - beyond.composite).abs() < EPSILON);
    }

    #[test]
    fn worse_recency_never_lowers_the_score() {
        let policy = ScoringPolicy::default();
        let mut previous = 0.0;
        for days in [0, 5, 10, 20, 40, 90] {
            let composite = compute_composite(&policy, &signals(50.0, 50.0, 50.0, 50.0, 0.0, days));
            assert!(composite.composite >= previous);
            previous = composite.composite;
        }
    }

    #[test]
    fn validity_window_follows_policy() {
        let policy = ScoringPolicy::default();
        let now = Utc::now();
        let (score, _) = score_member(&policy, Uuid::new_v4(), &signals(50.0, 50.0, 50.0, 50.0, 0.0, 0), now);
        assert_eq!(score.valid_until, now + Duration::days(policy.validity_days));
        assert!(!score.is_expired(now));
        assert!(score.is_expired(now + Duration::days(policy.validity_days)));
    }
}
