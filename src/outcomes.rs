use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Effectiveness, Intervention, InterventionOutcome};
use crate::policy::OutcomePolicy;
use crate::signals;
use crate::store;

/// Member metrics on one side of the observation window.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub composite_score: f64,
    pub wellness_score: f64,
    pub attendance_rate: f64,
    pub checkin_rate: f64,
    pub pr_count: i32,
}

/// Pure measurement: pre/post deltas folded into one sign-aware
/// effectiveness score. Risk falling and activity rising both count as
/// improvement.
pub fn measure(
    policy: &OutcomePolicy,
    intervention_id: Uuid,
    pre: &MetricSample,
    post: &MetricSample,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    measured_at: DateTime<Utc>,
) -> InterventionOutcome {
    let risk_score_delta = post.composite_score - pre.composite_score;
    let attendance_rate_delta = post.attendance_rate - pre.attendance_rate;
    let checkin_rate_delta = post.checkin_rate - pre.checkin_rate;
    let wellness_delta = post.wellness_score - pre.wellness_score;
    let pr_activity_delta = post.pr_count - pre.pr_count;

    let effectiveness_score = (-risk_score_delta * policy.risk_delta_weight
        + attendance_rate_delta * policy.attendance_delta_weight
        + checkin_rate_delta * policy.checkin_delta_weight
        + wellness_delta * policy.wellness_delta_weight
        + pr_activity_delta as f64 * policy.pr_delta_weight)
        .clamp(-100.0, 100.0);

    let effectiveness = if effectiveness_score >= policy.positive_cutoff {
        Effectiveness::Positive
    } else if effectiveness_score <= policy.negative_cutoff {
        Effectiveness::Negative
    } else {
        Effectiveness::Neutral
    };

    InterventionOutcome {
        id: Uuid::new_v4(),
        intervention_id,
        risk_score_delta,
        attendance_rate_delta,
        checkin_rate_delta,
        wellness_delta,
        pr_activity_delta,
        effectiveness_score,
        effectiveness,
        window_start,
        window_end,
        measured_at,
    }
}

/// What one due intervention amounted to in a sweep run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Measurement {
    Recorded,
    Deferred,
    AlreadyRecorded,
}

#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub examined: usize,
    pub measured: usize,
    pub deferred: usize,
    pub already_measured: usize,
}

impl SweepOutcome {
    fn tally(&mut self, measurement: Measurement) {
        match measurement {
            Measurement::Recorded => self.measured += 1,
            Measurement::Deferred => self.deferred += 1,
            Measurement::AlreadyRecorded => self.already_measured += 1,
        }
    }
}

/// Measures every intervention whose observation window has closed and
/// which has no outcome yet, one keyset page at a time; deferred
/// interventions advance the cursor, so a deferral backlog never blocks
/// newer due work. Incomplete pre- or post-window data defers that
/// intervention to the next sweep; nothing partial is ever written.
/// Re-running is idempotent thanks to the outcome's uniqueness guarantee.
pub async fn sweep(
    pool: &PgPool,
    policy: &OutcomePolicy,
    now: DateTime<Utc>,
    page_size: i64,
) -> Result<SweepOutcome, EngineError> {
    let cutoff = now - Duration::days(policy.observation_days);
    let mut outcome = SweepOutcome::default();
    let mut cursor = None;

    loop {
        let due = store::interventions_awaiting_outcome(pool, cutoff, cursor, page_size).await?;
        outcome.examined += due.len();

        for intervention in &due {
            match evaluate_one(pool, policy, intervention, now).await {
                Ok(measurement) => outcome.tally(measurement),
                Err(error) => {
                    outcome.tally(Measurement::Deferred);
                    warn!(
                        intervention_id = %intervention.id,
                        %error,
                        "outcome evaluation failed; continuing sweep"
                    );
                }
            }
        }

        cursor = store::page_cursor(&due, page_size, |i| (i.intervened_at, i.id));
        if cursor.is_none() {
            break;
        }
    }

    Ok(outcome)
}

async fn evaluate_one(
    pool: &PgPool,
    policy: &OutcomePolicy,
    intervention: &Intervention,
    now: DateTime<Utc>,
) -> Result<Measurement, EngineError> {
    let window_start = intervention.intervened_at;
    let window_end = window_start + Duration::days(policy.observation_days);

    let Some(pre) = sample_at(pool, intervention.member_id, window_start, None).await? else {
        debug!(intervention_id = %intervention.id, "no pre-intervention metrics yet; deferring");
        return Ok(Measurement::Deferred);
    };
    // Post metrics must actually be from inside the window, not a stale
    // pre-intervention reading.
    let Some(post) = sample_at(pool, intervention.member_id, window_end, Some(window_start)).await?
    else {
        debug!(intervention_id = %intervention.id, "post-window metrics incomplete; deferring");
        return Ok(Measurement::Deferred);
    };

    let outcome = measure(
        policy,
        intervention.id,
        &pre,
        &post,
        window_start,
        window_end,
        now,
    );

    if !store::insert_outcome(pool, &outcome).await? {
        // Another sweep recorded this one between the page fetch and now.
        return Ok(Measurement::AlreadyRecorded);
    }

    info!(
        intervention_id = %intervention.id,
        effectiveness = outcome.effectiveness.as_str(),
        effectiveness_score = outcome.effectiveness_score,
        risk_score_delta = outcome.risk_score_delta,
        "intervention outcome measured"
    );
    Ok(Measurement::Recorded)
}

/// Latest risk score and signal snapshot at or before `at`, both
/// required; `after` rejects readings that predate the window.
async fn sample_at(
    pool: &PgPool,
    member_id: Uuid,
    at: DateTime<Utc>,
    after: Option<DateTime<Utc>>,
) -> Result<Option<MetricSample>, EngineError> {
    let Some(score) = store::risk_score_at(pool, member_id, at).await? else {
        return Ok(None);
    };
    let Some(snapshot) = signals::fetch_snapshot(pool, member_id, at).await? else {
        return Ok(None);
    };
    if let Some(after) = after {
        if score.computed_at <= after || snapshot.as_of <= after {
            return Ok(None);
        }
    }

    let complete = match snapshot.into_complete() {
        Ok(signals) => signals,
        Err(EngineError::IncompleteSignals { .. }) => return Ok(None),
        Err(other) => return Err(other),
    };

    Ok(Some(MetricSample {
        composite_score: score.composite_score,
        wellness_score: score.wellness_score,
        attendance_rate: complete.attendance_rate,
        checkin_rate: complete.checkin_rate,
        pr_count: complete.pr_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(composite: f64, attendance: f64, checkin: f64, wellness: f64, prs: i32) -> MetricSample {
        MetricSample {
            composite_score: composite,
            wellness_score: wellness,
            attendance_rate: attendance,
            checkin_rate: checkin,
            pr_count: prs,
        }
    }

    fn run(pre: MetricSample, post: MetricSample) -> InterventionOutcome {
        let now = Utc::now();
        measure(
            &OutcomePolicy::default(),
            Uuid::new_v4(),
            &pre,
            &post,
            now - Duration::days(30),
            now,
            now,
        )
    }

    #[test]
    fn risk_reduction_reads_as_positive() {
        let outcome = run(
            sample(70.0, 0.4, 0.3, 50.0, 1),
            sample(50.0, 0.4, 0.3, 50.0, 1),
        );
        assert!(outcome.risk_score_delta < 0.0);
        assert_eq!(outcome.effectiveness, Effectiveness::Positive);
        assert!(outcome.effectiveness_score > 0.0);
    }

    #[test]
    fn risk_increase_reads_as_negative() {
        let outcome = run(
            sample(50.0, 0.4, 0.3, 50.0, 1),
            sample(72.0, 0.4, 0.3, 50.0, 1),
        );
        assert_eq!(outcome.effectiveness, Effectiveness::Negative);
        assert!(outcome.effectiveness_score < 0.0);
    }

    #[test]
    fn flat_metrics_read_as_neutral() {
        let outcome = run(
            sample(55.0, 0.5, 0.4, 60.0, 2),
            sample(54.0, 0.5, 0.4, 60.0, 2),
        );
        assert_eq!(outcome.effectiveness, Effectiveness::Neutral);
    }

    #[test]
    fn attendance_gains_count_toward_effectiveness() {
        let outcome = run(
            sample(60.0, 0.2, 0.3, 50.0, 0),
            sample(60.0, 0.6, 0.3, 50.0, 0),
        );
        assert!(outcome.attendance_rate_delta > 0.0);
        assert_eq!(outcome.effectiveness, Effectiveness::Positive);
    }

    #[test]
    fn effectiveness_score_is_clamped() {
        let outcome = run(
            sample(100.0, 0.0, 0.0, 0.0, 0),
            sample(0.0, 1.0, 1.0, 100.0, 30),
        );
        assert!(outcome.effectiveness_score <= 100.0);
        let outcome = run(
            sample(0.0, 1.0, 1.0, 100.0, 30),
            sample(100.0, 0.0, 0.0, 0.0, 0),
        );
        assert!(outcome.effectiveness_score >= -100.0);
    }

    #[test]
    fn category_is_consistent_with_risk_delta_sign() {
        // Only the risk score moves; the category must follow its sign.
        for (pre_risk, post_risk) in [(80.0, 60.0), (60.0, 80.0)] {
            let outcome = run(
                sample(pre_risk, 0.5, 0.5, 50.0, 1),
                sample(post_risk, 0.5, 0.5, 50.0, 1),
            );
            if outcome.risk_score_delta < 0.0 {
                assert_eq!(outcome.effectiveness, Effectiveness::Positive);
            } else {
                assert_eq!(outcome.effectiveness, Effectiveness::Negative);
            }
        }
    }

    #[test]
    fn lost_insert_race_is_not_counted_as_measured() {
        let mut outcome = SweepOutcome::default();
        outcome.tally(Measurement::Recorded);
        outcome.tally(Measurement::AlreadyRecorded);
        outcome.tally(Measurement::Deferred);
        assert_eq!(outcome.measured, 1);
        assert_eq!(outcome.already_measured, 1);
        assert_eq!(outcome.deferred, 1);
    }

    #[test]
    fn window_bounds_are_recorded() {
        let now = Utc::now();
        let outcome = measure(
            &OutcomePolicy::default(),
            Uuid::new_v4(),
            &sample(60.0, 0.5, 0.5, 50.0, 1),
            &sample(55.0, 0.5, 0.5, 50.0, 1),
            now - Duration::days(30),
            now,
            now,
        );
        assert_eq!(outcome.window_end - outcome.window_start, Duration::days(30));
    }
}
