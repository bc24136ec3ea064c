use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::EngineError;

/// Complete inbound signal contract for one member as of one instant:
/// four component scores, four trend deltas, three recency counters,
/// plus the rate aggregates the outcome evaluator compares across
/// windows. The scorer refuses to run on anything less.
#[derive(Debug, Clone)]
pub struct MemberSignals {
    pub member_id: Uuid,
    pub as_of: DateTime<Utc>,
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
    pub attendance_rate: f64,
    pub checkin_rate: f64,
    pub pr_count: i32,
}

/// Raw snapshot row as stored; any column may be absent upstream.
#[derive(Debug, Clone)]
pub struct SignalSnapshot {
    pub member_id: Uuid,
    pub as_of: DateTime<Utc>,
    pub attendance_score: Option<f64>,
    pub performance_score: Option<f64>,
    pub engagement_score: Option<f64>,
    pub wellness_score: Option<f64>,
    pub attendance_trend: Option<f64>,
    pub performance_trend: Option<f64>,
    pub engagement_trend: Option<f64>,
    pub wellness_trend: Option<f64>,
    pub days_since_last_visit: Option<i32>,
    pub days_since_last_checkin: Option<i32>,
    pub days_since_last_pr: Option<i32>,
    pub attendance_rate: Option<f64>,
    pub checkin_rate: Option<f64>,
    pub pr_count: Option<i32>,
}

impl SignalSnapshot {
    /// Fails closed: every missing field is named, none is defaulted.
    pub fn into_complete(self) -> Result<MemberSignals, EngineError> {
        let mut missing = Vec::new();

        macro_rules! require {
            ($field:ident) => {
                match self.$field {
                    Some(value) => value,
                    None => {
                        missing.push(stringify!($field).to_string());
                        Default::default()
                    }
                }
            };
        }

        let signals = MemberSignals {
            member_id: self.member_id,
            as_of: self.as_of,
            attendance_score: require!(attendance_score),
            performance_score: require!(performance_score),
            engagement_score: require!(engagement_score),
            wellness_score: require!(wellness_score),
            attendance_trend: require!(attendance_trend),
            performance_trend: require!(performance_trend),
            engagement_trend: require!(engagement_trend),
            wellness_trend: require!(wellness_trend),
            days_since_last_visit: require!(days_since_last_visit),
            days_since_last_checkin: require!(days_since_last_checkin),
            days_since_last_pr: require!(days_since_last_pr),
            attendance_rate: require!(attendance_rate),
            checkin_rate: require!(checkin_rate),
            pr_count: require!(pr_count),
        };

        if missing.is_empty() {
            Ok(signals)
        } else {
            Err(EngineError::IncompleteSignals {
                member_id: self.member_id,
                missing,
            })
        }
    }
}

/// Latest snapshot at or before `as_of`, complete or an error.
pub async fn fetch_signals(
    pool: &PgPool,
    member_id: Uuid,
    as_of: DateTime<Utc>,
) -> Result<MemberSignals, EngineError> {
    match fetch_snapshot(pool, member_id, as_of).await? {
        Some(snapshot) => snapshot.into_complete(),
        None => Err(EngineError::NoSignals { member_id }),
    }
}

pub async fn fetch_snapshot(
    pool: &PgPool,
    member_id: Uuid,
    as_of: DateTime<Utc>,
) -> Result<Option<SignalSnapshot>, EngineError> {
    let row = sqlx::query(
        "SELECT member_id, as_of, attendance_score, performance_score, \
         engagement_score, wellness_score, attendance_trend, performance_trend, \
         engagement_trend, wellness_trend, days_since_last_visit, \
         days_since_last_checkin, days_since_last_pr, attendance_rate, \
         checkin_rate, pr_count \
         FROM retention.member_signals \
         WHERE member_id = $1 AND as_of <= $2 \
         ORDER BY as_of DESC, id DESC \
         LIMIT 1",
    )
    .bind(member_id)
    .bind(as_of)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| SignalSnapshot {
        member_id: row.get("member_id"),
        as_of: row.get("as_of"),
        attendance_score: row.get("attendance_score"),
        performance_score: row.get("performance_score"),
        engagement_score: row.get("engagement_score"),
        wellness_score: row.get("wellness_score"),
        attendance_trend: row.get("attendance_trend"),
        performance_trend: row.get("performance_trend"),
        engagement_trend: row.get("engagement_trend"),
        wellness_trend: row.get("wellness_trend"),
        days_since_last_visit: row.get("days_since_last_visit"),
        days_since_last_checkin: row.get("days_since_last_checkin"),
        days_since_last_pr: row.get("days_since_last_pr"),
        attendance_rate: row.get("attendance_rate"),
        checkin_rate: row.get("checkin_rate"),
        pr_count: row.get("pr_count"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_snapshot() -> SignalSnapshot {
        SignalSnapshot {
            member_id: Uuid::new_v4(),
            as_of: Utc::now(),
            attendance_score: Some(72.0),
            performance_score: Some(65.0),
            engagement_score: Some(58.0),
            wellness_score: Some(70.0),
            attendance_trend: Some(2.0),
            performance_trend: Some(-4.0),
            engagement_trend: Some(0.0),
            wellness_trend: Some(1.5),
            days_since_last_visit: Some(3),
            days_since_last_checkin: Some(5),
            days_since_last_pr: Some(21),
            attendance_rate: Some(0.64),
            checkin_rate: Some(0.5),
            pr_count: Some(2),
        }
    }

    #[test]
    fn complete_snapshot_converts() {
        let signals = full_snapshot().into_complete().unwrap();
        assert_eq!(signals.attendance_score, 72.0);
        assert_eq!(signals.days_since_last_pr, 21);
    }

    #[test]
    fn missing_fields_fail_closed_and_are_all_named() {
        let mut snapshot = full_snapshot();
        snapshot.performance_score = None;
        snapshot.wellness_trend = None;
        snapshot.checkin_rate = None;
        let err = snapshot.into_complete().unwrap_err();
        match err {
            EngineError::IncompleteSignals { missing, .. } => {
                assert_eq!(
                    missing,
                    vec!["performance_score", "wellness_trend", "checkin_rate"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
