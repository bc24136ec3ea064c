//! All entity SQL lives here: append-only inserts for scores, factors,
//! escalations and outcomes; guarded compare-and-swap updates for alert
//! and intervention state. Decision logic stays out of this module.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{
    Alert, AlertStatus, AlertType, Effectiveness, Escalation, Intervention, InterventionOutcome,
    Member, OutcomeKind, RiskLevel, RiskScore,
};

fn parse_enum<T>(
    column: &'static str,
    value: String,
    parse: fn(&str) -> Option<T>,
) -> Result<T, EngineError> {
    parse(&value).ok_or(EngineError::Decode { column, value })
}

// ---- members ----------------------------------------------------------

fn row_to_member(row: &PgRow) -> Member {
    Member {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        assigned_coach_id: row.get("assigned_coach_id"),
    }
}

pub async fn fetch_member(pool: &PgPool, member_id: Uuid) -> Result<Member, EngineError> {
    let row = sqlx::query(
        "SELECT id, tenant_id, full_name, email, assigned_coach_id \
         FROM retention.members WHERE id = $1",
    )
    .bind(member_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| row_to_member(&row)).ok_or(EngineError::NotFound {
        entity: "member",
        id: member_id,
    })
}

pub async fn list_members(pool: &PgPool, tenant_id: Option<Uuid>) -> Result<Vec<Member>, EngineError> {
    let rows = match tenant_id {
        Some(tenant) => {
            sqlx::query(
                "SELECT id, tenant_id, full_name, email, assigned_coach_id \
                 FROM retention.members WHERE tenant_id = $1 ORDER BY full_name",
            )
            .bind(tenant)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT id, tenant_id, full_name, email, assigned_coach_id \
                 FROM retention.members ORDER BY full_name",
            )
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.iter().map(row_to_member).collect())
}

// ---- risk scores -------------------------------------------------------

fn row_to_risk_score(row: &PgRow) -> Result<RiskScore, EngineError> {
    Ok(RiskScore {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        member_id: row.get("member_id"),
        composite_score: row.get("composite_score"),
        risk_level: parse_enum("risk_level", row.get("risk_level"), RiskLevel::parse)?,
        churn_probability: row.get("churn_probability"),
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
        computed_at: row.get("computed_at"),
        valid_until: row.get("valid_until"),
    })
}

const RISK_SCORE_COLUMNS: &str = "id, tenant_id, member_id, composite_score, risk_level, \
     churn_probability, attendance_score, performance_score, engagement_score, \
     wellness_score, attendance_trend, performance_trend, engagement_trend, \
     wellness_trend, days_since_last_visit, days_since_last_checkin, \
     days_since_last_pr, computed_at, valid_until";

/// Inserts the snapshot and its factor breakdown in one transaction.
/// Scores are never updated in place.
pub async fn insert_risk_score(
    pool: &PgPool,
    score: &RiskScore,
    factors: &[crate::models::RiskFactor],
) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO retention.risk_scores \
         (id, tenant_id, member_id, composite_score, risk_level, churn_probability, \
          attendance_score, performance_score, engagement_score, wellness_score, \
          attendance_trend, performance_trend, engagement_trend, wellness_trend, \
          days_since_last_visit, days_since_last_checkin, days_since_last_pr, \
          computed_at, valid_until) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
    )
    .bind(score.id)
    .bind(score.tenant_id)
    .bind(score.member_id)
    .bind(score.composite_score)
    .bind(score.risk_level.as_str())
    .bind(score.churn_probability)
    .bind(score.attendance_score)
    .bind(score.performance_score)
    .bind(score.engagement_score)
    .bind(score.wellness_score)
    .bind(score.attendance_trend)
    .bind(score.performance_trend)
    .bind(score.engagement_trend)
    .bind(score.wellness_trend)
    .bind(score.days_since_last_visit)
    .bind(score.days_since_last_checkin)
    .bind(score.days_since_last_pr)
    .bind(score.computed_at)
    .bind(score.valid_until)
    .execute(&mut *tx)
    .await?;

    for factor in factors {
        sqlx::query(
            "INSERT INTO retention.risk_factors \
             (id, risk_score_id, factor_type, factor_value, weight, contribution) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(factor.id)
        .bind(factor.risk_score_id)
        .bind(&factor.factor_type)
        .bind(factor.factor_value)
        .bind(factor.weight)
        .bind(factor.contribution)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Factor breakdown behind one score, largest contribution first.
pub async fn factors_for_score(
    pool: &PgPool,
    risk_score_id: Uuid,
) -> Result<Vec<crate::models::RiskFactor>, EngineError> {
    let rows = sqlx::query(
        "SELECT id, risk_score_id, factor_type, factor_value, weight, contribution \
         FROM retention.risk_factors WHERE risk_score_id = $1 \
         ORDER BY contribution DESC",
    )
    .bind(risk_score_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| crate::models::RiskFactor {
            id: row.get("id"),
            risk_score_id: row.get("risk_score_id"),
            factor_type: row.get("factor_type"),
            factor_value: row.get("factor_value"),
            weight: row.get("weight"),
            contribution: row.get("contribution"),
        })
        .collect())
}

/// The current-score rule, in one place: latest `computed_at` wins, ties
/// broken by larger id. Expired scores still count as current until a
/// recompute supersedes them; callers check `is_expired` when it matters.
pub async fn current_risk_score(
    pool: &PgPool,
    member_id: Uuid,
) -> Result<Option<RiskScore>, EngineError> {
    risk_score_at(pool, member_id, Utc::now()).await
}

/// Latest score computed at or before `at`; the outcome evaluator uses
/// this for both sides of its window.
pub async fn risk_score_at(
    pool: &PgPool,
    member_id: Uuid,
    at: DateTime<Utc>,
) -> Result<Option<RiskScore>, EngineError> {
    let row = sqlx::query(&format!(
        "SELECT {RISK_SCORE_COLUMNS} FROM retention.risk_scores \
         WHERE member_id = $1 AND computed_at <= $2 \
         ORDER BY computed_at DESC, id DESC LIMIT 1"
    ))
    .bind(member_id)
    .bind(at)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_risk_score).transpose()
}

// ---- alerts ------------------------------------------------------------

fn row_to_alert(row: &PgRow) -> Result<Alert, EngineError> {
    let suggested: serde_json::Value = row.get("suggested_actions");
    Ok(Alert {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        member_id: row.get("member_id"),
        alert_type: parse_enum("alert_type", row.get("alert_type"), AlertType::parse)?,
        severity: parse_enum("severity", row.get("severity"), RiskLevel::parse)?,
        status: parse_enum("status", row.get("status"), AlertStatus::parse)?,
        assigned_coach_id: row.get("assigned_coach_id"),
        title: row.get("title"),
        description: row.get("description"),
        trigger_snapshot: row.get("trigger_snapshot"),
        suggested_actions: serde_json::from_value(suggested)?,
        acknowledged_by: row.get("acknowledged_by"),
        acknowledged_at: row.get("acknowledged_at"),
        resolved_by: row.get("resolved_by"),
        resolved_at: row.get("resolved_at"),
        resolution_notes: row.get("resolution_notes"),
        follow_up_due: row.get("follow_up_due"),
        reminder_count: row.get("reminder_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const ALERT_COLUMNS: &str = "id, tenant_id, member_id, alert_type, severity, status, \
     assigned_coach_id, title, description, trigger_snapshot, suggested_actions, \
     acknowledged_by, acknowledged_at, resolved_by, resolved_at, resolution_notes, \
     follow_up_due, reminder_count, created_at, updated_at";

pub async fn fetch_alert(pool: &PgPool, alert_id: Uuid) -> Result<Alert, EngineError> {
    let row = sqlx::query(&format!(
        "SELECT {ALERT_COLUMNS} FROM retention.alerts WHERE id = $1"
    ))
    .bind(alert_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_alert(&row),
        None => Err(EngineError::NotFound {
            entity: "alert",
            id: alert_id,
        }),
    }
}

/// Outcome of an insert-or-refresh against the active-alert uniqueness
/// guarantee.
#[derive(Debug, Clone)]
pub struct AlertUpsert {
    pub alert: Alert,
    pub created: bool,
}

/// Insert a new active alert, or refresh the existing active one for the
/// same (member, type). The partial unique index makes this race-safe:
/// a losing concurrent insert collapses into the update arm. Refreshes
/// touch only the trigger snapshot and reminder metadata; severity moves
/// are the escalation controller's job.
pub async fn upsert_active_alert(pool: &PgPool, alert: &Alert) -> Result<AlertUpsert, EngineError> {
    let row = sqlx::query(&format!(
        "INSERT INTO retention.alerts AS a \
         (id, tenant_id, member_id, alert_type, severity, status, assigned_coach_id, \
          title, description, trigger_snapshot, suggested_actions, follow_up_due, \
          reminder_count, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, 'active', $6, $7, $8, $9, $10, $11, 0, $12, $12) \
         ON CONFLICT (member_id, alert_type) WHERE status = 'active' \
         DO UPDATE SET \
             trigger_snapshot = EXCLUDED.trigger_snapshot, \
             reminder_count = a.reminder_count + 1, \
             updated_at = EXCLUDED.updated_at \
         RETURNING {ALERT_COLUMNS}"
    ))
    .bind(alert.id)
    .bind(alert.tenant_id)
    .bind(alert.member_id)
    .bind(alert.alert_type.as_str())
    .bind(alert.severity.as_str())
    .bind(alert.assigned_coach_id)
    .bind(&alert.title)
    .bind(&alert.description)
    .bind(&alert.trigger_snapshot)
    .bind(serde_json::to_value(&alert.suggested_actions)?)
    .bind(alert.follow_up_due)
    .bind(alert.created_at)
    .fetch_one(pool)
    .await?;

    let stored = row_to_alert(&row)?;
    let created = stored.id == alert.id;
    Ok(AlertUpsert { alert: stored, created })
}

/// Compare-and-swap status transition. The WHERE clause re-checks the
/// source status, so a stale caller gets 0 rows and a conflict instead
/// of clobbering a newer state.
pub async fn transition_alert(
    pool: &PgPool,
    alert_id: Uuid,
    from: AlertStatus,
    to: AlertStatus,
    coach_id: Uuid,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Alert, EngineError> {
    let sql = match to {
        AlertStatus::Acknowledged => format!(
            "UPDATE retention.alerts \
             SET status = $3, acknowledged_by = $4, acknowledged_at = $5, updated_at = $5 \
             WHERE id = $1 AND status = $2 RETURNING {ALERT_COLUMNS}"
        ),
        AlertStatus::Resolved | AlertStatus::Dismissed => format!(
            "UPDATE retention.alerts \
             SET status = $3, resolved_by = $4, resolved_at = $5, updated_at = $5, \
                 resolution_notes = $6 \
             WHERE id = $1 AND status = $2 RETURNING {ALERT_COLUMNS}"
        ),
        AlertStatus::Active => {
            // Reactivation is not part of the state machine.
            return Err(EngineError::InvalidTransition {
                alert_id,
                from,
                to,
            });
        }
    };

    let mut query = sqlx::query(&sql)
        .bind(alert_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(coach_id)
        .bind(now);
    if matches!(to, AlertStatus::Resolved | AlertStatus::Dismissed) {
        query = query.bind(notes);
    }

    match query.fetch_optional(pool).await? {
        Some(row) => row_to_alert(&row),
        None => {
            // Lost the race or the caller's view was stale; report the
            // transition that actually failed.
            let current = fetch_alert(pool, alert_id).await?;
            Err(EngineError::InvalidTransition {
                alert_id,
                from: current.status,
                to,
            })
        }
    }
}

/// Keyset cursor for the sweep page scans: `Some(last key)` when the
/// page was full and another fetch is needed, `None` when the scan is
/// done. Skipped items still advance the cursor, so nothing at the head
/// of the ordering can starve the rest of the scan.
pub fn page_cursor<T, K>(items: &[T], page_size: i64, key: impl Fn(&T) -> K) -> Option<K> {
    if (items.len() as i64) < page_size {
        None
    } else {
        items.last().map(key)
    }
}

/// One page of open alerts for the escalation sweep, keyset-ordered on
/// (created_at, id) so a scan resumes after the last row it saw. The
/// key never changes when a row is examined or escalated, which keeps
/// the cursor monotone across pages.
pub async fn open_alerts_page(
    pool: &PgPool,
    after: Option<(DateTime<Utc>, Uuid)>,
    page_size: i64,
) -> Result<Vec<Alert>, EngineError> {
    let rows = match after {
        Some((created_at, id)) => {
            sqlx::query(&format!(
                "SELECT {ALERT_COLUMNS} FROM retention.alerts \
                 WHERE status IN ('active', 'acknowledged') \
                   AND (created_at, id) > ($2, $3) \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT $1"
            ))
            .bind(page_size)
            .bind(created_at)
            .bind(id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {ALERT_COLUMNS} FROM retention.alerts \
                 WHERE status IN ('active', 'acknowledged') \
                 ORDER BY created_at ASC, id ASC \
                 LIMIT $1"
            ))
            .bind(page_size)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(row_to_alert).collect()
}

pub async fn list_open_alerts(pool: &PgPool, tenant_id: Uuid) -> Result<Vec<Alert>, EngineError> {
    let rows = sqlx::query(&format!(
        "SELECT {ALERT_COLUMNS} FROM retention.alerts \
         WHERE tenant_id = $1 AND status IN ('active', 'acknowledged') \
         ORDER BY CASE severity WHEN 'critical' THEN 3 WHEN 'high' THEN 2 \
                  WHEN 'medium' THEN 1 ELSE 0 END DESC, created_at ASC"
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_alert).collect()
}

// ---- escalations -------------------------------------------------------

/// Raises alert severity and appends the escalation record atomically.
/// The severity CAS keeps concurrent sweeps from double-stepping: the
/// second writer matches 0 rows and backs off without a log entry.
pub async fn record_escalation(
    pool: &PgPool,
    escalation: &Escalation,
) -> Result<bool, EngineError> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE retention.alerts SET severity = $2, updated_at = $3 \
         WHERE id = $1 AND severity = $4 AND status IN ('active', 'acknowledged')",
    )
    .bind(escalation.alert_id)
    .bind(escalation.to_severity.as_str())
    .bind(escalation.created_at)
    .bind(escalation.from_severity.as_str())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO retention.escalations \
         (id, alert_id, from_severity, to_severity, reason, auto_escalated, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(escalation.id)
    .bind(escalation.alert_id)
    .bind(escalation.from_severity.as_str())
    .bind(escalation.to_severity.as_str())
    .bind(&escalation.reason)
    .bind(escalation.auto_escalated)
    .bind(escalation.created_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

pub async fn recent_escalations(
    pool: &PgPool,
    tenant_id: Uuid,
    limit: i64,
) -> Result<Vec<Escalation>, EngineError> {
    let rows = sqlx::query(
        "SELECT e.id, e.alert_id, e.from_severity, e.to_severity, e.reason, \
                e.auto_escalated, e.created_at \
         FROM retention.escalations e \
         JOIN retention.alerts a ON a.id = e.alert_id \
         WHERE a.tenant_id = $1 \
         ORDER BY e.created_at DESC LIMIT $2",
    )
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(Escalation {
                id: row.get("id"),
                alert_id: row.get("alert_id"),
                from_severity: parse_enum("from_severity", row.get("from_severity"), RiskLevel::parse)?,
                to_severity: parse_enum("to_severity", row.get("to_severity"), RiskLevel::parse)?,
                reason: row.get("reason"),
                auto_escalated: row.get("auto_escalated"),
                created_at: row.get("created_at"),
            })
        })
        .collect()
}

// ---- interventions -----------------------------------------------------

fn row_to_intervention(row: &PgRow) -> Result<Intervention, EngineError> {
    let outcome_kind = row
        .get::<Option<String>, _>("outcome_kind")
        .map(|s| parse_enum("outcome_kind", s, OutcomeKind::parse))
        .transpose()?;
    Ok(Intervention {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        member_id: row.get("member_id"),
        coach_id: row.get("coach_id"),
        alert_id: row.get("alert_id"),
        intervention_type: row.get("intervention_type"),
        title: row.get("title"),
        description: row.get("description"),
        outcome_kind,
        member_response: row.get("member_response"),
        coach_notes: row.get("coach_notes"),
        follow_up_required: row.get("follow_up_required"),
        follow_up_due: row.get("follow_up_due"),
        follow_up_completed: row.get("follow_up_completed"),
        intervened_at: row.get("intervened_at"),
    })
}

const INTERVENTION_COLUMNS: &str = "id, tenant_id, member_id, coach_id, alert_id, \
     intervention_type, title, description, outcome_kind, member_response, \
     coach_notes, follow_up_required, follow_up_due, follow_up_completed, \
     intervened_at";

pub async fn insert_intervention(
    pool: &PgPool,
    intervention: &Intervention,
) -> Result<(), EngineError> {
    sqlx::query(
        "INSERT INTO retention.interventions \
         (id, tenant_id, member_id, coach_id, alert_id, intervention_type, title, \
          description, outcome_kind, member_response, coach_notes, follow_up_required, \
          follow_up_due, follow_up_completed, intervened_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(intervention.id)
    .bind(intervention.tenant_id)
    .bind(intervention.member_id)
    .bind(intervention.coach_id)
    .bind(intervention.alert_id)
    .bind(&intervention.intervention_type)
    .bind(&intervention.title)
    .bind(&intervention.description)
    .bind(intervention.outcome_kind.map(|k| k.as_str()))
    .bind(&intervention.member_response)
    .bind(&intervention.coach_notes)
    .bind(intervention.follow_up_required)
    .bind(intervention.follow_up_due)
    .bind(intervention.follow_up_completed)
    .bind(intervention.intervened_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_intervention(
    pool: &PgPool,
    intervention_id: Uuid,
) -> Result<Intervention, EngineError> {
    let row = sqlx::query(&format!(
        "SELECT {INTERVENTION_COLUMNS} FROM retention.interventions WHERE id = $1"
    ))
    .bind(intervention_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_intervention(&row),
        None => Err(EngineError::NotFound {
            entity: "intervention",
            id: intervention_id,
        }),
    }
}

/// CAS on the follow-up flags; 0 rows means nothing was pending.
pub async fn complete_follow_up(
    pool: &PgPool,
    intervention_id: Uuid,
) -> Result<(), EngineError> {
    let result = sqlx::query(
        "UPDATE retention.interventions SET follow_up_completed = TRUE \
         WHERE id = $1 AND follow_up_required AND NOT follow_up_completed",
    )
    .bind(intervention_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        // Distinguish a missing row from a follow-up that is not pending.
        fetch_intervention(pool, intervention_id).await?;
        return Err(EngineError::NoFollowUpPending(intervention_id));
    }
    Ok(())
}

/// One page of interventions whose observation window closed before
/// `cutoff` and which have no outcome yet. Keyset-ordered on
/// (intervened_at, id); deferred interventions advance the cursor like
/// measured ones, so a backlog of deferrals cannot block newer work.
pub async fn interventions_awaiting_outcome(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    after: Option<(DateTime<Utc>, Uuid)>,
    page_size: i64,
) -> Result<Vec<Intervention>, EngineError> {
    let rows = match after {
        Some((intervened_at, id)) => {
            sqlx::query(&format!(
                "SELECT {INTERVENTION_COLUMNS} FROM retention.interventions i \
                 WHERE i.intervened_at <= $1 \
                   AND (i.intervened_at, i.id) > ($3, $4) \
                   AND NOT EXISTS (SELECT 1 FROM retention.intervention_outcomes o \
                                   WHERE o.intervention_id = i.id) \
                 ORDER BY i.intervened_at ASC, i.id ASC \
                 LIMIT $2"
            ))
            .bind(cutoff)
            .bind(page_size)
            .bind(intervened_at)
            .bind(id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {INTERVENTION_COLUMNS} FROM retention.interventions i \
                 WHERE i.intervened_at <= $1 \
                   AND NOT EXISTS (SELECT 1 FROM retention.intervention_outcomes o \
                                   WHERE o.intervention_id = i.id) \
                 ORDER BY i.intervened_at ASC, i.id ASC \
                 LIMIT $2"
            ))
            .bind(cutoff)
            .bind(page_size)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(row_to_intervention).collect()
}

// ---- intervention outcomes ----------------------------------------------

/// Write-once insert; returns false when another sweep already recorded
/// the outcome.
pub async fn insert_outcome(
    pool: &PgPool,
    outcome: &InterventionOutcome,
) -> Result<bool, EngineError> {
    let result = sqlx::query(
        "INSERT INTO retention.intervention_outcomes \
         (id, intervention_id, risk_score_delta, attendance_rate_delta, \
          checkin_rate_delta, wellness_delta, pr_activity_delta, \
          effectiveness_score, effectiveness, window_start, window_end, measured_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         ON CONFLICT (intervention_id) DO NOTHING",
    )
    .bind(outcome.id)
    .bind(outcome.intervention_id)
    .bind(outcome.risk_score_delta)
    .bind(outcome.attendance_rate_delta)
    .bind(outcome.checkin_rate_delta)
    .bind(outcome.wellness_delta)
    .bind(outcome.pr_activity_delta)
    .bind(outcome.effectiveness_score)
    .bind(outcome.effectiveness.as_str())
    .bind(outcome.window_start)
    .bind(outcome.window_end)
    .bind(outcome.measured_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn recent_outcomes(
    pool: &PgPool,
    tenant_id: Uuid,
    limit: i64,
) -> Result<Vec<InterventionOutcome>, EngineError> {
    let rows = sqlx::query(
        "SELECT o.id, o.intervention_id, o.risk_score_delta, o.attendance_rate_delta, \
                o.checkin_rate_delta, o.wellness_delta, o.pr_activity_delta, \
                o.effectiveness_score, o.effectiveness, o.window_start, o.window_end, \
                o.measured_at \
         FROM retention.intervention_outcomes o \
         JOIN retention.interventions i ON i.id = o.intervention_id \
         WHERE i.tenant_id = $1 \
         ORDER BY o.measured_at DESC LIMIT $2",
    )
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(InterventionOutcome {
                id: row.get("id"),
                intervention_id: row.get("intervention_id"),
                risk_score_delta: row.get("risk_score_delta"),
                attendance_rate_delta: row.get("attendance_rate_delta"),
                checkin_rate_delta: row.get("checkin_rate_delta"),
                wellness_delta: row.get("wellness_delta"),
                pr_activity_delta: row.get("pr_activity_delta"),
                effectiveness_score: row.get("effectiveness_score"),
                effectiveness: parse_enum("effectiveness", row.get("effectiveness"), Effectiveness::parse)?,
                window_start: row.get("window_start"),
                window_end: row.get("window_end"),
                measured_at: row.get("measured_at"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_page_advances_cursor_past_every_examined_item() {
        // The last key is the cursor regardless of what the sweep decided
        // about each item, so skipped head-of-scan items cannot pin it.
        let page = vec![10, 20, 30];
        assert_eq!(page_cursor(&page, 3, |k| *k), Some(30));
    }

    #[test]
    fn short_page_ends_the_scan() {
        let page = vec![10, 20];
        assert_eq!(page_cursor(&page, 3, |k| *k), None);
    }

    #[test]
    fn empty_page_ends_the_scan() {
        let page: Vec<i64> = vec![];
        assert_eq!(page_cursor(&page, 3, |k| *k), None);
    }
}
