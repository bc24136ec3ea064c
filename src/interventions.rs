use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Intervention, OutcomeKind};
use crate::store;

/// Everything a coach supplies when logging an action they took.
#[derive(Debug, Clone)]
pub struct InterventionRequest {
    pub member_id: Uuid,
    pub coach_id: Uuid,
    pub alert_id: Option<Uuid>,
    pub intervention_type: String,
    pub title: String,
    pub description: String,
    pub outcome_kind: Option<OutcomeKind>,
    pub member_response: Option<String>,
    pub coach_notes: Option<String>,
    pub follow_up_due: Option<DateTime<Utc>>,
}

/// Records a coach intervention. A linked alert must belong to the same
/// member; cross-member linkage is rejected before anything is written.
pub async fn record(
    pool: &PgPool,
    request: InterventionRequest,
    now: DateTime<Utc>,
) -> Result<Intervention, EngineError> {
    let member = store::fetch_member(pool, request.member_id).await?;

    if let Some(alert_id) = request.alert_id {
        let alert = store::fetch_alert(pool, alert_id).await?;
        if alert.member_id != member.id {
            return Err(EngineError::CrossMemberMismatch {
                alert_id,
                alert_member_id: alert.member_id,
                member_id: member.id,
            });
        }
    }

    let intervention = Intervention {
        id: Uuid::new_v4(),
        tenant_id: member.tenant_id,
        member_id: member.id,
        coach_id: request.coach_id,
        alert_id: request.alert_id,
        intervention_type: request.intervention_type,
        title: request.title,
        description: request.description,
        outcome_kind: request.outcome_kind,
        member_response: request.member_response,
        coach_notes: request.coach_notes,
        follow_up_required: request.follow_up_due.is_some(),
        follow_up_due: request.follow_up_due,
        follow_up_completed: false,
        intervened_at: now,
    };

    store::insert_intervention(pool, &intervention).await?;
    info!(
        intervention_id = %intervention.id,
        member_id = %intervention.member_id,
        coach_id = %intervention.coach_id,
        intervention_type = %intervention.intervention_type,
        "intervention recorded"
    );
    Ok(intervention)
}

/// Marks a pending follow-up as done. The only mutation an intervention
/// accepts after creation.
pub async fn complete_follow_up(
    pool: &PgPool,
    intervention_id: Uuid,
) -> Result<(), EngineError> {
    store::complete_follow_up(pool, intervention_id).await?;
    info!(intervention_id = %intervention_id, "follow-up completed");
    Ok(())
}
