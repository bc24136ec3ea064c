use thiserror::Error;
use uuid::Uuid;

use crate::models::AlertStatus;

/// Failures the engine reports to its callers.
///
/// Each variant maps to one branch of the error taxonomy: incomplete
/// inputs defer, illegal transitions conflict, cross-entity mismatches
/// reject at creation. Batch sweeps catch these per member and keep
/// going.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("signal snapshot incomplete for member {member_id}: missing {}", .missing.join(", "))]
    IncompleteSignals {
        member_id: Uuid,
        missing: Vec<String>,
    },

    #[error("no signal snapshot found for member {member_id}")]
    NoSignals { member_id: Uuid },

    #[error("alert {alert_id} cannot move from {from} to {to}")]
    InvalidTransition {
        alert_id: Uuid,
        from: AlertStatus,
        to: AlertStatus,
    },

    #[error("alert {alert_id} belongs to member {alert_member_id}, not {member_id}")]
    CrossMemberMismatch {
        alert_id: Uuid,
        alert_member_id: Uuid,
        member_id: Uuid,
    },

    #[error("alert {0} is already at critical severity")]
    SeverityCeiling(Uuid),

    #[error("intervention {0} has no follow-up pending")]
    NoFollowUpPending(Uuid),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("unrecognized {column} value '{value}' in store")]
    Decode { column: &'static str, value: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("failed to encode snapshot: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl EngineError {
    /// True for the conflict class surfaced to the coach-facing app as
    /// "someone got there first", as opposed to engine-side failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::CrossMemberMismatch { .. }
                | Self::SeverityCeiling(_)
                | Self::NoFollowUpPending(_)
        )
    }
}
