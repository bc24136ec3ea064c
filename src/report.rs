use std::fmt::Write;

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Alert, Escalation, InterventionOutcome, Member, RiskScore};
use crate::store;

pub struct ReportData {
    pub members: Vec<(Member, Option<RiskScore>)>,
    pub open_alerts: Vec<Alert>,
    pub escalations: Vec<Escalation>,
    pub outcomes: Vec<InterventionOutcome>,
}

pub async fn gather(pool: &PgPool, tenant_id: Uuid) -> Result<ReportData, EngineError> {
    let mut members = Vec::new();
    for member in store::list_members(pool, Some(tenant_id)).await? {
        let score = store::current_risk_score(pool, member.id).await?;
        members.push((member, score));
    }

    Ok(ReportData {
        open_alerts: store::list_open_alerts(pool, tenant_id).await?,
        escalations: store::recent_escalations(pool, tenant_id, 10).await?,
        outcomes: store::recent_outcomes(pool, tenant_id, 10).await?,
        members,
    })
}

pub fn build_report(tenant_id: Uuid, data: &ReportData) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Retention Risk Report");
    let _ = writeln!(output, "Tenant {tenant_id}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Member Risk Standing");

    let mut ranked: Vec<&(Member, Option<RiskScore>)> = data.members.iter().collect();
    ranked.sort_by(|a, b| {
        let a_score = a.1.as_ref().map(|s| s.composite_score).unwrap_or(-1.0);
        let b_score = b.1.as_ref().map(|s| s.composite_score).unwrap_or(-1.0);
        b_score
            .partial_cmp(&a_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if ranked.is_empty() {
        let _ = writeln!(output, "No members for this tenant.");
    } else {
        for (member, score) in ranked {
            match score {
                Some(score) => {
                    let _ = writeln!(
                        output,
                        "- {} ({}) composite {:.1} [{}], churn probability {:.0}%{}",
                        member.full_name,
                        member.email,
                        score.composite_score,
                        score.risk_level,
                        score.churn_probability * 100.0,
                        if score.is_expired(chrono::Utc::now()) {
                            " (score stale, recompute due)"
                        } else {
                            ""
                        }
                    );
                }
                None => {
                    let _ = writeln!(
                        output,
                        "- {} ({}) not yet scored",
                        member.full_name, member.email
                    );
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Open Alerts");

    if data.open_alerts.is_empty() {
        let _ = writeln!(output, "No open alerts.");
    } else {
        for alert in &data.open_alerts {
            let _ = writeln!(
                output,
                "- [{}] {} ({}, {}) reminders {}",
                alert.severity, alert.title, alert.alert_type, alert.status, alert.reminder_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Escalations");

    if data.escalations.is_empty() {
        let _ = writeln!(output, "No escalations recorded.");
    } else {
        for escalation in &data.escalations {
            let _ = writeln!(
                output,
                "- {} -> {} on {} ({}): {}",
                escalation.from_severity,
                escalation.to_severity,
                escalation.created_at.date_naive(),
                if escalation.auto_escalated { "auto" } else { "manual" },
                escalation.reason
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Intervention Outcomes");

    if data.outcomes.is_empty() {
        let _ = writeln!(output, "No measured outcomes yet.");
    } else {
        for outcome in &data.outcomes {
            let _ = writeln!(
                output,
                "- {} (score {:+.1}): risk {:+.1}, attendance {:+.2}, check-ins {:+.2}",
                outcome.effectiveness.as_str(),
                outcome.effectiveness_score,
                outcome.risk_score_delta,
                outcome.attendance_rate_delta,
                outcome.checkin_rate_delta
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Effectiveness, RiskLevel};
    use chrono::{Duration, Utc};

    fn member(name: &str) -> Member {
        Member {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            full_name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            assigned_coach_id: None,
        }
    }

    fn score(member_id: Uuid, composite: f64, level: RiskLevel) -> RiskScore {
        let now = Utc::now();
        RiskScore {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            member_id,
            composite_score: composite,
            risk_level: level,
            churn_probability: composite / 100.0,
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
    fn report_ranks_members_by_composite_desc() {
        let low = member("Avery Lee");
        let high = member("Jules Moreno");
        let data = ReportData {
            members: vec![
                (low.clone(), Some(score(low.id, 15.0, RiskLevel::Low))),
                (high.clone(), Some(score(high.id, 85.0, RiskLevel::Critical))),
            ],
            open_alerts: vec![],
            escalations: vec![],
            outcomes: vec![],
        };
        let report = build_report(Uuid::new_v4(), &data);
        let jules = report.find("Jules Moreno").unwrap();
        let avery = report.find("Avery Lee").unwrap();
        assert!(jules < avery);
    }

    #[test]
    fn report_handles_empty_sections() {
        let data = ReportData {
            members: vec![],
            open_alerts: vec![],
            escalations: vec![],
            outcomes: vec![],
        };
        let report = build_report(Uuid::new_v4(), &data);
        assert!(report.contains("No members for this tenant."));
        assert!(report.contains("No open alerts."));
        assert!(report.contains("No escalations recorded."));
        assert!(report.contains("No measured outcomes yet."));
    }

    #[test]
    fn unscored_members_are_listed_as_such() {
        let m = member("Kiara Patel");
        let data = ReportData {
            members: vec![(m, None)],
            open_alerts: vec![],
            escalations: vec![],
            outcomes: vec![],
        };
        let report = build_report(Uuid::new_v4(), &data);
        assert!(report.contains("not yet scored"));
    }

    #[test]
    fn outcome_lines_show_effectiveness() {
        let outcome = InterventionOutcome {
            id: Uuid::new_v4(),
            intervention_id: Uuid::new_v4(),
            risk_score_delta: -12.0,
            attendance_rate_delta: 0.2,
            checkin_rate_delta: 0.1,
            wellness_delta: 5.0,
            pr_activity_delta: 1,
            effectiveness_score: 23.0,
            effectiveness: Effectiveness::Positive,
            window_start: Utc::now() - Duration::days(30),
            window_end: Utc::now(),
            measured_at: Utc::now(),
        };
        let data = ReportData {
            members: vec![],
            open_alerts: vec![],
            escalations: vec![],
            outcomes: vec![outcome],
        };
        let report = build_report(Uuid::new_v4(), &data);
        assert!(report.contains("positive"));
    }
}
