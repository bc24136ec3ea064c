use std::path::PathBuf;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

mod alerts;
mod db;
mod error;
mod escalation;
mod interventions;
mod models;
mod notify;
mod outcomes;
mod policy;
mod report;
mod scoring;
mod signals;
mod store;

use policy::Policy;

#[derive(Parser)]
#[command(name = "retention-engine")]
#[command(about = "Retention risk engine for BoxPulse gym management", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import member signal snapshots from a CSV file
    ImportSignals {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute fresh risk scores with factor breakdowns
    #[command(group(
        ArgGroup::new("scope")
            .args(["member", "all_members"])
            .required(true)
            .multiple(false)
    ))]
    Score {
        #[arg(long)]
        member: Option<Uuid>,
        #[arg(long)]
        all_members: bool,
        #[arg(long)]
        tenant: Option<Uuid>,
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Evaluate current risk scores against alert policy
    #[command(group(
        ArgGroup::new("scope")
            .args(["member", "all_members"])
            .required(true)
            .multiple(false)
    ))]
    Evaluate {
        #[arg(long)]
        member: Option<Uuid>,
        #[arg(long)]
        all_members: bool,
        #[arg(long)]
        tenant: Option<Uuid>,
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Escalate overdue or worsening open alerts
    SweepEscalations {
        #[arg(long, default_value_t = 200)]
        page_size: i64,
    },
    /// Measure outcomes for interventions past their observation window
    SweepOutcomes {
        #[arg(long, default_value_t = 200)]
        page_size: i64,
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Acknowledge an active alert
    Acknowledge {
        #[arg(long)]
        alert: Uuid,
        #[arg(long)]
        coach: Uuid,
    },
    /// Resolve an open alert
    Resolve {
        #[arg(long)]
        alert: Uuid,
        #[arg(long)]
        coach: Uuid,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Dismiss an open alert as a false positive
    Dismiss {
        #[arg(long)]
        alert: Uuid,
        #[arg(long)]
        coach: Uuid,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Manually raise an open alert's severity one step
    Escalate {
        #[arg(long)]
        alert: Uuid,
        #[arg(long)]
        coach: Uuid,
        #[arg(long)]
        reason: String,
    },
    /// Record a coach intervention, optionally linked to an alert
    RecordIntervention {
        #[arg(long)]
        member: Uuid,
        #[arg(long)]
        coach: Uuid,
        #[arg(long = "type")]
        intervention_type: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        alert: Option<Uuid>,
        #[arg(long)]
        follow_up_in_days: Option<i64>,
    },
    /// Mark an intervention's pending follow-up as done
    CompleteFollowUp {
        #[arg(long)]
        intervention: Uuid,
    },
    /// Generate a markdown retention report for one tenant
    Report {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn load_policy(path: Option<&PathBuf>) -> anyhow::Result<Policy> {
    match path {
        Some(path) => Policy::load(path)
            .with_context(|| format!("failed to load policy from {}", path.display())),
        None => {
            let policy = Policy::default();
            policy.validate()?;
            Ok(policy)
        }
    }
}

/// Members in scope for a batch run: one explicit member, or every
/// member (optionally narrowed to a tenant).
async fn scoped_members(
    pool: &PgPool,
    member: Option<Uuid>,
    tenant: Option<Uuid>,
) -> anyhow::Result<Vec<models::Member>> {
    match member {
        Some(id) => Ok(vec![store::fetch_member(pool, id).await?]),
        None => Ok(store::list_members(pool, tenant).await?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportSignals { csv } => {
            let inserted = db::import_signals_csv(&pool, &csv).await?;
            println!("Inserted {inserted} signal snapshots from {}.", csv.display());
        }
        Commands::Score {
            member,
            tenant,
            policy,
            ..
        } => {
            let policy = load_policy(policy.as_ref())?;
            let now = Utc::now();
            let single_member = member.is_some();
            let mut scored = 0usize;
            let mut skipped = 0usize;

            for member in scoped_members(&pool, member, tenant).await? {
                match signals::fetch_signals(&pool, member.id, now).await {
                    Ok(member_signals) => {
                        let (score, factors) = scoring::score_member(
                            &policy.scoring,
                            member.tenant_id,
                            &member_signals,
                            now,
                        );
                        store::insert_risk_score(&pool, &score, &factors).await?;
                        println!(
                            "- {} composite {:.1} [{}] churn {:.0}%",
                            member.full_name,
                            score.composite_score,
                            score.risk_level,
                            score.churn_probability * 100.0
                        );
                        if single_member {
                            let factors = store::factors_for_score(&pool, score.id).await?;
                            for factor in factors.iter().take(3) {
                                println!(
                                    "    {} = {:.1} contributed {:+.1}",
                                    factor.factor_type, factor.factor_value, factor.contribution
                                );
                            }
                        }
                        scored += 1;
                    }
                    Err(error) => {
                        // One member's missing signals must not sink the batch.
                        warn!(member_id = %member.id, %error, "skipping member");
                        skipped += 1;
                    }
                }
            }

            println!("Scored {scored} members ({skipped} skipped).");
        }
        Commands::Evaluate {
            member,
            tenant,
            policy,
            ..
        } => {
            let policy = load_policy(policy.as_ref())?;
            let now = Utc::now();
            let mut created = 0usize;
            let mut refreshed = 0usize;

            for member in scoped_members(&pool, member, tenant).await? {
                let score = match store::current_risk_score(&pool, member.id).await? {
                    Some(score) => score,
                    None => {
                        warn!(member_id = %member.id, "no risk score yet; skipping");
                        continue;
                    }
                };
                match alerts::evaluate(&pool, &policy, &member, &score, now).await {
                    Ok(evaluation) => {
                        for upsert in &evaluation.upserts {
                            if upsert.created {
                                created += 1;
                            } else {
                                refreshed += 1;
                            }
                        }
                        notify::dispatch(&evaluation.events);
                    }
                    Err(error) => {
                        warn!(member_id = %member.id, %error, "evaluation failed; continuing");
                    }
                }
            }

            println!("Alerts: {created} created, {refreshed} refreshed.");
        }
        Commands::SweepEscalations { page_size } => {
            let outcome = escalation::sweep(&pool, Utc::now(), page_size).await?;
            notify::dispatch(&outcome.events);
            println!(
                "Examined {} open alerts, escalated {}.",
                outcome.examined, outcome.escalated
            );
        }
        Commands::SweepOutcomes { page_size, policy } => {
            let policy = load_policy(policy.as_ref())?;
            let outcome = outcomes::sweep(&pool, &policy.outcomes, Utc::now(), page_size).await?;
            println!(
                "Examined {} due interventions: {} measured, {} deferred, {} already recorded.",
                outcome.examined, outcome.measured, outcome.deferred, outcome.already_measured
            );
        }
        Commands::Acknowledge { alert, coach } => {
            let alert = alerts::acknowledge(&pool, alert, coach, Utc::now()).await?;
            println!("Alert {} acknowledged.", alert.id);
        }
        Commands::Resolve { alert, coach, notes } => {
            let alert =
                alerts::resolve(&pool, alert, coach, notes.as_deref(), Utc::now()).await?;
            println!("Alert {} resolved.", alert.id);
        }
        Commands::Dismiss { alert, coach, notes } => {
            let alert =
                alerts::dismiss(&pool, alert, coach, notes.as_deref(), Utc::now()).await?;
            println!("Alert {} dismissed.", alert.id);
        }
        Commands::Escalate { alert, coach, reason } => {
            let (alert, event) =
                escalation::escalate_manual(&pool, alert, coach, &reason, Utc::now()).await?;
            notify::dispatch(&[event]);
            println!("Alert {} escalated to {}.", alert.id, alert.severity);
        }
        Commands::RecordIntervention {
            member,
            coach,
            intervention_type,
            title,
            description,
            alert,
            follow_up_in_days,
        } => {
            let now = Utc::now();
            let request = interventions::InterventionRequest {
                member_id: member,
                coach_id: coach,
                alert_id: alert,
                intervention_type,
                title,
                description,
                outcome_kind: None,
                member_response: None,
                coach_notes: None,
                follow_up_due: follow_up_in_days.map(|days| now + Duration::days(days)),
            };
            let intervention = interventions::record(&pool, request, now).await?;
            println!("Intervention {} recorded.", intervention.id);
        }
        Commands::CompleteFollowUp { intervention } => {
            interventions::complete_follow_up(&pool, intervention).await?;
            println!("Follow-up completed.");
        }
        Commands::Report { tenant, out } => {
            let data = report::gather(&pool, tenant).await?;
            let report = report::build_report(tenant, &data);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
