use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let tenant_id = Uuid::parse_str("b6a1f9d0-4c2e-4f3a-9d5b-1a2c3e4f5a6b")?;

    let coaches = vec![
        (
            Uuid::parse_str("7f3e2a1b-8c4d-4e5f-9a0b-1c2d3e4f5a6b")?,
            "Dana Reyes",
            "dana.reyes@boxpulse.fit",
        ),
        (
            Uuid::parse_str("2b4d6f8a-0c1e-4357-8b9d-a1b2c3d4e5f6")?,
            "Marcus Webb",
            "marcus.webb@boxpulse.fit",
        ),
    ];

    for (id, name, email) in &coaches {
        sqlx::query(
            r#"
            INSERT INTO retention.coaches (id, tenant_id, full_name, email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, tenant_id = EXCLUDED.tenant_id
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(name)
        .bind(email)
        .execute(pool)
        .await?;
    }

    let members = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery Lee",
            "avery.lee@example.com",
            Some(coaches[0].0),
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules Moreno",
            "jules.moreno@example.com",
            Some(coaches[1].0),
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Kiara Patel",
            "kiara.patel@example.com",
            None,
        ),
    ];

    for (id, name, email, coach_id) in &members {
        sqlx::query(
            r#"
            INSERT INTO retention.members (id, tenant_id, full_name, email, assigned_coach_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, assigned_coach_id = EXCLUDED.assigned_coach_id
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(name)
        .bind(email)
        .bind(coach_id)
        .execute(pool)
        .await?;
    }

    // (email, scores, trends, recency, rates, prs, source_key)
    let snapshots: Vec<(
        &str,
        [f64; 4],
        [f64; 4],
        [i32; 3],
        [f64; 2],
        i32,
        &str,
    )> = vec![
        (
            "avery.lee@example.com",
            [82.0, 75.0, 80.0, 78.0],
            [3.0, 1.0, 2.0, 0.5],
            [1, 2, 12],
            [0.82, 0.7],
            3,
            "seed-avery-001",
        ),
        (
            "jules.moreno@example.com",
            [20.0, 40.0, 30.0, 25.0],
            [-15.0, -15.0, -15.0, -15.0],
            [12, 20, 60],
            [0.18, 0.1],
            0,
            "seed-jules-001",
        ),
        (
            "kiara.patel@example.com",
            [55.0, 48.0, 50.0, 52.0],
            [-5.0, -8.0, 0.0, -2.0],
            [6, 7, 30],
            [0.55, 0.4],
            1,
            "seed-kiara-001",
        ),
    ];

    for (email, scores, trends, recency, rates, prs, source_key) in snapshots {
        let member_id: Uuid =
            sqlx::query("SELECT id FROM retention.members WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?
                .get("id");

        sqlx::query(
            r#"
            INSERT INTO retention.member_signals
            (id, tenant_id, member_id, as_of, attendance_score, performance_score,
             engagement_score, wellness_score, attendance_trend, performance_trend,
             engagement_trend, wellness_trend, days_since_last_visit,
             days_since_last_checkin, days_since_last_pr, attendance_rate,
             checkin_rate, pr_count, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(member_id)
        .bind(Utc::now())
        .bind(scores[0])
        .bind(scores[1])
        .bind(scores[2])
        .bind(scores[3])
        .bind(trends[0])
        .bind(trends[1])
        .bind(trends[2])
        .bind(trends[3])
        .bind(recency[0])
        .bind(recency[1])
        .bind(recency[2])
        .bind(rates[0])
        .bind(rates[1])
        .bind(prs)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Bulk-loads signal snapshots exported by the aggregation pipeline.
/// Empty cells stay NULL so the scorer can fail closed on them.
pub async fn import_signals_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        member_email: String,
        as_of: DateTime<Utc>,
        attendance_score: Option<f64>,
        performance_score: Option<f64>,
        engagement_score: Option<f64>,
        wellness_score: Option<f64>,
        attendance_trend: Option<f64>,
        performance_trend: Option<f64>,
        engagement_trend: Option<f64>,
        wellness_trend: Option<f64>,
        days_since_last_visit: Option<i32>,
        days_since_last_checkin: Option<i32>,
        days_since_last_pr: Option<i32>,
        attendance_rate: Option<f64>,
        checkin_rate: Option<f64>,
        pr_count: Option<i32>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let member = sqlx::query(
            "SELECT id, tenant_id FROM retention.members WHERE email = $1",
        )
        .bind(&row.member_email)
        .fetch_one(pool)
        .await?;
        let member_id: Uuid = member.get("id");
        let tenant_id: Uuid = member.get("tenant_id");

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO retention.member_signals
            (id, tenant_id, member_id, as_of, attendance_score, performance_score,
             engagement_score, wellness_score, attendance_trend, performance_trend,
             engagement_trend, wellness_trend, days_since_last_visit,
             days_since_last_checkin, days_since_last_pr, attendance_rate,
             checkin_rate, pr_count, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(member_id)
        .bind(row.as_of)
        .bind(row.attendance_score)
        .bind(row.performance_score)
        .bind(row.engagement_score)
        .bind(row.wellness_score)
        .bind(row.attendance_trend)
        .bind(row.performance_trend)
        .bind(row.engagement_trend)
        .bind(row.wellness_trend)
        .bind(row.days_since_last_visit)
        .bind(row.days_since_last_checkin)
        .bind(row.days_since_last_pr)
        .bind(row.attendance_rate)
        .bind(row.checkin_rate)
        .bind(row.pr_count)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
