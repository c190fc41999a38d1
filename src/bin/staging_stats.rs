//! Utility to print staging row counts and the latest ingestion runs.

use chrono::{DateTime, Utc};
use dotenvy::dotenv;
use rust_ice_ingest::db;
use sqlx::postgres::PgPoolOptions;
use std::env;

/// Main entry point for the statistics utility.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let database_url = env::var("STAGING_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("STAGING_DATABASE_URL or DATABASE_URL must be set"))?;
    let pool = PgPoolOptions::new().connect(&database_url).await?;

    println!("Staging tables:");
    for (table, count) in db::table_counts(&pool).await? {
        println!("- {:<26} {}", table, count);
    }
    println!();

    let runs: Vec<(String, DateTime<Utc>, Option<DateTime<Utc>>, String)> = sqlx::query_as(
        r#"
        SELECT status, started_at, completed_at, source_path
        FROM staging_ingestion_run
        ORDER BY started_at DESC
        LIMIT 5
        "#,
    )
    .fetch_all(&pool)
    .await?;

    println!("Latest runs:");
    for (status, started, completed, source) in runs {
        let finished = completed
            .map(|c| c.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("- {} {} -> {} ({})", status, started.to_rfc3339(), finished, source);
    }

    let failures: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT error_type, COUNT(*)
        FROM staging_failure_record
        WHERE NOT resolved
        GROUP BY error_type
        ORDER BY error_type
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !failures.is_empty() {
        println!();
        println!("Unresolved failures:");
        for (kind, count) in failures {
            println!("- {}: {}", kind, count);
        }
    }

    Ok(())
}
