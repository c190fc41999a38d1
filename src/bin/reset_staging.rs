//! Script to empty every staging table and the staged document copies.

use clap::Parser;
use dotenvy::dotenv;
use rust_ice_ingest::db;
use rust_ice_ingest::staging::remove_staged_documents;
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(about = "Truncate all staging tables")]
struct Args {
    /// Acknowledge that all staged data is deleted
    #[arg(long)]
    confirm: bool,
}

/// Main entry point for the reset script.
///
/// Refuses to touch the database unless `--confirm` is passed.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    if !args.confirm {
        anyhow::bail!("Refusing to reset staging without --confirm");
    }

    let database_url = env::var("STAGING_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("STAGING_DATABASE_URL or DATABASE_URL must be set"))?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    let before = db::table_counts(&pool).await?;
    tracing::info!("Connected to staging. Truncating {} tables...", before.len());
    db::reset_staging(&pool).await?;

    for (table, count) in before {
        tracing::info!("{}: {} rows removed", table, count);
    }

    // Copies left behind would belong to student ids that no longer exist.
    if let Some(dir) = env::var("STAGING_DIR").ok().filter(|d| !d.trim().is_empty()) {
        let dir = PathBuf::from(dir);
        if remove_staged_documents(&dir).await? {
            tracing::info!("Removed staged documents from {}", dir.display());
        }
    }

    Ok(())
}
